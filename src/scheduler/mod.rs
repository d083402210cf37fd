//! Weighted polling schedulers
//!
//! Every [`Site`](crate::site::Site) gets one [`Scheduler`]. On each tick of
//! the site's cadence the scheduler picks exactly one (platform, target) pair
//! by deficit weighted round-robin and polls it, so targets with a higher
//! weight-of-the-moment are polled proportionally more often while no target
//! with a positive weight starves.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────┐   target added/removed
//!            │   SchedulerManager   │◄──────────────────────── SubscriptionStore
//!            └──────────┬───────────┘
//!          one per site │
//!        ┌──────────────┼──────────────┐
//!        ▼              ▼              ▼
//!   ┌─────────┐    ┌─────────┐    ┌─────────┐
//!   │Scheduler│    │Scheduler│    │Scheduler│   trigger task per scheduler
//!   └────┬────┘    └─────────┘    └─────────┘
//!        │ exec_fetch: pick ─► ProcessContext ─► platform fetch ─► Dispatcher
//! ```
//!
//! # Modules
//!
//! - [`weighted`] - Deficit weighted round-robin selection state
//! - [`engine`] - One site's scheduler and its fetch cycle
//! - [`trigger`] - Timer loop driving a scheduler
//! - [`manager`] - Startup and subscription lifecycle routing
//! - [`error`] - Scheduler error types

pub mod engine;
pub mod error;
pub mod manager;
pub mod trigger;
pub mod weighted;

pub use engine::{FetchOutcome, Scheduler, SchedulerDeps};
pub use error::{SchedulerError, SchedulerResult};
pub use manager::SchedulerManager;
pub use trigger::run_trigger;
pub use weighted::{Schedulable, WeightedRoundRobin, NEW_SCHEDULABLE_WEIGHT};
