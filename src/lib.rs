//! herald - weighted polling scheduler for subscription feeds
//!
//! herald watches remote sources (feeds, accounts, live rooms) on behalf of
//! subscribers, detects new posts or status changes, and hands them to a
//! send queue. Polling frequency per target follows configurable,
//! time-of-day dependent weights.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and types
//! - [`site`] - Polling cadences, HTTP clients and credential rotation
//! - [`platform`] - Fetch strategies (list diff, status diff) and built-in platforms
//! - [`scheduler`] - Weighted round-robin schedulers, one per site
//! - [`storage`] - Subscription and cookie stores
//! - [`delivery`] - Rendering and the outbound send queue
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use herald::config::AppConfig;
//! use herald::delivery::{ChannelSendQueue, Dispatcher, PlainRenderer};
//! use herald::platform::PlatformRegistry;
//! use herald::scheduler::{SchedulerDeps, SchedulerManager};
//! use herald::storage::{MemoryCookieStore, MemorySubscriptionStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::from_env()?;
//!     let (queue, _rx) = ChannelSendQueue::new(config.delivery.queue_capacity);
//!     let deps = SchedulerDeps {
//!         registry: Arc::new(PlatformRegistry::builtin(&config.fetch_options())?),
//!         store: Arc::new(MemorySubscriptionStore::new()),
//!         dispatcher: Dispatcher::new(Arc::new(PlainRenderer), Arc::new(queue)),
//!     };
//!     let manager = SchedulerManager::init(
//!         deps,
//!         Arc::new(MemoryCookieStore::new()),
//!         config.http_settings(),
//!         &config.scheduler,
//!     )
//!     .await?;
//!     manager.start().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod delivery;
pub mod error;
pub mod metrics;
pub mod models;
pub mod platform;
pub mod scheduler;
pub mod site;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::delivery::{Dispatcher, MessageSegment, Renderer, SendQueue};
    pub use crate::error::{Error, ErrorCategory, HeraldErrorTrait, Result};
    pub use crate::models::{Post, Recipient, SubUnit, Target, UserSubInfo, WeightConfig};
    pub use crate::platform::{NewMessage, Platform, PlatformFetcher, StatusChange};
    pub use crate::scheduler::{Scheduler, SchedulerManager};
    pub use crate::site::{ClientManager, HttpClient, ProcessContext, Site};
    pub use crate::storage::{CookieStore, SubscriptionStore};
}

// Direct re-exports for convenience
pub use models::{Post, Recipient, Target};
