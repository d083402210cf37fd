//! Subscription and credential stores
//!
//! The scheduler only talks to storage through the [`SubscriptionStore`] and
//! [`CookieStore`] traits. In-memory implementations are provided and seeded
//! from the config file; a database backend can be plugged in behind the same
//! traits.

pub mod cookie;
pub mod subscription;

pub use cookie::{Cookie, CookieStatus, CookieStore, MemoryCookieStore};
pub use subscription::{
    MemorySubscriptionStore, Subscription, SubscriptionStore, TargetHook, WeightEntry,
};

use thiserror::Error;

use crate::models::Target;

/// Errors raised by subscription and credential stores
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{user} is already subscribed to {platform_name}/{target}")]
    DuplicateSubscription {
        user: String,
        platform_name: String,
        target: Target,
    },

    #[error("{user} has no subscription to {platform_name}/{target}")]
    SubscriptionNotFound {
        user: String,
        platform_name: String,
        target: Target,
    },

    #[error("target {platform_name}/{target} is not tracked")]
    TargetNotFound {
        platform_name: String,
        target: Target,
    },

    #[error("cookie {0} not found")]
    CookieNotFound(u64),

    #[error("storage backend error: {0}")]
    Backend(String),
}
