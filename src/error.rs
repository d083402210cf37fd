//! Unified error handling for the herald crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while maintaining the ability to use
//! domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`HeraldErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use herald::error::{Error, HeraldErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Will retry on the next turn: {err}");
//!     } else {
//!         eprintln!("Fatal error: {err}");
//!     }
//! }
//! ```

use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::delivery::DeliveryError;
pub use crate::platform::error::{ParseTargetError, PlatformError};
pub use crate::scheduler::error::SchedulerError;
pub use crate::site::error::SiteError;
pub use crate::storage::StoreError;
pub use crate::utils::error::FetchError;

/// Common trait for all herald error types
pub trait HeraldErrorTrait: std::error::Error {
    /// Check if this error is recoverable (the next poll may succeed)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, credentials)
    Network,
    /// Parsing and data extraction errors
    Parsing,
    /// Subscription or credential store errors
    Storage,
    /// Outbound delivery errors
    Delivery,
    /// Scheduler and timing errors
    Scheduler,
}

impl ErrorCategory {
    /// Short label used in log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parsing => "parsing",
            Self::Storage => "storage",
            Self::Delivery => "delivery",
            Self::Scheduler => "scheduler",
        }
    }
}

/// Unified error type for the herald crate
#[derive(Error, Debug)]
pub enum Error {
    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Client and credential management errors
    #[error("Site error: {0}")]
    Site(#[from] SiteError),

    /// Platform fetch/parse errors
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Subscription/cookie store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Delivery errors
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Scheduler and timing errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl HeraldErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Site(e) => e.is_recoverable(),
            Self::Platform(e) => e.is_recoverable(),
            Self::Store(_) => true,
            Self::Delivery(e) => e.is_soft(),
            Self::Scheduler(e) => e.is_recoverable(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(_) | Self::Site(_) => ErrorCategory::Network,
            Self::Platform(e) => match e {
                PlatformError::Fetch(_) | PlatformError::Site(_) | PlatformError::Status(_) => {
                    ErrorCategory::Network
                }
                _ => ErrorCategory::Parsing,
            },
            Self::Store(_) => ErrorCategory::Storage,
            Self::Delivery(_) => ErrorCategory::Delivery,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
        }
    }
}

impl Error {
    /// Whether this error means "nothing to do this turn" rather than a failure
    pub fn is_skip(&self) -> bool {
        match self {
            Self::Site(e) => e.is_skip(),
            Self::Platform(PlatformError::Site(e)) => e.is_skip(),
            _ => false,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let fetch_err = Error::Fetch(FetchError::Timeout("https://example.com".into()));
        assert_eq!(fetch_err.category(), ErrorCategory::Network);

        let parse_err = Error::Platform(PlatformError::parse("bad markup"));
        assert_eq!(parse_err.category(), ErrorCategory::Parsing);

        let status_err = Error::Platform(PlatformError::status("live api 500"));
        assert_eq!(status_err.category().as_str(), "network");
    }

    #[test]
    fn test_is_recoverable() {
        let fetch_err = Error::Fetch(FetchError::Timeout("https://example.com".into()));
        assert!(fetch_err.is_recoverable());

        let closed = Error::Fetch(FetchError::ClientClosed);
        assert!(!closed.is_recoverable());
    }

    #[test]
    fn test_skip_detection() {
        let err = Error::Site(SiteError::NoAvailableCookie {
            site_name: "weibo".into(),
        });
        assert!(err.is_skip());

        let wrapped = Error::Platform(PlatformError::Site(SiteError::NoAvailableCookie {
            site_name: "weibo".into(),
        }));
        assert!(wrapped.is_skip());
        assert!(!Error::Platform(PlatformError::parse("x")).is_skip());
    }

    #[test]
    fn test_scheduler_category() {
        let err = Error::Scheduler(SchedulerError::unknown_platform("ghost"));
        assert_eq!(err.category(), ErrorCategory::Scheduler);
        assert!(!err.is_recoverable());
    }
}
