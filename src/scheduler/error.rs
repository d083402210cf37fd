//! Error types for the scheduler module

use std::fmt;

use crate::error::{Error, HeraldErrorTrait};
use crate::models::Target;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// A fetch cycle failed; carries the request trace of the cycle
    FetchFailed {
        platform_name: String,
        target: Target,
        source: Box<Error>,
        request_records: Vec<String>,
    },

    /// Weights could not be read from the subscription store
    WeightLookup {
        reason: String,
    },

    /// A target references a platform that is not registered
    UnknownPlatform {
        platform_name: String,
    },

    /// Cron expression could not be parsed
    InvalidCron {
        expression: String,
        reason: String,
    },

    /// Cadence is unusable
    InvalidSchedule {
        reason: String,
    },

    /// No scheduler exists for the site
    SiteNotFound {
        site_name: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchFailed {
                platform_name,
                target,
                source,
                request_records,
            } => {
                write!(
                    f,
                    "Fetch of {}-{} failed: {} ({} request(s) recorded)",
                    platform_name,
                    target,
                    source,
                    request_records.len()
                )
            }
            Self::WeightLookup { reason } => {
                write!(f, "Failed to look up weights: {}", reason)
            }
            Self::UnknownPlatform { platform_name } => {
                write!(f, "Unknown platform '{}'", platform_name)
            }
            Self::InvalidCron { expression, reason } => {
                write!(f, "Invalid cron expression '{}': {}", expression, reason)
            }
            Self::InvalidSchedule { reason } => {
                write!(f, "Invalid schedule: {}", reason)
            }
            Self::SiteNotFound { site_name } => {
                write!(f, "No scheduler for site '{}'", site_name)
            }
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::FetchFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl SchedulerError {
    /// Wrap the failure of one fetch cycle together with its request trace
    pub fn fetch_failed(
        platform_name: impl Into<String>,
        target: Target,
        source: impl Into<Error>,
        request_records: Vec<String>,
    ) -> Self {
        Self::FetchFailed {
            platform_name: platform_name.into(),
            target,
            source: Box::new(source.into()),
            request_records,
        }
    }

    /// Create an invalid cron error
    pub fn invalid_cron(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCron {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown platform error
    pub fn unknown_platform(platform_name: impl Into<String>) -> Self {
        Self::UnknownPlatform {
            platform_name: platform_name.into(),
        }
    }

    /// Request trace attached to a failed fetch, empty for other errors
    pub fn request_records(&self) -> &[String] {
        match self {
            Self::FetchFailed {
                request_records, ..
            } => request_records,
            _ => &[],
        }
    }

    /// Check if the error is recoverable (retry may succeed)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::FetchFailed { source, .. } => source.is_recoverable(),
            Self::WeightLookup { .. } => true,
            _ => false,
        }
    }

    /// Whether the failure came from the network layer
    pub fn is_network(&self) -> bool {
        match self {
            Self::FetchFailed { source, .. } => match source.as_ref() {
                Error::Fetch(e) => e.is_network(),
                Error::Platform(e) => e.is_network(),
                _ => false,
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformError;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::unknown_platform("weibo");
        assert_eq!(err.to_string(), "Unknown platform 'weibo'");

        let err = SchedulerError::invalid_cron("* *", "too few fields");
        assert!(err.to_string().contains("* *"));
    }

    #[test]
    fn test_fetch_failed_keeps_records() {
        let err = SchedulerError::fetch_failed(
            "rss",
            Target::new("https://example.com/feed"),
            PlatformError::parse("bad entry"),
            vec!["GET https://example.com/feed | [200]".to_string()],
        );
        assert_eq!(err.request_records().len(), 1);
        assert!(err.to_string().contains("1 request(s) recorded"));
        assert!(err.is_recoverable());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_config_errors_not_recoverable() {
        assert!(!SchedulerError::unknown_platform("x").is_recoverable());
        assert!(!SchedulerError::InvalidSchedule {
            reason: "zero interval".into()
        }
        .is_recoverable());
    }
}
