//! Error types for platform fetch strategies

use thiserror::Error;

use crate::site::error::SiteError;
use crate::utils::error::FetchError;

/// User input could not be turned into a canonical target
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot parse target from {input:?}{}", prompt.as_deref().map(|p| format!(": {p}")).unwrap_or_default())]
pub struct ParseTargetError {
    pub input: String,
    pub prompt: Option<String>,
}

impl ParseTargetError {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

/// Errors raised while fetching, diffing or parsing posts
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Malformed target string
    #[error(transparent)]
    ParseTarget(#[from] ParseTargetError),

    /// The status endpoint itself reported a meaningful failure
    #[error("status fetch failed: {0}")]
    Status(String),

    /// HTTP layer failure
    #[error("request failed: {0}")]
    Fetch(#[from] FetchError),

    /// No client could be obtained for the request
    #[error("client unavailable: {0}")]
    Site(#[from] SiteError),

    /// A raw post could not be turned into a post
    #[error("failed to parse post: {0}")]
    Parse(String),

    /// Batch API requested from a platform that has none
    #[error("platform {0} does not support batch fetching")]
    BatchUnsupported(String),

    /// Batch API answered with the wrong number of results
    #[error("batch fetch returned {got} results for {expected} targets")]
    BatchMismatch { expected: usize, got: usize },

    /// Platform table could not be built
    #[error("invalid platform registration: {0}")]
    Registration(String),
}

impl PlatformError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn status(msg: impl Into<String>) -> Self {
        Self::Status(msg.into())
    }

    pub fn registration(msg: impl Into<String>) -> Self {
        Self::Registration(msg.into())
    }

    /// Whether the next natural poll of the same target may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Site(e) => e.is_recoverable(),
            Self::Status(_) | Self::Parse(_) | Self::BatchMismatch { .. } => true,
            Self::ParseTarget(_) | Self::BatchUnsupported(_) | Self::Registration(_) => false,
        }
    }

    /// Whether this failure originated in the transport
    pub fn is_network(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_network(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_message() {
        let err = ParseTargetError::new("ftp://x").with_prompt("expected an http(s) url");
        assert_eq!(
            err.to_string(),
            "cannot parse target from \"ftp://x\": expected an http(s) url"
        );
        assert_eq!(
            ParseTargetError::new("x").to_string(),
            "cannot parse target from \"x\""
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(PlatformError::status("live api 500").is_recoverable());
        assert!(!PlatformError::BatchUnsupported("rss".into()).is_recoverable());
    }
}
