//! Error types for the HTTP layer
//!
//! Everything that can go wrong between building a request and reading the
//! response body ends up here.

use thiserror::Error;

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Non-success status code
    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    /// The client was already closed at the end of its fetch cycle
    #[error("HTTP client already closed")]
    ClientClosed,

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Content decoding error
    #[error("Decoding error: {0}")]
    Decode(String),

    /// JSON body could not be deserialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FetchError {
    /// Whether this error looks like a transient network condition
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Timeout(_) => true,
            Self::Status { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            Self::ClientClosed | Self::InvalidUrl(_) | Self::Decode(_) | Self::Json(_) => false,
        }
    }

    /// Whether this error comes from the transport rather than the payload
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_recoverable() {
        let err = FetchError::Status {
            status: 503,
            url: "https://example.com".to_string(),
        };
        assert!(err.is_recoverable());

        let err = FetchError::Status {
            status: 404,
            url: "https://example.com".to_string(),
        };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_closed_not_recoverable() {
        assert!(!FetchError::ClientClosed.is_recoverable());
        assert!(!FetchError::ClientClosed.is_network());
        assert!(FetchError::Timeout("x".into()).is_network());
    }
}
