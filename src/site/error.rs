//! Error types for client and credential management

use thiserror::Error;

use crate::storage::StoreError;
use crate::utils::error::FetchError;

/// Errors raised while producing or refreshing HTTP clients
#[derive(Error, Debug)]
pub enum SiteError {
    /// Building the underlying HTTP client failed
    #[error("failed to build client: {0}")]
    Client(#[from] FetchError),

    /// Every credential of the site is cooling down; the request is skipped
    #[error("no cookie of site {site_name} is available right now")]
    NoAvailableCookie { site_name: String },

    /// Cookie content is not a JSON object
    #[error("invalid cookie content: {0}")]
    InvalidCookie(String),

    /// Credential store failure
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),
}

impl SiteError {
    /// Whether the caller should skip this turn instead of reporting a failure
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::NoAvailableCookie { .. })
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Client(e) => e.is_recoverable(),
            Self::NoAvailableCookie { .. } | Self::Store(_) => true,
            Self::InvalidCookie(_) => false,
        }
    }
}
