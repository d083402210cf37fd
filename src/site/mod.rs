//! Polling sites and HTTP client management
//!
//! A [`Site`] is a polling cadence plus the kind of client manager its
//! platforms use. Every platform belongs to exactly one site and one
//! scheduler runs per site.

pub mod context;
pub mod cookie;
pub mod error;
pub mod http;

pub use context::ProcessContext;
pub use cookie::CookieClientManager;
pub use error::SiteError;
pub use http::{HttpClient, HttpResponse, HttpSettings, ResponseHook};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::models::Target;
use crate::scheduler::error::SchedulerError;
use crate::storage::CookieStore;

// ============================================================================
// Cadence
// ============================================================================

/// When a site's scheduler fires
#[derive(Clone)]
pub enum ScheduleSpec {
    /// Fixed period between ticks
    Interval(Duration),
    /// Cron expression (seconds field first)
    Cron {
        expression: String,
        schedule: Box<cron::Schedule>,
    },
    /// A single tick at a fixed instant
    Date(DateTime<Utc>),
}

impl ScheduleSpec {
    pub fn interval(period: Duration) -> Self {
        Self::Interval(period)
    }

    pub fn cron(expression: &str) -> Result<Self, SchedulerError> {
        let schedule = cron::Schedule::from_str(expression)
            .map_err(|e| SchedulerError::invalid_cron(expression, e.to_string()))?;
        Ok(Self::Cron {
            expression: expression.to_string(),
            schedule: Box::new(schedule),
        })
    }

    pub fn date(at: DateTime<Utc>) -> Self {
        Self::Date(at)
    }

    /// First fire time strictly after `now`, `None` once the cadence is exhausted
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval(period) => {
                let period = chrono::Duration::from_std(*period).ok()?;
                now.checked_add_signed(period)
            }
            Self::Cron { schedule, .. } => schedule.after(&now).next(),
            Self::Date(at) => (*at > now).then_some(*at),
        }
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            Self::Interval(period) if period.is_zero() => Err(SchedulerError::InvalidSchedule {
                reason: "interval must be greater than zero".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl PartialEq for ScheduleSpec {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Interval(a), Self::Interval(b)) => a == b,
            (Self::Cron { expression: a, .. }, Self::Cron { expression: b, .. }) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval(period) => write!(f, "Interval({period:?})"),
            Self::Cron { expression, .. } => write!(f, "Cron({expression})"),
            Self::Date(at) => write!(f, "Date({at})"),
        }
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval(period) => write!(f, "every {}s", period.as_secs()),
            Self::Cron { expression, .. } => write!(f, "cron '{expression}'"),
            Self::Date(at) => write!(f, "once at {at}"),
        }
    }
}

// ============================================================================
// Site
// ============================================================================

/// Which client manager a site's platforms share
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientManagerKind {
    /// Plain client, no credentials
    Default,
    /// Rotating stored cookies with a per-cookie cooldown
    Cookie { default_cooldown: Duration },
}

/// A shared polling cadence and client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub name: String,
    pub schedule: ScheduleSpec,
    pub client_mgr: ClientManagerKind,
    /// Whether the site can only be scraped with a browser-capable client
    pub require_browser: bool,
}

impl Site {
    pub fn new(name: impl Into<String>, schedule: ScheduleSpec) -> Self {
        Self {
            name: name.into(),
            schedule,
            client_mgr: ClientManagerKind::Default,
            require_browser: false,
        }
    }

    pub fn with_cookie_rotation(mut self, default_cooldown: Duration) -> Self {
        self.client_mgr = ClientManagerKind::Cookie { default_cooldown };
        self
    }

    pub fn requiring_browser(mut self) -> Self {
        self.require_browser = true;
        self
    }

    /// Instantiate the client manager this site asks for
    pub fn build_client_manager(
        &self,
        settings: HttpSettings,
        cookie_store: Arc<dyn CookieStore>,
    ) -> Arc<dyn ClientManager> {
        match self.client_mgr {
            ClientManagerKind::Default => Arc::new(DefaultClientManager::new(settings)),
            ClientManagerKind::Cookie { default_cooldown } => Arc::new(
                CookieClientManager::new(self.name.clone(), settings, cookie_store)
                    .with_default_cooldown(default_cooldown),
            ),
        }
    }
}

// ============================================================================
// Client managers
// ============================================================================

/// Produces HTTP clients for one site
#[async_trait]
pub trait ClientManager: Send + Sync {
    /// Client for polling `target`, or a site-level client when `None`
    async fn get_client(&self, target: Option<&Target>) -> Result<HttpClient, SiteError>;

    /// Client without per-target credentials, for fetching assets
    async fn get_client_for_static(&self) -> Result<HttpClient, SiteError>;

    /// Client used to resolve a target's display name
    async fn get_query_name_client(&self) -> Result<HttpClient, SiteError>;

    /// Re-derive session-level credentials. Idempotent.
    async fn refresh_client(&self) -> Result<(), SiteError>;

    /// Called once when the site's scheduler is created
    async fn on_init_scheduler(&self) -> Result<(), SiteError> {
        Ok(())
    }
}

/// Hands out fresh uncredentialed clients
pub struct DefaultClientManager {
    settings: HttpSettings,
}

impl DefaultClientManager {
    pub fn new(settings: HttpSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ClientManager for DefaultClientManager {
    async fn get_client(&self, _target: Option<&Target>) -> Result<HttpClient, SiteError> {
        Ok(HttpClient::new(&self.settings)?)
    }

    async fn get_client_for_static(&self) -> Result<HttpClient, SiteError> {
        Ok(HttpClient::new(&self.settings)?)
    }

    async fn get_query_name_client(&self) -> Result<HttpClient, SiteError> {
        Ok(HttpClient::new(&self.settings)?)
    }

    async fn refresh_client(&self) -> Result<(), SiteError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_interval_next_fire() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let spec = ScheduleSpec::interval(Duration::from_secs(30));
        assert_eq!(
            spec.next_fire_after(now),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap())
        );
    }

    #[test]
    fn test_cron_next_fire() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap();
        let spec = ScheduleSpec::cron("0 * * * * *").unwrap();
        assert_eq!(
            spec.next_fire_after(now),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap())
        );
    }

    #[test]
    fn test_invalid_cron() {
        assert!(ScheduleSpec::cron("not a cron").is_err());
    }

    #[test]
    fn test_date_fires_once() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let spec = ScheduleSpec::date(at);
        assert_eq!(spec.next_fire_after(at - chrono::Duration::seconds(1)), Some(at));
        assert_eq!(spec.next_fire_after(at), None);
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(ScheduleSpec::interval(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_site_equality_compares_cadence() {
        let a = Site::new("rss", ScheduleSpec::interval(Duration::from_secs(30)));
        let b = Site::new("rss", ScheduleSpec::interval(Duration::from_secs(60)));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
