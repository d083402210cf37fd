//! Configuration management for herald
//!
//! This module handles loading and validating configuration from TOML files
//! and environment variables. Subscriptions and weights listed in the file
//! seed the in-memory subscription store.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::delivery::queue::DEFAULT_QUEUE_CAPACITY;
use crate::platform::new_message::{DEFAULT_PARSE_ATTEMPTS, DEFAULT_STALE_AFTER};
use crate::platform::FetchOptions;
use crate::site::http::DEFAULT_USER_AGENT;
use crate::site::HttpSettings;
use crate::storage::{Subscription, WeightEntry};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Outbound HTTP settings
    pub http: HttpConfig,

    /// Scheduler behaviour
    pub scheduler: SchedulerConfig,

    /// Send queue settings
    pub delivery: DeliveryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Seed subscriptions
    pub subscriptions: Vec<Subscription>,

    /// Per-target weight configuration
    pub weights: Vec<WeightEntry>,
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// User agent string
    pub user_agent: String,

    /// Proxy URL applied to every client
    pub proxy: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            timeout_secs: 30,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whether browser-backed sites may run
    pub use_browser: bool,

    /// Emit nothing on the first poll of a target
    pub init_filter: bool,

    /// Items older than this are ignored until a target has a baseline
    pub init_filter_window_secs: u64,

    /// Log network failures at warn instead of debug
    pub show_network_warning: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            use_browser: false,
            init_filter: true,
            init_filter_window_secs: DEFAULT_STALE_AFTER.as_secs(),
            show_network_warning: true,
        }
    }
}

/// Delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Messages buffered before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// Subscriptions and weights cannot be given this way.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let user_agent =
            std::env::var("HERALD_USER_AGENT").unwrap_or(defaults.http.user_agent.clone());
        let proxy = std::env::var("HERALD_PROXY").ok().filter(|p| !p.is_empty());
        let timeout_secs =
            env_parse("HERALD_REQUEST_TIMEOUT").unwrap_or(defaults.http.timeout_secs);

        let scheduler = SchedulerConfig {
            use_browser: env_parse("HERALD_USE_BROWSER").unwrap_or(defaults.scheduler.use_browser),
            init_filter: env_parse("HERALD_INIT_FILTER").unwrap_or(defaults.scheduler.init_filter),
            init_filter_window_secs: env_parse("HERALD_INIT_FILTER_WINDOW")
                .unwrap_or(defaults.scheduler.init_filter_window_secs),
            show_network_warning: env_parse("HERALD_SHOW_NETWORK_WARNING")
                .unwrap_or(defaults.scheduler.show_network_warning),
        };

        let queue_capacity =
            env_parse("HERALD_QUEUE_CAPACITY").unwrap_or(defaults.delivery.queue_capacity);

        let level = std::env::var("HERALD_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));
        let format = std::env::var("HERALD_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            http: HttpConfig {
                user_agent,
                proxy,
                timeout_secs,
            },
            scheduler,
            delivery: DeliveryConfig { queue_capacity },
            logging: LoggingConfig { level, format },
            subscriptions: Vec::new(),
            weights: Vec::new(),
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.http.timeout_secs == 0 {
            anyhow::bail!("http.timeout_secs must be greater than 0");
        }

        if let Some(proxy) = &self.http.proxy {
            url::Url::parse(proxy).with_context(|| format!("Invalid proxy URL: {proxy}"))?;
        }

        if self.delivery.queue_capacity == 0 {
            anyhow::bail!("delivery.queue_capacity must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!(
                "logging.format must be 'text' or 'json', got '{}'",
                self.logging.format
            );
        }

        for sub in &self.subscriptions {
            if sub.platform.is_empty() {
                anyhow::bail!("subscription for {} has no platform", sub.recipient);
            }
        }

        for entry in &self.weights {
            for slot in &entry.weight.time_config {
                if slot.start_time >= slot.end_time {
                    anyhow::bail!(
                        "weight override for {}-{} has start {} not before end {}",
                        entry.platform,
                        entry.target,
                        slot.start_time.format("%H:%M"),
                        slot.end_time.format("%H:%M")
                    );
                }
            }
        }

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    /// Settings every HTTP client is built with
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            user_agent: self.http.user_agent.clone(),
            proxy: self.http.proxy.clone(),
            timeout: self.request_timeout(),
        }
    }

    /// Options of the list-diff strategy
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            init_filter: self.scheduler.init_filter,
            stale_after: Duration::from_secs(self.scheduler.init_filter_window_secs),
            parse_attempts: DEFAULT_PARSE_ATTEMPTS,
        }
    }
}
