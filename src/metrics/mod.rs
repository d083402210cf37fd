//! Prometheus metrics for herald schedulers
//!
//! This module tracks:
//! - Requests: fetch cycles per platform and site, with outcome and duration
//! - Delivery: posts handed to the send queue and time spent rendering them
//! - Credentials: which cookie was chosen for a site
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all scheduler metrics
struct HeraldMetrics {
    requests: CounterVec,
    request_duration: HistogramVec,
    sent: CounterVec,
    render_duration: HistogramVec,
    cookie_choose: CounterVec,
}

/// Global storage for scheduler metrics
static METRICS: OnceLock<HeraldMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once. If registration fails the error is returned
/// and every recording function below stays a no-op.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = herald::metrics::init_metrics() {
///     tracing::warn!(error = %e, "Metrics initialization failed");
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = HeraldMetrics {
        requests: register_counter_vec!(
            "herald_requests_total",
            "Total fetch cycles by platform, site and outcome",
            &["platform", "site", "success"]
        )?,
        request_duration: register_histogram_vec!(
            "herald_request_duration_seconds",
            "Duration of one fetch cycle in seconds",
            &["platform", "site"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
        )?,
        sent: register_counter_vec!(
            "herald_sent_total",
            "Total posts handed to the send queue",
            &["platform", "site"]
        )?,
        render_duration: register_histogram_vec!(
            "herald_render_duration_seconds",
            "Time spent rendering one post in seconds",
            &["platform", "site"],
            vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
        )?,
        cookie_choose: register_counter_vec!(
            "herald_cookie_choose_total",
            "Times a cookie was chosen for a request",
            &["site", "cookie_id"]
        )?,
    };

    METRICS
        .set(metrics)
        .map_err(|_| "Herald metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn gather_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record the outcome and duration of one fetch cycle
pub fn record_request(platform: &str, site: &str, success: bool, duration_secs: f64) {
    let Some(m) = METRICS.get() else {
        return;
    };

    let success = if success { "true" } else { "false" };
    m.requests
        .with_label_values(&[platform, site, success])
        .inc();
    m.request_duration
        .with_label_values(&[platform, site])
        .observe(duration_secs);
}

/// Record posts handed to the send queue
pub fn record_sent(platform: &str, site: &str, count: u64) {
    if count == 0 {
        return;
    }
    if let Some(m) = METRICS.get() {
        m.sent
            .with_label_values(&[platform, site])
            .inc_by(count as f64);
    }
}

/// Record that a cookie was chosen
pub fn record_cookie_choose(site: &str, cookie_id: u64) {
    if let Some(m) = METRICS.get() {
        let id = cookie_id.to_string();
        m.cookie_choose.with_label_values(&[site, &id]).inc();
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a render timer (records when dropped)
pub fn start_render_timer(platform: &str, site: &str) -> MetricsTimer {
    match METRICS.get() {
        Some(m) => MetricsTimer::new(
            m.render_duration
                .with_label_values(&[platform, site])
                .start_timer(),
        ),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
