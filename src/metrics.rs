//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Once;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("markstash_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");
    pub static ref HTTP_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "markstash_http_request_duration_seconds",
            "HTTP request duration in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "endpoint"]
    ).expect("metric can be created");

    // Bookmark Metrics
    pub static ref BOOKMARK_MUTATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("markstash_bookmark_mutations_total", "Total number of bookmark mutations"),
        &["operation"]
    ).expect("metric can be created");
    pub static ref BOOKMARK_LOADS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("markstash_bookmark_loads_total", "Total number of bookmark list loads"),
        &["status"]
    ).expect("metric can be created");

    // Realtime Metrics
    pub static ref REALTIME_EVENTS_PUBLISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("markstash_realtime_events_published_total", "Total number of change events published"),
        &["kind"]
    ).expect("metric can be created");
    pub static ref REALTIME_EVENTS_APPLIED: IntCounterVec = IntCounterVec::new(
        Opts::new("markstash_realtime_events_applied_total", "Total number of change events applied by subscribers"),
        &["status"]
    ).expect("metric can be created");
    pub static ref REALTIME_EVENTS_LAGGED: IntCounter = IntCounter::new(
        "markstash_realtime_events_lagged_total",
        "Total number of change events dropped for slow subscribers"
    ).expect("metric can be created");
    pub static ref REALTIME_SUBSCRIPTIONS_ACTIVE: IntGauge = IntGauge::new(
        "markstash_realtime_subscriptions_active",
        "Current number of open realtime subscriptions"
    ).expect("metric can be created");

    // Auth Metrics
    pub static ref SIGN_INS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("markstash_sign_ins_total", "Total number of sign-in attempts"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref SESSIONS_PURGED_TOTAL: IntCounter = IntCounter::new(
        "markstash_sessions_purged_total",
        "Total number of expired sessions removed"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("markstash_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(HTTP_REQUESTS_TOTAL.clone()),
            Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()),
            Box::new(BOOKMARK_MUTATIONS_TOTAL.clone()),
            Box::new(BOOKMARK_LOADS_TOTAL.clone()),
            Box::new(REALTIME_EVENTS_PUBLISHED.clone()),
            Box::new(REALTIME_EVENTS_APPLIED.clone()),
            Box::new(REALTIME_EVENTS_LAGGED.clone()),
            Box::new(REALTIME_SUBSCRIPTIONS_ACTIVE.clone()),
            Box::new(SIGN_INS_TOTAL.clone()),
            Box::new(SESSIONS_PURGED_TOTAL.clone()),
            Box::new(ERRORS_TOTAL.clone()),
        ];

        for collector in collectors {
            if let Err(error) = REGISTRY.register(collector) {
                tracing::error!(%error, "Failed to register metric");
            }
        }

        tracing::info!("Metrics registry initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();

        BOOKMARK_MUTATIONS_TOTAL
            .with_label_values(&["insert"])
            .inc();
        let families = REGISTRY.gather();
        assert!(
            families
                .iter()
                .any(|family| family.get_name() == "markstash_bookmark_mutations_total")
        );
    }
}
