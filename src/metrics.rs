/// Metrics and telemetry for the account coordinator
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Cache hit/miss rates
/// - Event publish outcomes
/// - Authentication failures
/// - Account, preference and device-token mutations

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_int_counter_vec, register_int_gauge, Encoder, Gauge, IntCounterVec,
    IntGauge, TextEncoder,
};

lazy_static! {
    // ========== Cache Metrics ==========

    /// Cache hits by cache type
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_hits_total",
        "Total number of cache hits",
        &["cache_type"]
    )
    .unwrap();

    /// Cache misses by cache type
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_misses_total",
        "Total number of cache misses",
        &["cache_type"]
    )
    .unwrap();

    /// Cache operations that failed and were swallowed
    pub static ref CACHE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_errors_total",
        "Total number of failed cache operations",
        &["operation"]
    )
    .unwrap();

    // ========== Event Metrics ==========

    /// Publish attempts by routing key and outcome
    pub static ref EVENTS_PUBLISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "events_published_total",
        "Total number of event publish attempts",
        &["routing_key", "outcome"]
    )
    .unwrap();

    /// Publishes currently in flight
    pub static ref EVENTS_IN_FLIGHT: IntGauge = register_int_gauge!(
        "events_in_flight",
        "Number of event publishes currently in flight"
    )
    .unwrap();

    /// 1 when the message bus is connected
    pub static ref EVENT_BUS_CONNECTED: IntGauge = register_int_gauge!(
        "event_bus_connected",
        "Whether the message bus is currently connected"
    )
    .unwrap();

    // ========== Auth Metrics ==========

    /// Authentication failures by mode and error kind
    pub static ref AUTH_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "auth_failures_total",
        "Total number of rejected authentication attempts",
        &["mode", "kind"]
    )
    .unwrap();

    // ========== Account Metrics ==========

    /// Mutations by entity and operation
    pub static ref ACCOUNT_MUTATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "account_mutations_total",
        "Total number of committed account-state mutations",
        &["entity", "operation"]
    )
    .unwrap();

    // ========== System Metrics ==========

    /// Application uptime in seconds
    pub static ref UPTIME_SECONDS: Gauge = register_gauge!(
        "uptime_seconds",
        "Application uptime in seconds"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record a cache access
pub fn record_cache_access(cache_type: &str, hit: bool) {
    if hit {
        CACHE_HITS_TOTAL.with_label_values(&[cache_type]).inc();
    } else {
        CACHE_MISSES_TOTAL.with_label_values(&[cache_type]).inc();
    }
}

/// Record a swallowed cache failure
pub fn record_cache_error(operation: &str) {
    CACHE_ERRORS_TOTAL.with_label_values(&[operation]).inc();
}

/// Record a publish attempt
pub fn record_event_publish(routing_key: &str, delivered: bool) {
    EVENTS_PUBLISHED_TOTAL
        .with_label_values(&[routing_key, if delivered { "delivered" } else { "dropped" }])
        .inc();
}

/// Record the current bus connectivity
pub fn set_event_bus_connected(connected: bool) {
    EVENT_BUS_CONNECTED.set(if connected { 1 } else { 0 });
}

/// Record a rejected authentication attempt
pub fn record_auth_failure(mode: &str, kind: &str) {
    AUTH_FAILURES_TOTAL.with_label_values(&[mode, kind]).inc();
}

/// Record a committed mutation
pub fn record_mutation(entity: &str, operation: &str) {
    ACCOUNT_MUTATIONS_TOTAL
        .with_label_values(&[entity, operation])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_cache_access() {
        record_cache_access("account", true);
        record_cache_access("account", false);
        let metrics = render_metrics();
        assert!(metrics.contains("cache_hits_total"));
        assert!(metrics.contains("cache_misses_total"));
    }

    #[test]
    fn test_record_event_publish() {
        record_event_publish("account.created", true);
        record_event_publish("account.created", false);
        let metrics = render_metrics();
        assert!(metrics.contains("events_published_total"));
        assert!(metrics.contains("dropped"));
    }

    #[test]
    fn test_metrics_rendering() {
        record_auth_failure("internal", "Unauthorized");
        record_mutation("account", "create");

        let metrics = render_metrics();

        assert!(metrics.contains("# HELP"));
        assert!(metrics.contains("# TYPE"));
        assert!(metrics.contains("auth_failures_total"));
        assert!(metrics.contains("account_mutations_total"));
    }
}
