//! Prometheus metrics for the telemetry backend
//!
//! Metrics live in the process-global registry and are exposed as text on
//! `/metrics` through [`gather_metrics`].

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec,
    TextEncoder,
};

lazy_static! {
    // === Ingestion ===

    /// Ingest requests by outcome
    pub static ref INGEST_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "telemetry_ingest_requests_total",
        "Total ingest requests by status",
        &["status"]
    ).unwrap();

    /// Series points by outcome (queued, direct, dropped, flushed, failed)
    pub static ref SERIES_POINTS_TOTAL: CounterVec = register_counter_vec!(
        "telemetry_series_points_total",
        "Total series points by outcome",
        &["outcome"]
    ).unwrap();

    // === Writer ===

    /// Flush latency
    pub static ref FLUSH_DURATION: Histogram = register_histogram!(
        "telemetry_flush_duration_seconds",
        "Series flush latency in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    /// Failed flushes
    pub static ref FLUSH_ERRORS_TOTAL: Counter = register_counter!(
        "telemetry_flush_errors_total",
        "Total failed series flushes"
    ).unwrap();

    /// Points waiting in the writer queue
    pub static ref WRITER_QUEUE_DEPTH: Gauge = register_gauge!(
        "telemetry_writer_queue_depth",
        "Series points currently queued for the writer"
    ).unwrap();

    // === HTTP ===

    /// Rejected requests
    pub static ref RATE_LIMITED_TOTAL: Counter = register_counter!(
        "telemetry_rate_limited_total",
        "Total requests rejected by the rate limiter"
    ).unwrap();

    /// Query latency by operation
    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "telemetry_query_duration_seconds",
        "Query latency in seconds",
        &["operation"],
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // === System Health ===

    /// Health status (0=unhealthy, 1=healthy)
    pub static ref HEALTH_STATUS: Gauge = register_gauge!(
        "telemetry_health_status",
        "System health status (0=unhealthy, 1=healthy)"
    ).unwrap();
}

/// Initialize metrics system
pub fn init() {
    HEALTH_STATUS.set(1.0);
    tracing::info!("Metrics system initialized");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record an ingest request outcome
#[inline]
pub fn record_ingest(status: &str) {
    INGEST_REQUESTS_TOTAL.with_label_values(&[status]).inc();
}

/// Record series points by outcome
#[inline]
pub fn record_points(outcome: &str, count: usize) {
    if count > 0 {
        SERIES_POINTS_TOTAL
            .with_label_values(&[outcome])
            .inc_by(count as f64);
    }
}

/// Record a flush
#[inline]
pub fn record_flush(duration_secs: f64, success: bool) {
    FLUSH_DURATION.observe(duration_secs);
    if !success {
        FLUSH_ERRORS_TOTAL.inc();
    }
}

/// Record a rate-limited request
#[inline]
pub fn record_rate_limited() {
    RATE_LIMITED_TOTAL.inc();
}

/// Record a query
#[inline]
pub fn record_query(operation: &str, duration_secs: f64) {
    QUERY_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

/// Update the writer queue depth
#[inline]
pub fn update_queue_depth(depth: usize) {
    WRITER_QUEUE_DEPTH.set(depth as f64);
}

/// Record the outcome of the latest health check
#[inline]
pub fn set_health(healthy: bool) {
    HEALTH_STATUS.set(if healthy { 1.0 } else { 0.0 });
}
