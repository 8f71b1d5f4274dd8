//! Prometheus Metrics Module
//!
//! Provides application-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - HTTP request counts by method, path, and status
//! - HTTP request latency histograms
//! - Active WebSocket connection gauge
//! - Dispatched inbound frame counts by type and outcome
//! - Outbound event counts by type
//! - Write-behind buffer depth and flush counters

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// HTTP request counter - tracks total requests by method, path, and status code
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests").namespace("chat_relay"),
        &["method", "path", "status"],
    )
    .expect("Failed to create HTTP_REQUESTS_TOTAL metric")
});

/// HTTP request latency histogram - tracks request duration in seconds
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
    HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        )
        .namespace("chat_relay")
        .buckets(buckets),
        &["method", "path"],
    )
    .expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric")
});

/// Active WebSocket connections gauge
pub static CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "websocket_connections_active",
            "Number of active WebSocket connections",
        )
        .namespace("chat_relay"),
    )
    .expect("Failed to create CONNECTIONS_ACTIVE metric")
});

/// Inbound frame counter by message type and outcome ("ok", "error", "unknown")
pub static FRAMES_DISPATCHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "frames_dispatched_total",
            "Total inbound WebSocket frames dispatched",
        )
        .namespace("chat_relay"),
        &["type", "outcome"],
    )
    .expect("Failed to create FRAMES_DISPATCHED_TOTAL metric")
});

/// Outbound event counter by event type
pub static EVENTS_SENT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("events_sent_total", "Total outbound WebSocket events sent")
            .namespace("chat_relay"),
        &["type"],
    )
    .expect("Failed to create EVENTS_SENT_TOTAL metric")
});

/// Current write-behind message buffer depth
pub static BUFFER_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "message_buffer_depth",
            "Messages currently held in the write-behind buffer",
        )
        .namespace("chat_relay"),
    )
    .expect("Failed to create BUFFER_DEPTH metric")
});

/// Buffer flush counter by result ("flushed", "failed")
pub static BUFFER_FLUSHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "message_buffer_flushed_total",
            "Messages drained from the write-behind buffer",
        )
        .namespace("chat_relay"),
        &["result"],
    )
    .expect("Failed to create BUFFER_FLUSHED_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("Failed to register HTTP_REQUESTS_TOTAL");
    registry
        .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
        .expect("Failed to register HTTP_REQUEST_DURATION_SECONDS");
    registry
        .register(Box::new(CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(FRAMES_DISPATCHED_TOTAL.clone()))
        .expect("Failed to register FRAMES_DISPATCHED_TOTAL");
    registry
        .register(Box::new(EVENTS_SENT_TOTAL.clone()))
        .expect("Failed to register EVENTS_SENT_TOTAL");
    registry
        .register(Box::new(BUFFER_DEPTH.clone()))
        .expect("Failed to register BUFFER_DEPTH");
    registry
        .register(Box::new(BUFFER_FLUSHED_TOTAL.clone()))
        .expect("Failed to register BUFFER_FLUSHED_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Metrics should be valid UTF-8")
}

/// Helper to record HTTP request metrics
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

/// Helper to record a dispatched inbound frame
pub fn record_frame_dispatched(message_type: &str, outcome: &str) {
    FRAMES_DISPATCHED_TOTAL
        .with_label_values(&[message_type, outcome])
        .inc();
}

/// Helper to record a batch of outbound event deliveries
pub fn record_events_sent(event_type: &str, count: u64) {
    EVENTS_SENT_TOTAL
        .with_label_values(&[event_type])
        .inc_by(count);
}
