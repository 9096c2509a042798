//! Metrics collection and export for reef.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use reef_core::PublishReport;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SESSIONS_TOTAL: &str = "reef_sessions_total";
    pub const SESSIONS_ACTIVE: &str = "reef_sessions_active";
    pub const MESSAGES_SUBMITTED: &str = "reef_messages_submitted_total";
    pub const FANOUT_DELIVERIES: &str = "reef_fanout_deliveries_total";
    pub const SINKS_DROPPED: &str = "reef_sinks_dropped_total";
    pub const CHANNELS_ACTIVE: &str = "reef_channels_active";
    pub const SUBMIT_LATENCY_SECONDS: &str = "reef_submit_latency_seconds";
    pub const ERRORS_TOTAL: &str = "reef_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SESSIONS_TOTAL,
        "Total number of stream sessions since server start"
    );
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of open stream sessions");
    metrics::describe_counter!(
        names::MESSAGES_SUBMITTED,
        "Total number of messages accepted"
    );
    metrics::describe_counter!(
        names::FANOUT_DELIVERIES,
        "Total number of message deliveries to live sessions"
    );
    metrics::describe_counter!(
        names::SINKS_DROPPED,
        "Total number of sessions dropped for falling behind"
    );
    metrics::describe_gauge!(
        names::CHANNELS_ACTIVE,
        "Current number of channels with live sessions"
    );
    metrics::describe_histogram!(
        names::SUBMIT_LATENCY_SECONDS,
        "Time from submit request to publish, in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an accepted message and its fan-out.
pub fn record_submit(report: Option<PublishReport>, seconds: f64) {
    counter!(names::MESSAGES_SUBMITTED).increment(1);
    histogram!(names::SUBMIT_LATENCY_SECONDS).record(seconds);
    if let Some(report) = report {
        counter!(names::FANOUT_DELIVERIES).increment(report.delivered as u64);
        counter!(names::SINKS_DROPPED).increment(report.dropped as u64);
    }
}

/// Update active channel count.
pub fn set_active_channels(count: usize) {
    gauge!(names::CHANNELS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that tracks one open stream session.
pub struct SessionMetricsGuard {
    transport: &'static str,
}

impl SessionMetricsGuard {
    /// Create a new metrics guard, recording a session.
    #[must_use]
    pub fn new(transport: &'static str) -> Self {
        counter!(names::SESSIONS_TOTAL, "transport" => transport).increment(1);
        gauge!(names::SESSIONS_ACTIVE, "transport" => transport).increment(1.0);
        Self { transport }
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::SESSIONS_ACTIVE, "transport" => self.transport).decrement(1.0);
    }
}
