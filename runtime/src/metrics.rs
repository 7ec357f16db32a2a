//! Prometheus metrics for observability and monitoring.
//!
//! Engine components record through the `metrics` facade; nothing is exported
//! until an application installs a recorder. [`MetricsServer`] installs the
//! Prometheus recorder and renders the scrape text.
//!
//! Recorded metrics:
//! - Commands handled, by aggregate type and outcome
//! - Events appended to the event log
//! - Restores and their duration
//! - Dispatcher deliveries and exhausted deliveries
//! - Projection outcomes (applied, duplicate, ignored, gap)
//!
//! # Example
//!
//! ```rust,no_run
//! use foldline_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder handle.
///
/// `addr` is where the application intends to serve the scrape endpoint; it
/// is only reported in logs.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder can be installed once per process. If one is already
    /// installed (e.g. by another test), this logs a warning and succeeds
    /// without a render handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "foldline_commands_total",
        "Commands handled, labelled by aggregate type and outcome"
    );
    describe_counter!(
        "foldline_events_appended_total",
        "Events appended to the event log"
    );
    describe_counter!(
        "foldline_publish_failures_total",
        "Committed event batches the event bus refused"
    );
    describe_histogram!(
        "foldline_command_duration_seconds",
        "Time taken to execute a command, lock wait included"
    );
    describe_counter!(
        "foldline_restores_total",
        "Aggregate restores, labelled by outcome"
    );
    describe_histogram!(
        "foldline_restore_duration_seconds",
        "Time taken to restore an aggregate from the event log"
    );
    describe_counter!(
        "foldline_deliveries_total",
        "Events delivered to handlers"
    );
    describe_counter!(
        "foldline_dispatch_failures_total",
        "Deliveries abandoned after retries or a permanent handler error"
    );
    describe_counter!(
        "foldline_projection_events_total",
        "Events seen by projection engines, labelled by outcome"
    );
}

/// Aggregate runtime metrics recorder.
pub struct CommandMetrics;

impl CommandMetrics {
    /// Record a handled command.
    pub fn record(aggregate_type: &'static str, outcome: &'static str, duration: Duration) {
        counter!("foldline_commands_total", "aggregate" => aggregate_type, "outcome" => outcome)
            .increment(1);
        histogram!("foldline_command_duration_seconds", "aggregate" => aggregate_type)
            .record(duration.as_secs_f64());
    }

    /// Record appended events.
    pub fn record_append(aggregate_type: &'static str, count: usize) {
        counter!("foldline_events_appended_total", "aggregate" => aggregate_type)
            .increment(count as u64);
    }

    /// Record a batch the bus refused after it was committed.
    pub fn record_publish_failure(aggregate_type: &'static str) {
        counter!("foldline_publish_failures_total", "aggregate" => aggregate_type).increment(1);
    }
}

/// Restore coordinator metrics recorder.
pub struct RestoreMetrics;

impl RestoreMetrics {
    /// Record a restore attempt.
    pub fn record(aggregate_type: &'static str, outcome: &'static str, duration: Duration) {
        counter!("foldline_restores_total", "aggregate" => aggregate_type, "outcome" => outcome)
            .increment(1);
        histogram!("foldline_restore_duration_seconds", "aggregate" => aggregate_type)
            .record(duration.as_secs_f64());
    }
}

/// Event dispatcher metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a successful delivery.
    pub fn record_delivery() {
        counter!("foldline_deliveries_total").increment(1);
    }

    /// Record an abandoned delivery.
    pub fn record_failure() {
        counter!("foldline_dispatch_failures_total").increment(1);
    }
}

/// Projection engine metrics recorder.
pub struct ProjectionMetrics;

impl ProjectionMetrics {
    /// Record the outcome of one event.
    pub fn record(projector: &'static str, outcome: &'static str) {
        counter!("foldline_projection_events_total", "projector" => projector, "outcome" => outcome)
            .increment(1);
    }
}
