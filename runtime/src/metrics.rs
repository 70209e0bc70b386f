//! Prometheus metrics for observability and monitoring.
//!
//! Metrics emitted by commitflow components:
//! - Commit serializer fetch/dispatch/persist flow
//! - Per-projector checkpoint position
//! - Retry attempts around checkpoint writes
//!
//! Recording is always on (the `metrics` facade is a no-op without a recorder).
//! [`MetricsServer::start`] installs a Prometheus recorder so the values can be
//! rendered for scraping.
//!
//! # Example
//!
//! ```rust,no_run
//! use commitflow_runtime::metrics::MetricsServer;
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

use metrics::{describe_counter, describe_gauge, describe_histogram};
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
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for the given scrape address.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// A recorder installed earlier in the process is tolerated (logged, not an error).
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
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
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Address metrics are meant to be scraped from.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "commitflow_commits_fetched_total",
        "Total number of commits fetched from the event store"
    );
    describe_counter!(
        "commitflow_commits_applied_total",
        "Total number of commits applied, by projector"
    );
    describe_counter!(
        "commitflow_commits_skipped_total",
        "Commits not delivered to a projector (already checkpointed or not interesting)"
    );
    describe_counter!(
        "commitflow_checkpoint_writes_total",
        "Successful checkpoint upserts, by projector"
    );
    describe_counter!(
        "commitflow_checkpoint_write_failures_total",
        "Checkpoint upserts that failed after all retries, by projector"
    );
    describe_gauge!(
        "commitflow_projector_checkpoint",
        "Last checkpoint token applied by each projector"
    );
    describe_histogram!(
        "commitflow_dispatch_duration_seconds",
        "Time from fetching a commit to persisting every projector's checkpoint"
    );
    describe_counter!(
        "commitflow_serializer_halted_total",
        "Number of times the commit serializer entered the halted state"
    );

    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!("retry_successes_total", "Operations that succeeded after retrying");
    describe_counter!(
        "retry_exhausted_total",
        "Operations that failed after exhausting their retry policy"
    );
}

/// Commit serializer metrics recorder.
pub struct SerializerMetrics;

impl SerializerMetrics {
    /// Record a commit fetched from the event store.
    pub fn record_fetch() {
        counter!("commitflow_commits_fetched_total").increment(1);
    }

    /// Record a commit applied by a projector.
    pub fn record_applied(projector: &str) {
        counter!("commitflow_commits_applied_total", "projector" => projector.to_string())
            .increment(1);
    }

    /// Record a commit a projector did not need.
    pub fn record_skipped(projector: &str) {
        counter!("commitflow_commits_skipped_total", "projector" => projector.to_string())
            .increment(1);
    }

    /// Record a successful checkpoint upsert and the new position.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_checkpoint(projector: &str, checkpoint: u64) {
        counter!("commitflow_checkpoint_writes_total", "projector" => projector.to_string())
            .increment(1);
        gauge!("commitflow_projector_checkpoint", "projector" => projector.to_string())
            .set(checkpoint as f64);
    }

    /// Record a checkpoint upsert that failed for good.
    pub fn record_checkpoint_failure(projector: &str) {
        counter!(
            "commitflow_checkpoint_write_failures_total",
            "projector" => projector.to_string()
        )
        .increment(1);
    }

    /// Record the full fetch-to-persist cycle of one commit.
    pub fn record_dispatch(duration: Duration) {
        histogram!("commitflow_dispatch_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record the serializer entering its halted state.
    pub fn record_halt() {
        counter!("commitflow_serializer_halted_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_server_has_no_handle() {
        let server = MetricsServer::new("127.0.0.1:9090".parse().unwrap());
        assert!(server.render().is_none());
        assert_eq!(server.addr().port(), 9090);
    }

    #[tokio::test]
    async fn serializer_metrics_are_rendered() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        SerializerMetrics::record_fetch();
        SerializerMetrics::record_applied("AccountBalances");
        SerializerMetrics::record_checkpoint("AccountBalances", 53);
        SerializerMetrics::record_dispatch(Duration::from_millis(4));

        // Another test may have installed the recorder first; values are still recorded.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("commitflow_commits_fetched_total"));
            assert!(rendered.contains("commitflow_projector_checkpoint"));
        }
    }
}
