//! Prometheus metrics for checkout and fulfillment.
//!
//! - Checkout sessions created and failed (by reason)
//! - Payment notifications handled (by kind and result)
//! - Tickets issued and reversed, operator alerts raised
//! - Store retries
//!
//! # Example
//!
//! ```rust,no_run
//! use boxoffice_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! let text = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

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

/// Prometheus recorder plus the address its scrape endpoint is served on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for `addr` (e.g. `0.0.0.0:9090`).
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the scrape endpoint should listen on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Register metric descriptions and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed (several servers in one test binary) is not
    /// an error; [`handle`](Self::handle) then stays `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
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

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "checkout_sessions_created_total",
        "Payment sessions opened by the checkout builder"
    );
    describe_counter!(
        "checkout_failures_total",
        "Checkout requests that did not produce a session, by reason"
    );
    describe_histogram!(
        "checkout_duration_seconds",
        "Time taken to build a checkout session, gateway call included"
    );

    describe_counter!(
        "fulfillment_notifications_total",
        "Payment notifications handled, by kind and result"
    );
    describe_counter!(
        "fulfillment_tickets_issued_total",
        "Tickets issued by fulfillment"
    );
    describe_counter!(
        "fulfillment_tickets_reversed_total",
        "Tickets deleted by refund reversal"
    );
    describe_counter!(
        "fulfillment_alerts_raised_total",
        "Operator alerts raised, by kind"
    );
    describe_histogram!(
        "fulfillment_duration_seconds",
        "Time taken to handle one payment notification, retries included"
    );

    describe_counter!(
        "store_retries_total",
        "Store transactions re-run after a transient failure"
    );
    describe_counter!(
        "store_retry_recoveries_total",
        "Store transactions that committed after at least one retry"
    );
    describe_counter!(
        "store_retries_exhausted_total",
        "Store transactions abandoned with retries spent"
    );
}

/// Checkout metrics recorder.
pub struct CheckoutMetrics;

impl CheckoutMetrics {
    /// Record a created session.
    pub fn record_created(duration: Duration) {
        counter!("checkout_sessions_created_total").increment(1);
        histogram!("checkout_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed checkout.
    pub fn record_failure(reason: &'static str) {
        counter!("checkout_failures_total", "reason" => reason).increment(1);
    }
}

/// Fulfillment metrics recorder.
pub struct FulfillmentMetrics;

impl FulfillmentMetrics {
    /// Record a handled notification.
    pub fn record_notification(kind: &'static str, result: &'static str, duration: Duration) {
        counter!("fulfillment_notifications_total", "kind" => kind, "result" => result)
            .increment(1);
        histogram!("fulfillment_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record issued tickets.
    pub fn record_issued(count: usize) {
        counter!("fulfillment_tickets_issued_total").increment(count as u64);
    }

    /// Record reversed tickets.
    pub fn record_reversed(count: u64) {
        counter!("fulfillment_tickets_reversed_total").increment(count);
    }

    /// Record a raised operator alert.
    pub fn record_alert(kind: &'static str) {
        counter!("fulfillment_alerts_raised_total", "kind" => kind).increment(1);
    }
}

/// Store retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a transaction about to be re-run.
    pub fn record_attempt() {
        counter!("store_retries_total").increment(1);
    }

    /// Record a commit that needed retries.
    pub fn record_success() {
        counter!("store_retry_recoveries_total").increment(1);
    }

    /// Record a transaction given up on.
    pub fn record_exhausted() {
        counter!("store_retries_exhausted_total").increment(1);
    }
}
