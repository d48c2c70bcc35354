//! Prometheus metrics for gateway observability.
//!
//! Metrics are exposed on a dedicated listener (`METRICS_PORT`, disabled
//! when unset or 0), separate from the proxied API.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_proxy_requests_total` - Forwarded requests (labels: service, method, status)
//! - `gateway_backend_errors_total` - Backend failures (labels: service, kind)
//! - `gateway_rate_limited_total` - Requests rejected by the rate limiter (label: class)
//! - `gateway_auth_failures_total` - Rejected bearer tokens (label: reason)
//!
//! ## Histograms
//! - `gateway_proxy_duration_seconds` - Time to backend response headers (label: service)
//!
//! ## Gauges
//! - `gateway_backend_up` - Last health probe result per service (1 = up, 0 = down)
//!
//! All recording functions are no-ops until [`init_metrics`] installs the
//! exporter.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const PROXY_REQUESTS_TOTAL: &str = "gateway_proxy_requests_total";
    pub const BACKEND_ERRORS_TOTAL: &str = "gateway_backend_errors_total";
    pub const RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
    pub const AUTH_FAILURES_TOTAL: &str = "gateway_auth_failures_total";
    pub const PROXY_DURATION_SECONDS: &str = "gateway_proxy_duration_seconds";
    pub const BACKEND_UP: &str = "gateway_backend_up";
}

/// Install the Prometheus exporter and describe all metrics.
///
/// # Errors
///
/// Returns a message if the exporter cannot bind or is already installed.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::PROXY_REQUESTS_TOTAL,
        "Total number of requests forwarded to backend services"
    );
    describe_counter!(
        names::BACKEND_ERRORS_TOTAL,
        "Total number of failed backend calls by failure kind"
    );
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of rejected bearer tokens"
    );
    describe_histogram!(
        names::PROXY_DURATION_SECONDS,
        "Time until backend response headers, in seconds"
    );
    describe_gauge!(
        names::BACKEND_UP,
        "Backend health probe result (1 = up, 0 = down)"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Proxy
// =============================================================================

/// Record a completed backend round trip.
pub fn record_proxy_request(service: &str, method: &str, status: u16, elapsed: Duration) {
    counter!(names::PROXY_REQUESTS_TOTAL, "service" => service.to_string(), "method" => method.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(names::PROXY_DURATION_SECONDS, "service" => service.to_string())
        .record(elapsed.as_secs_f64());
}

/// Record a backend failure. `kind` is one of `connect`, `timeout`, `protocol`.
pub fn record_backend_error(service: &str, kind: &str) {
    counter!(names::BACKEND_ERRORS_TOTAL, "service" => service.to_string(), "kind" => kind.to_string())
        .increment(1);
}

// =============================================================================
// Admission
// =============================================================================

pub fn record_rate_limited(class: &str) {
    counter!(names::RATE_LIMITED_TOTAL, "class" => class.to_string()).increment(1);
}

pub fn record_auth_failure(reason: &str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason.to_string()).increment(1);
}

// =============================================================================
// Health
// =============================================================================

pub fn record_backend_health(service: &str, up: bool) {
    gauge!(names::BACKEND_UP, "service" => service.to_string()).set(if up { 1.0 } else { 0.0 });
}
