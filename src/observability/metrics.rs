//! Metrics collection and exposition.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    if let Err(err) = PrometheusBuilder::new().with_http_listener(addr).install() {
        tracing::error!(error = %err, "failed to install Prometheus recorder");
        return;
    }
    tracing::info!(address = %addr, "metrics exporter listening");
}

/// Record one proxied request.
pub fn record_request(method: &str, status: u16, backend: &str, started: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("backend", backend.to_string()),
    ];

    counter!("balancer_requests_total", &labels).increment(1);
    histogram!("balancer_request_duration_seconds", &labels)
        .record(started.elapsed().as_secs_f64());
}

/// Update a backend's liveness gauge.
pub fn record_backend_health(backend: &str, healthy: bool) {
    let value = if healthy { 1.0 } else { 0.0 };
    gauge!("balancer_backend_alive", "backend" => backend.to_string()).set(value);
}
