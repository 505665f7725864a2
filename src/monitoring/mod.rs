//! Monitoring surface.
//!
//! A small axum router on the monitoring address exposing the aggregated
//! per-backend counters (`GET /stats`) for the dashboard and the
//! `baton-cli` binary. The list is ordered by the backend's original
//! configuration index, regardless of liveness.

pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::balancer::Selector;

use self::handlers::{get_health, get_stats};

/// Shared state for the monitoring handlers.
#[derive(Clone)]
pub struct MonitoringState {
    pub selector: Arc<dyn Selector>,
    pub started_at: Instant,
}

pub fn router(state: MonitoringState) -> Router {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/healthz", get(get_health))
        .with_state(state)
}

/// Serve the monitoring endpoint until the shutdown signal fires.
pub async fn serve(
    listener: TcpListener,
    state: MonitoringState,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "monitoring endpoint listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
