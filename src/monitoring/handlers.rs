//! Monitoring endpoint handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::balancer::BackendStat;
use crate::monitoring::MonitoringState;

/// Process-level snapshot combined with the per-backend list.
#[derive(Serialize)]
pub struct StatsReport {
    pub process: ProcessStats,
    pub backends: Vec<BackendStat>,
}

#[derive(Serialize)]
pub struct ProcessStats {
    pub version: &'static str,
    pub policy: &'static str,
    pub uptime_secs: u64,
    pub total_request_count: u64,
    pub live_backends: usize,
    pub configured_backends: usize,
}

pub async fn get_stats(State(state): State<MonitoringState>) -> Json<StatsReport> {
    let backends = state.selector.stats();

    let process = ProcessStats {
        version: env!("CARGO_PKG_VERSION"),
        policy: state.selector.policy(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        total_request_count: backends.iter().map(|b| b.stat.total_req_count).sum(),
        live_backends: backends.iter().filter(|b| b.is_host_alive).count(),
        configured_backends: backends.len(),
    };

    Json(StatsReport { process, backends })
}

pub async fn get_health() -> &'static str {
    "ok"
}
