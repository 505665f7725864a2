//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Config backends
//!     → initial health probe (failures logged and omitted permanently)
//!     → one UpstreamClient + BackendRecord per live backend
//!     → policy selector (round_robin / weighted / ip_hash / random / least)
//!
//! Per request: Selector::pick → UpstreamClient::forward
//! Background:  health prober → mark_down / mark_up
//! ```
//!
//! # Design Decisions
//! - Dense policy state lives behind RCU pointer swaps (`arc-swap`):
//!   the prober publishes a new vector, request tasks dereference once
//!   per pick and never observe a vector mid-move
//! - Records keep their original configuration index for a stable stats
//!   layout regardless of liveness
//! - A transition that empties the selectable set is surfaced as a typed
//!   fatal error, not a panic inside request handling

pub mod ip_hash;
pub mod least;
pub mod random;
pub mod ring;
pub mod round_robin;
pub mod weighted;

use std::hash::Hasher;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::config::{Backend, Config};
use crate::health::ProbeClient;
use crate::middleware::Pipeline;
use crate::upstream::{UpstreamClient, UpstreamStat};

pub use least::{Least, LeastMode};
pub use random::Random;
pub use round_robin::RoundRobin;
pub use weighted::WeightedRoundRobin;

/// Errors surfaced by balancer construction and membership changes.
#[derive(Debug, thiserror::Error)]
pub enum BalancerError {
    /// No backend passed the initial health probe.
    #[error("no available backends")]
    NoAvailableBackends,

    /// A membership change emptied the selectable set. Unrecoverable.
    #[error("all backends are down")]
    AllBackendsDown,

    #[error("unknown balancing type '{0}'")]
    UnknownPolicy(String),

    #[error("failed to build upstream client: {0}")]
    Client(String),
}

/// Outcome of a `mark_down`/`mark_up` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Membership changed.
    Applied,
    /// The backend was already in the requested state, or is unknown.
    Unchanged,
}

/// 32-bit FNV-1a, used for backend keys, ring replicas, and client IPs.
pub fn fnv32(bytes: &[u8]) -> u32 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(bytes);
    hasher.finish() as u32
}

/// Stable key of a backend: `fnv32(url || index)`.
pub fn record_key(url: &str, index: usize) -> u32 {
    fnv32(format!("{url}{index}").as_bytes())
}

/// Per-backend bookkeeping shared between a selector and the prober.
pub struct BackendRecord {
    pub client: Arc<UpstreamClient>,
    pub backend: Backend,
    /// Position in the original configuration order.
    pub index: usize,
    /// `fnv32(url || index)`.
    pub hash: u32,
    /// Effective weight (1 outside w-round-robin).
    pub weight: u32,
    alive: AtomicBool,
}

impl BackendRecord {
    pub fn new(backend: &Backend, index: usize, client: Arc<UpstreamClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            backend: backend.clone(),
            index,
            hash: record_key(&backend.url, index),
            weight: backend.weight.max(1),
            alive: AtomicBool::new(true),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Set liveness, returning the previous value.
    fn set_alive(&self, alive: bool) -> bool {
        self.alive.swap(alive, Ordering::AcqRel)
    }
}

/// Per-request inputs a policy may consult.
#[derive(Debug, Clone, Copy)]
pub struct PickContext {
    pub client_ip: IpAddr,
}

/// One backend's row in the stats output.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStat {
    #[serde(flatten)]
    pub stat: UpstreamStat,
    pub is_host_alive: bool,
    pub backend_hash: u32,
}

/// A policy-implementing selector.
///
/// `pick` must return exactly one live upstream client; it panics when
/// the selectable set is empty, a state the prober prevents by raising
/// [`BalancerError::AllBackendsDown`] on the emptying transition.
pub trait Selector: Send + Sync {
    /// Policy name, as configured.
    fn policy(&self) -> &'static str;

    /// Every record, in stable index order, regardless of liveness.
    fn records(&self) -> &[Arc<BackendRecord>];

    /// Choose the upstream client for one request.
    fn pick(&self, ctx: &PickContext) -> Arc<UpstreamClient>;

    /// Remove a backend from the selectable set.
    fn mark_down(&self, index: usize) -> Result<Transition, BalancerError>;

    /// Restore a backend to the selectable set.
    fn mark_up(&self, index: usize) -> Transition;

    /// Stats snapshot, ordered by the backend's configuration index.
    fn stats(&self) -> Vec<BackendStat> {
        self.records()
            .iter()
            .map(|record| BackendStat {
                stat: record.client.stat(),
                is_host_alive: record.is_alive(),
                backend_hash: record.hash,
            })
            .collect()
    }

    /// Release every upstream pool. Idempotent.
    fn close(&self) {
        for record in self.records() {
            record.client.close();
        }
    }
}

/// Probe every configured backend and build the configured policy over
/// the ones that answered. Backends failing the initial probe are logged
/// and omitted permanently.
pub async fn build_selector(
    config: &Config,
    pipeline: Option<Arc<Pipeline>>,
) -> Result<Arc<dyn Selector>, BalancerError> {
    let probe = ProbeClient::new();
    let mut records = Vec::new();

    for (index, backend) in config.backends.iter().enumerate() {
        if !probe.is_host_alive(&backend.health_check_url()).await {
            tracing::warn!(
                addr = %backend.url,
                "backend is not live, omitting from load balancing"
            );
            continue;
        }

        let client = UpstreamClient::new(backend, &config.custom_headers, pipeline.clone())
            .map_err(BalancerError::Client)?;
        records.push(BackendRecord::new(backend, index, Arc::new(client)));
        tracing::info!(addr = %backend.url, "backend registered for load balancing");
    }

    if records.is_empty() {
        return Err(BalancerError::NoAvailableBackends);
    }

    let selector: Arc<dyn Selector> = match config.balancer_type.as_str() {
        "round-robin" => Arc::new(RoundRobin::new(records)),
        "w-round-robin" => Arc::new(WeightedRoundRobin::new(records)),
        "ip-hash" => Arc::new(ip_hash::IpHash::new(records, config.backends.len())),
        "random" => Arc::new(Random::new(records)),
        "least-connection" => Arc::new(Least::new(records, LeastMode::Connection)),
        "least-response-time" => Arc::new(Least::new(records, LeastMode::ResponseTime)),
        other => return Err(BalancerError::UnknownPolicy(other.to_string())),
    };

    tracing::info!(
        policy = selector.policy(),
        backends = selector.records().len(),
        "balancer ready"
    );
    Ok(selector)
}
