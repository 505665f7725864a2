//! IP-hash selection over a consistent-hash ring.

use std::sync::Arc;

use crate::balancer::ring::HashRing;
use crate::balancer::{
    fnv32, BackendRecord, BalancerError, PickContext, Selector, Transition,
};
use crate::upstream::UpstreamClient;

/// Maps `hash(client_ip)` onto a consistent-hash ring with `N²` virtual
/// replicas per backend, so client → backend affinity survives
/// membership changes for all but a small slice of the IP space.
pub struct IpHash {
    records: Vec<Arc<BackendRecord>>,
    ring: HashRing,
}

impl IpHash {
    /// `configured_backends` is the full configured fleet size N; the
    /// ring places N² replicas per live backend.
    pub fn new(records: Vec<Arc<BackendRecord>>, configured_backends: usize) -> Self {
        let ring = HashRing::new(configured_backends * configured_backends);
        for record in &records {
            ring.add(record);
        }
        Self { records, ring }
    }

    fn record(&self, index: usize) -> Option<&Arc<BackendRecord>> {
        self.records.iter().find(|r| r.index == index)
    }
}

impl Selector for IpHash {
    fn policy(&self) -> &'static str {
        "ip-hash"
    }

    fn records(&self) -> &[Arc<BackendRecord>] {
        &self.records
    }

    fn pick(&self, ctx: &PickContext) -> Arc<UpstreamClient> {
        let hash = fnv32(ctx.client_ip.to_string().as_bytes());
        let record = self.ring.lookup(hash).expect("all backends are down");
        record.client.clone()
    }

    fn mark_down(&self, index: usize) -> Result<Transition, BalancerError> {
        let Some(record) = self.record(index) else {
            return Ok(Transition::Unchanged);
        };
        if !record.set_alive(false) {
            return Ok(Transition::Unchanged);
        }

        self.ring.remove(record);
        if self.ring.is_empty() {
            return Err(BalancerError::AllBackendsDown);
        }
        Ok(Transition::Applied)
    }

    fn mark_up(&self, index: usize) -> Transition {
        let Some(record) = self.record(index) else {
            return Transition::Unchanged;
        };
        if record.set_alive(true) {
            return Transition::Unchanged;
        }

        self.ring.add(record);
        Transition::Applied
    }
}
