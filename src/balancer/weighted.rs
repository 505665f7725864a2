//! Weighted round-robin selection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use rand::seq::SliceRandom;

use crate::balancer::{BackendRecord, BalancerError, PickContext, Selector, Transition};
use crate::upstream::UpstreamClient;

/// Round-robin over a vector in which every backend appears `weight`
/// times, shuffled once at construction so equal-weight neighbours do
/// not cluster. Mark-down removes all of a backend's copies in a single
/// operation; mark-up re-appends them and reshuffles.
pub struct WeightedRoundRobin {
    records: Vec<Arc<BackendRecord>>,
    servers: ArcSwap<Vec<Arc<UpstreamClient>>>,
    counter: AtomicU64,
}

impl WeightedRoundRobin {
    pub fn new(records: Vec<Arc<BackendRecord>>) -> Self {
        let mut servers = Vec::new();
        for record in &records {
            for _ in 0..record.weight {
                servers.push(record.client.clone());
            }
        }
        servers.shuffle(&mut rand::thread_rng());

        Self {
            records,
            servers: ArcSwap::from_pointee(servers),
            counter: AtomicU64::new(0),
        }
    }

    fn record(&self, index: usize) -> Option<&Arc<BackendRecord>> {
        self.records.iter().find(|r| r.index == index)
    }
}

impl Selector for WeightedRoundRobin {
    fn policy(&self) -> &'static str {
        "w-round-robin"
    }

    fn records(&self) -> &[Arc<BackendRecord>] {
        &self.records
    }

    fn pick(&self, _ctx: &PickContext) -> Arc<UpstreamClient> {
        let servers = self.servers.load();
        assert!(!servers.is_empty(), "all backends are down");
        let v = self.counter.fetch_add(1, Ordering::Relaxed);
        servers[(v % servers.len() as u64) as usize].clone()
    }

    fn mark_down(&self, index: usize) -> Result<Transition, BalancerError> {
        let Some(record) = self.record(index) else {
            return Ok(Transition::Unchanged);
        };
        if !record.set_alive(false) {
            return Ok(Transition::Unchanged);
        }

        // Drops every copy at once; removing fewer would skew the
        // remaining weights.
        let current = self.servers.load_full();
        let next: Vec<_> = current
            .iter()
            .filter(|client| !Arc::ptr_eq(client, &record.client))
            .cloned()
            .collect();
        let emptied = next.is_empty();
        self.servers.store(Arc::new(next));

        if emptied {
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

        let current = self.servers.load_full();
        let mut next = (*current).clone();
        for _ in 0..record.weight {
            next.push(record.client.clone());
        }
        next.shuffle(&mut rand::thread_rng());
        self.servers.store(Arc::new(next));
        Transition::Applied
    }
}
