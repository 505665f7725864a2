//! Uniform random selection.

use std::sync::Arc;

use arc_swap::ArcSwap;
use rand::Rng;

use crate::balancer::{BackendRecord, BalancerError, PickContext, Selector, Transition};
use crate::upstream::UpstreamClient;

pub struct Random {
    records: Vec<Arc<BackendRecord>>,
    servers: ArcSwap<Vec<Arc<UpstreamClient>>>,
}

impl Random {
    pub fn new(records: Vec<Arc<BackendRecord>>) -> Self {
        let servers: Vec<_> = records.iter().map(|r| r.client.clone()).collect();
        Self {
            records,
            servers: ArcSwap::from_pointee(servers),
        }
    }

    fn record(&self, index: usize) -> Option<&Arc<BackendRecord>> {
        self.records.iter().find(|r| r.index == index)
    }
}

impl Selector for Random {
    fn policy(&self) -> &'static str {
        "random"
    }

    fn records(&self) -> &[Arc<BackendRecord>] {
        &self.records
    }

    fn pick(&self, _ctx: &PickContext) -> Arc<UpstreamClient> {
        let servers = self.servers.load();
        assert!(!servers.is_empty(), "all backends are down");
        let k = rand::thread_rng().gen_range(0..servers.len());
        servers[k].clone()
    }

    fn mark_down(&self, index: usize) -> Result<Transition, BalancerError> {
        let Some(record) = self.record(index) else {
            return Ok(Transition::Unchanged);
        };
        if !record.set_alive(false) {
            return Ok(Transition::Unchanged);
        }

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
        next.push(record.client.clone());
        self.servers.store(Arc::new(next));
        Transition::Applied
    }
}
