//! Round-robin selection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::balancer::{BackendRecord, BalancerError, PickContext, Selector, Transition};
use crate::upstream::UpstreamClient;

/// Rotates through live backends with a monotonic counter. The counter
/// is not reset on membership changes; selection stays approximately
/// fair across the post-change window.
pub struct RoundRobin {
    records: Vec<Arc<BackendRecord>>,
    servers: ArcSwap<Vec<Arc<UpstreamClient>>>,
    counter: AtomicU64,
}

impl RoundRobin {
    pub fn new(records: Vec<Arc<BackendRecord>>) -> Self {
        let servers: Vec<_> = records.iter().map(|r| r.client.clone()).collect();
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

impl Selector for RoundRobin {
    fn policy(&self) -> &'static str {
        "round-robin"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::testutil::{pick_ctx, records};

    fn pick_addrs(selector: &RoundRobin, n: usize) -> Vec<String> {
        (0..n)
            .map(|_| selector.pick(&pick_ctx()).addr().to_string())
            .collect()
    }

    #[test]
    fn cycles_in_order() {
        let selector = RoundRobin::new(records(&["a:80", "b:80", "c:80"]));
        assert_eq!(
            pick_addrs(&selector, 6),
            vec!["a:80", "b:80", "c:80", "a:80", "b:80", "c:80"]
        );
    }

    #[test]
    fn distribution_is_fair() {
        let selector = RoundRobin::new(records(&["a:80", "b:80", "c:80"]));
        let mut counts = std::collections::HashMap::new();
        for addr in pick_addrs(&selector, 3 * 100) {
            *counts.entry(addr).or_insert(0) += 1;
        }
        for (_, count) in counts {
            assert_eq!(count, 100);
        }
    }

    #[test]
    fn downed_backend_is_never_picked() {
        let selector = RoundRobin::new(records(&["a:80", "b:80", "c:80"]));
        assert_eq!(selector.mark_down(1).unwrap(), Transition::Applied);

        for addr in pick_addrs(&selector, 20) {
            assert_ne!(addr, "b:80");
        }

        assert_eq!(selector.mark_up(1), Transition::Applied);
        assert!(pick_addrs(&selector, 20).contains(&"b:80".to_string()));
    }

    #[test]
    fn transitions_are_idempotent() {
        let selector = RoundRobin::new(records(&["a:80", "b:80"]));
        assert_eq!(selector.mark_down(0).unwrap(), Transition::Applied);
        assert_eq!(selector.mark_down(0).unwrap(), Transition::Unchanged);
        assert_eq!(selector.mark_up(0), Transition::Applied);
        assert_eq!(selector.mark_up(0), Transition::Unchanged);
        assert_eq!(selector.mark_down(9).unwrap(), Transition::Unchanged);
    }

    #[test]
    fn emptying_the_set_is_fatal() {
        let selector = RoundRobin::new(records(&["a:80", "b:80"]));
        selector.mark_down(0).unwrap();
        let err = selector.mark_down(1).unwrap_err();
        assert!(matches!(err, BalancerError::AllBackendsDown));
    }

    #[test]
    #[should_panic(expected = "all backends are down")]
    fn pick_on_empty_set_panics() {
        let selector = RoundRobin::new(records(&["a:80"]));
        let _ = selector.mark_down(0);
        selector.pick(&pick_ctx());
    }
}
