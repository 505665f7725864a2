//! Least-connection and least-response-time selection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::balancer::{BackendRecord, BalancerError, PickContext, Selector, Transition};
use crate::upstream::UpstreamClient;

/// Which per-client signal drives the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeastMode {
    /// Compare in-flight request counts; the scan short-circuits on the
    /// first backend that beats the hint. Connection counts churn per
    /// request, so settling for "better than the hint" keeps the scan
    /// short and avoids convoy effects.
    Connection,
    /// Compare average response times over the full vector, keeping the
    /// running minimum. Response-time drift is slow enough that the true
    /// minimum is worth the complete scan.
    ResponseTime,
}

/// Shared state for both least-X policies: a dense live vector plus a
/// hint cursor remembering the most recent winner.
pub struct Least {
    records: Vec<Arc<BackendRecord>>,
    servers: ArcSwap<Vec<Arc<UpstreamClient>>>,
    last_index: AtomicU32,
    mode: LeastMode,
}

impl Least {
    pub fn new(records: Vec<Arc<BackendRecord>>, mode: LeastMode) -> Self {
        let servers: Vec<_> = records.iter().map(|r| r.client.clone()).collect();
        Self {
            records,
            servers: ArcSwap::from_pointee(servers),
            last_index: AtomicU32::new(0),
            mode,
        }
    }

    fn record(&self, index: usize) -> Option<&Arc<BackendRecord>> {
        self.records.iter().find(|r| r.index == index)
    }

    fn next_by_connections(&self, servers: &[Arc<UpstreamClient>]) -> Arc<UpstreamClient> {
        // The cursor may lag a membership change; clamp instead of
        // trusting it.
        let hint = (self.last_index.load(Ordering::Acquire) as usize).min(servers.len() - 1);
        let mut winner = hint;

        for (i, candidate) in servers.iter().enumerate() {
            if candidate.pending_requests() < servers[winner].pending_requests() {
                winner = i;
                self.last_index.store(i as u32, Ordering::Release);
                break;
            }
        }
        servers[winner].clone()
    }

    fn next_by_response_time(&self, servers: &[Arc<UpstreamClient>]) -> Arc<UpstreamClient> {
        let hint = (self.last_index.load(Ordering::Acquire) as usize).min(servers.len() - 1);
        let mut winner = hint;

        for (i, candidate) in servers.iter().enumerate() {
            if candidate.avg_response_time() < servers[winner].avg_response_time() {
                winner = i;
                self.last_index.store(i as u32, Ordering::Release);
            }
        }
        servers[winner].clone()
    }
}

impl Selector for Least {
    fn policy(&self) -> &'static str {
        match self.mode {
            LeastMode::Connection => "least-connection",
            LeastMode::ResponseTime => "least-response-time",
        }
    }

    fn records(&self) -> &[Arc<BackendRecord>] {
        &self.records
    }

    fn pick(&self, _ctx: &PickContext) -> Arc<UpstreamClient> {
        let servers = self.servers.load();
        assert!(!servers.is_empty(), "all backends are down");
        match self.mode {
            LeastMode::Connection => self.next_by_connections(&servers),
            LeastMode::ResponseTime => self.next_by_response_time(&servers),
        }
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
        let len = next.len();
        self.servers.store(Arc::new(next));

        if self.last_index.load(Ordering::Acquire) as usize >= len {
            self.last_index.store(0, Ordering::Release);
        }

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
