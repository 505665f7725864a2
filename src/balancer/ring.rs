//! Consistent-hash ring.
//!
//! A sorted vector of `u32` keys plus a key → record map, published as
//! one RCU snapshot. Every backend contributes a fixed number of virtual
//! replicas so that membership changes remap only a small slice of the
//! key space. Mutation keeps the key vector ordered with binary-search
//! insertion and removal; there is no full re-sort.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::balancer::{fnv32, BackendRecord};

#[derive(Default)]
struct RingSnapshot {
    keys: Vec<u32>,
    nodes: HashMap<u32, Arc<BackendRecord>>,
}

pub struct HashRing {
    replicas: usize,
    snapshot: ArcSwap<RingSnapshot>,
}

impl HashRing {
    /// A ring placing `replicas` virtual entries per backend.
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            snapshot: ArcSwap::from_pointee(RingSnapshot::default()),
        }
    }

    /// Keys of one backend's virtual replicas:
    /// `fnv32(chr(index + i) || addr)` for `i` in `0..replicas`.
    fn replica_keys(&self, record: &BackendRecord) -> impl Iterator<Item = u32> + '_ {
        let index = record.index as u32;
        let addr = record.backend.url.clone();
        (0..self.replicas as u32).map(move |i| {
            let seed = char::from_u32(index + i).unwrap_or(char::REPLACEMENT_CHARACTER);
            fnv32(format!("{seed}{addr}").as_bytes())
        })
    }

    /// Insert one backend's replicas. Hash collisions overwrite silently;
    /// with `replicas = N²` for the expected fleet sizes the probability
    /// is negligible.
    pub fn add(&self, record: &Arc<BackendRecord>) {
        let current = self.snapshot.load_full();
        let mut keys = current.keys.clone();
        let mut nodes = current.nodes.clone();

        for key in self.replica_keys(record) {
            if nodes.insert(key, record.clone()).is_none() {
                let at = keys.partition_point(|k| *k < key);
                keys.insert(at, key);
            }
        }

        self.snapshot.store(Arc::new(RingSnapshot { keys, nodes }));
    }

    /// Remove one backend's replicas.
    pub fn remove(&self, record: &BackendRecord) {
        let current = self.snapshot.load_full();
        let mut keys = current.keys.clone();
        let mut nodes = current.nodes.clone();

        for key in self.replica_keys(record) {
            let owned = nodes
                .get(&key)
                .is_some_and(|node| node.index == record.index);
            if !owned {
                // A collision overwrote this replica; it belongs to
                // another backend now.
                continue;
            }
            nodes.remove(&key);
            if let Ok(at) = keys.binary_search(&key) {
                keys.remove(at);
            }
        }

        self.snapshot.store(Arc::new(RingSnapshot { keys, nodes }));
    }

    /// The record owning the smallest key `≥ hash`, wrapping to the
    /// start of the ring. `None` only when the ring is empty, which the
    /// selector invariants rule out on the hot path.
    pub fn lookup(&self, hash: u32) -> Option<Arc<BackendRecord>> {
        let snapshot = self.snapshot.load();
        if snapshot.keys.is_empty() {
            return None;
        }

        let mut at = snapshot.keys.partition_point(|k| *k < hash);
        if at == snapshot.keys.len() {
            at = 0;
        }
        snapshot.nodes.get(&snapshot.keys[at]).cloned()
    }

    /// Number of ring entries.
    pub fn len(&self) -> usize {
        self.snapshot.load().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn is_sorted(&self) -> bool {
        self.snapshot.load().keys.windows(2).all(|w| w[0] <= w[1])
    }
}
