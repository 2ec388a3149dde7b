//! Consistent-hash ring: key → ordered list of responsible nodes.
//!
//! Each physical node contributes [`DEFAULT_VIRTUAL_POINTS`] virtual points
//! to smooth the distribution. Placement hashes with XXH3-64, which is
//! deterministic across processes — every service that builds a ring from
//! the same node list computes the same replica sets, so the hash choice
//! is part of the wire contract.
//!
//! # Concurrency
//!
//! Copy-on-write. Readers clone an `Arc` snapshot of the sorted point
//! array and walk it without holding any lock; `add`/`remove` rebuild a
//! fresh snapshot and swap it in, so mutations appear atomic to
//! concurrent `locate` calls.

use coral_core::NodeAddr;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

/// Virtual points contributed by each physical node.
pub const DEFAULT_VIRTUAL_POINTS: usize = 150;

/// Default replication fanout for `locate` (primary + replicas).
pub const DEFAULT_REPLICATION_FACTOR: usize = 3;

/// One virtual point on the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RingPoint {
    hash: u64,
    node: NodeAddr,
}

/// Immutable ring snapshot: the sorted virtual-point array plus the
/// physical node set it was built from.
#[derive(Debug, Default)]
struct RingState {
    /// Sorted by `(hash, node)`; the node string breaks hash ties.
    points: Vec<RingPoint>,
    nodes: BTreeSet<NodeAddr>,
}

impl RingState {
    fn build(nodes: BTreeSet<NodeAddr>, virtual_points: usize) -> Self {
        let mut points = Vec::with_capacity(nodes.len() * virtual_points);
        for node in &nodes {
            for i in 0..virtual_points {
                points.push(RingPoint {
                    hash: point_hash(node, i),
                    node: node.clone(),
                });
            }
        }
        points.sort_unstable_by(|a, b| a.hash.cmp(&b.hash).then_with(|| a.node.cmp(&b.node)));
        RingState { points, nodes }
    }

    /// Walk clockwise from the first point at or after `hash`, wrapping,
    /// collecting distinct physical nodes.
    fn locate(&self, hash: u64, k: usize) -> Vec<NodeAddr> {
        let want = k.min(self.nodes.len());
        let mut found: Vec<NodeAddr> = Vec::with_capacity(want);
        if want == 0 {
            return found;
        }

        let start = self.points.partition_point(|p| p.hash < hash);
        for i in 0..self.points.len() {
            let point = &self.points[(start + i) % self.points.len()];
            if !found.contains(&point.node) {
                found.push(point.node.clone());
                if found.len() == want {
                    break;
                }
            }
        }
        found
    }
}

/// Hash position of virtual point `i` for `node`.
fn point_hash(node: &NodeAddr, i: usize) -> u64 {
    xxh3_64(format!("{}#{}", node, i).as_bytes())
}

/// Hash position of a key.
fn key_hash(key: &str) -> u64 {
    xxh3_64(key.as_bytes())
}

/// Consistent-hash ring over a set of physical nodes.
pub struct HashRing {
    state: RwLock<Arc<RingState>>,
    virtual_points: usize,
    replication_factor: usize,
}

impl HashRing {
    /// Build a ring from `nodes` with explicit virtual-point and
    /// replication-fanout settings. Duplicate nodes collapse.
    pub fn new<I>(nodes: I, virtual_points: usize, replication_factor: usize) -> Self
    where
        I: IntoIterator<Item = NodeAddr>,
    {
        let state = RingState::build(nodes.into_iter().collect(), virtual_points);
        HashRing {
            state: RwLock::new(Arc::new(state)),
            virtual_points,
            replication_factor,
        }
    }

    /// Build a ring with the standard V=150 / K=3 settings.
    pub fn with_defaults<I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = NodeAddr>,
    {
        Self::new(nodes, DEFAULT_VIRTUAL_POINTS, DEFAULT_REPLICATION_FACTOR)
    }

    fn snapshot(&self) -> Arc<RingState> {
        Arc::clone(&self.state.read())
    }

    /// The first `min(k, |nodes|)` distinct physical nodes clockwise from
    /// the key's hash. Deterministic for a fixed node set.
    pub fn locate(&self, key: &str, k: usize) -> Vec<NodeAddr> {
        self.snapshot().locate(key_hash(key), k)
    }

    /// The node that receives the initial write for `key`.
    pub fn primary(&self, key: &str) -> Option<NodeAddr> {
        self.locate(key, 1).into_iter().next()
    }

    /// Add a node. Idempotent; visible atomically to subsequent `locate`s.
    pub fn add(&self, node: NodeAddr) {
        let mut guard = self.state.write();
        if guard.nodes.contains(&node) {
            return;
        }
        let mut nodes = guard.nodes.clone();
        nodes.insert(node);
        *guard = Arc::new(RingState::build(nodes, self.virtual_points));
    }

    /// Remove a node. Idempotent; visible atomically to subsequent `locate`s.
    pub fn remove(&self, node: &NodeAddr) {
        let mut guard = self.state.write();
        if !guard.nodes.contains(node) {
            return;
        }
        let mut nodes = guard.nodes.clone();
        nodes.remove(node);
        *guard = Arc::new(RingState::build(nodes, self.virtual_points));
    }

    /// Snapshot of the current physical node set.
    pub fn all(&self) -> Vec<NodeAddr> {
        self.snapshot().nodes.iter().cloned().collect()
    }

    /// Number of physical nodes.
    pub fn len(&self) -> usize {
        self.snapshot().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The fanout `locate` uses when the gateway asks for a full replica set.
    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }
}
