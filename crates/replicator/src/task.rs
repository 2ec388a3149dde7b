//! Replication task and coordinator tunables.

use coral_core::{NodeAddr, ReplicateRequest, StoreOp};
use std::time::{Duration, Instant};

/// Coordinator configuration.
///
/// `call_timeout` must stay strictly below `strong_deadline` so an
/// individual replica call can never outlive the quorum race that
/// spawned it.
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    /// Bounded queue capacity for eventual-mode tasks.
    pub queue_capacity: usize,
    /// Worker tasks draining the queue.
    pub workers: usize,
    /// Maximum retries per task.
    pub max_attempts: u32,
    /// Retry n waits `n × retry_base_delay`.
    pub retry_base_delay: Duration,
    /// Per-replica HTTP call timeout.
    pub call_timeout: Duration,
    /// Overall deadline for a strong-mode quorum.
    pub strong_deadline: Duration,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        ReplicatorConfig {
            queue_capacity: 1000,
            workers: 5,
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(2),
            call_timeout: Duration::from_secs(5),
            strong_deadline: Duration::from_secs(10),
        }
    }
}

/// One mutation to fan out to a key's replicas.
///
/// Strong-mode descriptors never enter the queue; they race to quorum
/// synchronously. Eventual-mode tasks cycle through the queue until they
/// succeed or exhaust `max_attempts`.
#[derive(Debug, Clone)]
pub struct ReplicationTask {
    pub key: String,
    pub op: StoreOp,
    /// Present for SET, absent for DELETE.
    pub value: Option<Vec<u8>>,
    pub ttl_ns: Option<u64>,
    pub replica_nodes: Vec<NodeAddr>,
    pub user_id: String,
    /// Retries consumed so far.
    pub attempts: u32,
    pub enqueued_at: Instant,
}

impl ReplicationTask {
    pub fn from_request(req: ReplicateRequest) -> Self {
        ReplicationTask {
            key: req.key,
            op: req.op,
            value: req.value,
            ttl_ns: req.ttl_ns,
            replica_nodes: req.replica_nodes.into_iter().map(NodeAddr::from).collect(),
            user_id: req.user_id,
            attempts: 0,
            enqueued_at: Instant::now(),
        }
    }
}
