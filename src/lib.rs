//! # CoralKV
//!
//! A multi-tenant distributed key-value store over HTTP: consistent-hash
//! sharding, WAL-backed storage nodes, asynchronous or quorum replication,
//! and an authenticating, rate-limiting gateway.
//!
//! # Architecture
//!
//! | Service | Crate | Role |
//! |---------|-------|------|
//! | Gateway | `coral-gateway` | Public API: auth, admission, routing, write orchestration |
//! | Storage node | `coral-node` | One shard: in-memory map + WAL + TTL + recovery |
//! | Replication coordinator | `coral-replicator` | Eventual queue + retries, strong quorum fan-out |
//!
//! The `coral-ring` crate maps each key onto its primary and replicas;
//! `coral-core` carries the shared vocabulary (errors, consistency levels,
//! wire types).
//!
//! # Data flow
//!
//! A `PUT /v1/kv/{key}` authenticates, passes the caller's token bucket,
//! writes the ring's primary node (which fsyncs a WAL record before
//! acknowledging), then hands the replica set to the coordinator — either
//! fire-and-forget (`eventual`) or blocking on a `⌊N/2⌋+1` replica quorum
//! (`strong`).
//!
//! This facade re-exports the public surface of each crate; the service
//! binaries live in their own crates.

pub use coral_core::{
    parse_ttl, unix_nanos, validate_key, Consistency, Error, NodeAddr, ReplicateRequest, Result,
    StoreOp, MAX_KEY_LEN,
};
pub use coral_gateway::{
    GatewayState, HttpIdentityProvider, IdentityProvider, KvWriteResponse, NoopUsageSink,
    RateLimiter, StaticIdentityProvider, UsageRecord, UsageSink, UserId,
};
pub use coral_node::{Entry, Store, Wal, WalRecord, WalRecordError};
pub use coral_replicator::{
    Coordinator, MetricsSnapshot, ReplicaClient, ReplicationTask, ReplicatorConfig, StrongOutcome,
};
pub use coral_ring::{HashRing, DEFAULT_REPLICATION_FACTOR, DEFAULT_VIRTUAL_POINTS};
