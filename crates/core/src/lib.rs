//! Shared types for the CoralKV services.
//!
//! Everything that more than one service needs lives here:
//!
//! - **Error taxonomy**: the cross-service [`Error`] enum and [`Result`] alias
//! - **Identifiers**: [`NodeAddr`] (opaque storage-node endpoint)
//! - **Operation vocabulary**: [`Consistency`], [`StoreOp`]
//! - **Validation**: key length/content checks, TTL duration parsing
//! - **Wire types**: [`ReplicateRequest`], the gateway → coordinator contract
//! - **Runtime helpers**: wall-clock nanoseconds, termination-signal future

pub mod error;
pub mod signal;
pub mod time;
pub mod types;
pub mod wire;

pub use error::{Error, Result};
pub use signal::shutdown_signal;
pub use time::{parse_ttl, unix_nanos};
pub use types::{validate_key, Consistency, NodeAddr, StoreOp, MAX_KEY_LEN};
pub use wire::ReplicateRequest;
