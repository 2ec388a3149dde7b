//! In-memory key→value map with TTL, durably backed by the WAL.
//!
//! # Locking
//!
//! Two locks, one discipline:
//!
//! - `wal: Mutex<Wal>` serializes every mutation and owns the file handle.
//! - `map: RwLock<HashMap<..>>` gives reads shared access; mutations take
//!   it exclusively only for the in-memory apply.
//!
//! A mutation locks the WAL, appends + fsyncs, then locks the map and
//! applies. Because all mutations serialize through the WAL mutex, a later
//! SET/DELETE on a key observes every earlier one (per-node
//! linearizability), and a crash between fsync and apply loses nothing —
//! recovery replays the record. Reads never touch the WAL.

use crate::wal::{Wal, WalRecord};
use coral_core::{unix_nanos, validate_key, Result, StoreOp};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// A stored value with its lifecycle timestamps (all ns since epoch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Vec<u8>,
    pub created_at: u64,
    pub updated_at: u64,
    /// Absent means the entry never expires.
    pub expires_at: Option<u64>,
}

impl Entry {
    /// An entry is invisible from the instant `now >= expires_at`.
    pub fn is_expired(&self, now_ns: u64) -> bool {
        self.expires_at.is_some_and(|at| now_ns >= at)
    }
}

/// One node's key-value state: map + WAL.
pub struct Store {
    node_id: String,
    map: RwLock<HashMap<String, Entry>>,
    wal: Mutex<Wal>,
    /// Corrupted WAL regions skipped, at recovery or never (monotonic).
    skipped_corrupted: AtomicU64,
}

impl Store {
    /// Open a node's store, replaying its WAL before any request is served.
    ///
    /// Records expired as-of *now* (not as of their write time) are
    /// dropped during replay. A WAL that cannot be opened is a startup
    /// failure — the caller exits non-zero.
    pub fn open(node_id: impl Into<String>, data_dir: &Path) -> Result<Self> {
        let node_id = node_id.into();
        let path = Wal::path_for(data_dir, &node_id);

        let replay = Wal::replay(&path)?;
        let now = unix_nanos();
        let mut map = HashMap::new();
        let total = replay.records.len();
        for record in replay.records {
            match record.op {
                StoreOp::Set => {
                    if record.expires_at().is_some_and(|at| now >= at) {
                        continue;
                    }
                    let expires_at = record.expires_at();
                    map.insert(
                        record.key.clone(),
                        Entry {
                            value: record.value,
                            created_at: record.timestamp_ns,
                            updated_at: record.timestamp_ns,
                            expires_at,
                        },
                    );
                }
                StoreOp::Delete => {
                    map.remove(&record.key);
                }
            }
        }

        let wal = Wal::open(path)?;
        info!(
            node_id,
            replayed = total,
            live_keys = map.len(),
            skipped_corrupted = replay.skipped_corrupted,
            wal_size_bytes = wal.size_bytes(),
            "WAL recovery complete"
        );

        Ok(Store {
            node_id,
            map: RwLock::new(map),
            wal: Mutex::new(wal),
            skipped_corrupted: AtomicU64::new(replay.skipped_corrupted),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Store a value, overwriting unconditionally.
    ///
    /// The WAL record is synced to stable storage before the map changes;
    /// on append failure the request fails with no in-memory effect.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl_ns: Option<u64>) -> Result<()> {
        validate_key(key)?;
        let now = unix_nanos();
        let record = WalRecord::set(key.to_string(), value, ttl_ns, now);
        let expires_at = record.expires_at();

        let mut wal = self.wal.lock();
        wal.append(&record)?;

        let mut map = self.map.write();
        match map.get_mut(key) {
            Some(entry) => {
                entry.value = record.value;
                entry.updated_at = now;
                entry.expires_at = expires_at;
            }
            None => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: record.value,
                        created_at: now,
                        updated_at: now,
                        expires_at,
                    },
                );
            }
        }
        Ok(())
    }

    /// Look up a live value. Expired entries read as absent; their removal
    /// is left to the reaper.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = unix_nanos();
        let map = self.map.read();
        map.get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Delete a key. Returns whether a live entry was removed.
    ///
    /// The delete is WAL-logged even when the key is absent — replaying
    /// it twice is a no-op, and logging unconditionally keeps the write
    /// path uniform.
    pub fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let now = unix_nanos();
        let record = WalRecord::delete(key.to_string(), now);

        let mut wal = self.wal.lock();
        wal.append(&record)?;

        let mut map = self.map.write();
        let removed = map.remove(key);
        Ok(removed.is_some_and(|entry| !entry.is_expired(now)))
    }

    /// Live (non-expired) key count.
    pub fn key_count(&self) -> usize {
        let now = unix_nanos();
        let map = self.map.read();
        map.values().filter(|entry| !entry.is_expired(now)).count()
    }

    pub fn wal_size_bytes(&self) -> u64 {
        self.wal.lock().size_bytes()
    }

    pub fn skipped_corrupted(&self) -> u64 {
        self.skipped_corrupted.load(Ordering::Relaxed)
    }

    /// Drop every expired entry. Called by the TTL reaper; correctness
    /// never depends on it because reads already filter.
    pub fn remove_expired(&self) -> usize {
        let now = unix_nanos();
        let mut map = self.map.write();
        let before = map.len();
        map.retain(|_, entry| !entry.is_expired(now));
        let removed = before - map.len();
        if removed > 0 {
            debug!(removed, "reaped expired entries");
        }
        removed
    }

    /// Rewrite the WAL from the live entries.
    ///
    /// Holds the WAL mutex throughout, so mutations wait for the swap.
    /// Surviving entries are written as fresh SETs with their remaining
    /// TTL. Returns the bytes reclaimed.
    pub fn compact(&self) -> Result<u64> {
        let mut wal = self.wal.lock();
        let now = unix_nanos();

        let records: Vec<WalRecord> = {
            let map = self.map.read();
            map.iter()
                .filter(|(_, entry)| !entry.is_expired(now))
                .map(|(key, entry)| {
                    WalRecord::set(
                        key.clone(),
                        entry.value.clone(),
                        entry.expires_at.map(|at| at - now),
                        now,
                    )
                })
                .collect()
        };

        let old_size = wal.size_bytes();
        *wal = Wal::rewrite(wal.path(), &records)?;
        let reclaimed = old_size.saturating_sub(wal.size_bytes());
        info!(
            live = records.len(),
            reclaimed_bytes = reclaimed,
            "WAL compaction complete"
        );
        Ok(reclaimed)
    }
}
