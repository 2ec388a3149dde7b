//! Background maintenance: TTL reaping and size-triggered WAL compaction.

use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Cadence of the TTL reaper.
pub const REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// Cadence of the WAL size check.
pub const COMPACTION_CHECK_INTERVAL: Duration = Duration::from_secs(300);

/// WAL size above which a compaction is triggered.
pub const COMPACTION_THRESHOLD_BYTES: u64 = 64 * 1024 * 1024;

/// Periodically drop expired entries.
///
/// Bounds memory only; the read path already filters expired entries.
pub fn spawn_ttl_reaper(store: Arc<Store>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick is immediate
        loop {
            ticker.tick().await;
            let store = Arc::clone(&store);
            let removed = tokio::task::spawn_blocking(move || store.remove_expired()).await;
            match removed {
                Ok(n) if n > 0 => info!(removed = n, "ttl reaper pass"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "ttl reaper task failed"),
            }
        }
    })
}

/// Periodically compact the WAL once it crosses `threshold_bytes`.
pub fn spawn_compaction(
    store: Arc<Store>,
    interval: Duration,
    threshold_bytes: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if store.wal_size_bytes() < threshold_bytes {
                continue;
            }
            let store = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || store.compact()).await {
                Ok(Ok(reclaimed)) => info!(reclaimed_bytes = reclaimed, "compaction pass"),
                Ok(Err(e)) => error!(error = %e, "WAL compaction failed"),
                Err(e) => error!(error = %e, "compaction task failed"),
            }
        }
    })
}
