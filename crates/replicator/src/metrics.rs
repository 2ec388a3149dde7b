//! Coordinator metrics: per-counter atomics plus a mutex-guarded sliding
//! window of task ack times.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Task completions retained for the ack-time average.
const ACK_WINDOW: usize = 1000;

#[derive(Debug, Default)]
pub struct ReplicatorMetrics {
    /// Tasks received, both modes.
    total_replications: AtomicU64,
    /// Per-replica successful applies.
    successful_replicas: AtomicU64,
    /// Per-replica failed applies (pre-retry).
    failed_replicas: AtomicU64,
    /// Tasks dropped after exhausting retries (or failing permanently).
    permanent_failures: AtomicU64,
    /// Tasks currently sitting in the queue.
    queue_size: AtomicUsize,
    /// Tasks waiting out a retry delay.
    retries_in_progress: AtomicU64,
    /// Completion latencies (enqueue → last replica ack), milliseconds.
    ack_times_ms: Mutex<VecDeque<u64>>,
    /// Slowest completion observed since start, milliseconds.
    max_lag_ms: AtomicU64,
}

/// Point-in-time view served by `GET /metrics`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_replications: u64,
    pub successful_replicas: u64,
    pub failed_replicas: u64,
    pub permanent_failures: u64,
    pub queue_size: usize,
    pub retries_in_progress: u64,
    pub average_ack_time_ms: f64,
    pub max_replication_lag_ms: u64,
}

impl ReplicatorMetrics {
    pub fn task_received(&self) {
        self.total_replications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn replica_succeeded(&self) {
        self.successful_replicas.fetch_add(1, Ordering::Relaxed);
    }

    pub fn replica_failed(&self) {
        self.failed_replicas.fetch_add(1, Ordering::Relaxed);
    }

    pub fn permanent_failure(&self) {
        self.permanent_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_inc(&self) {
        self.queue_size.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_dec(&self) {
        self.queue_size.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size.load(Ordering::Relaxed)
    }

    pub fn retry_scheduled(&self) {
        self.retries_in_progress.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry_released(&self) {
        self.retries_in_progress.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn retries_in_progress(&self) -> u64 {
        self.retries_in_progress.load(Ordering::Relaxed)
    }

    /// Record a fully-acked task: enqueue → last replica success.
    pub fn task_completed(&self, latency_ms: u64) {
        let mut window = self.ack_times_ms.lock();
        if window.len() == ACK_WINDOW {
            window.pop_front();
        }
        window.push_back(latency_ms);
        drop(window);
        self.max_lag_ms.fetch_max(latency_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let average_ack_time_ms = {
            let window = self.ack_times_ms.lock();
            if window.is_empty() {
                0.0
            } else {
                window.iter().sum::<u64>() as f64 / window.len() as f64
            }
        };
        MetricsSnapshot {
            total_replications: self.total_replications.load(Ordering::Relaxed),
            successful_replicas: self.successful_replicas.load(Ordering::Relaxed),
            failed_replicas: self.failed_replicas.load(Ordering::Relaxed),
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
            queue_size: self.queue_size(),
            retries_in_progress: self.retries_in_progress(),
            average_ack_time_ms,
            max_replication_lag_ms: self.max_lag_ms.load(Ordering::Relaxed),
        }
    }
}
