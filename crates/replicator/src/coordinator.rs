//! The replication coordinator: eventual-mode queue + workers + retry,
//! and the strong-mode quorum race.
//!
//! # Eventual mode
//!
//! Tasks land in a bounded channel; a full channel rejects immediately
//! (the system's backpressure signal, surfaced as 503). A fixed worker
//! pool drains it — sequential across a task's replicas, parallel across
//! tasks. Failed tasks re-enter through a retry channel whose worker
//! spawns one timed task per retry, so no worker ever sleeps out a delay.
//!
//! # Strong mode
//!
//! No queue. All replica calls start concurrently and the caller returns
//! the moment `⌊N/2⌋+1` acks arrive; stragglers keep running best-effort
//! and show up only in metrics. On deadline the in-flight calls are
//! aborted.

use crate::client::{ReplicaClient, ReplicaError};
use crate::metrics::ReplicatorMetrics;
use crate::task::{ReplicationTask, ReplicatorConfig};
use coral_core::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

/// Outcome of a strong-mode fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrongOutcome {
    /// A strict majority of replicas acked.
    Quorum { acks: usize, required: usize },
    /// Every replica answered but the majority never materialized.
    QuorumFailed { acks: usize, replicas: usize },
    /// The deadline expired first.
    DeadlineExceeded { acks: usize },
}

pub struct Coordinator {
    config: ReplicatorConfig,
    client: ReplicaClient,
    metrics: Arc<ReplicatorMetrics>,
    queue_tx: mpsc::Sender<ReplicationTask>,
    shutdown_tx: watch::Sender<bool>,
}

impl Coordinator {
    /// Spawn the worker pool and retry worker, returning a handle for the
    /// HTTP layer.
    pub fn start(config: ReplicatorConfig, client: ReplicaClient) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let metrics = Arc::new(ReplicatorMetrics::default());

        let shared_rx = Arc::new(Mutex::new(queue_rx));
        for worker_id in 0..config.workers {
            tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&shared_rx),
                client.clone(),
                Arc::clone(&metrics),
                retry_tx.clone(),
                config.clone(),
                shutdown_rx.clone(),
            ));
        }
        tokio::spawn(retry_loop(
            retry_rx,
            queue_tx.clone(),
            Arc::clone(&metrics),
            config.clone(),
            shutdown_rx,
        ));
        // The workers hold the only retry senders: when the last worker
        // exits, the retry channel closes and its worker follows.
        drop(retry_tx);

        Arc::new(Coordinator {
            config,
            client,
            metrics,
            queue_tx,
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &ReplicatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ReplicatorMetrics {
        &self.metrics
    }

    /// Enqueue an eventual-mode task. A full queue fails immediately —
    /// callers surface it as 503 and never block.
    pub fn submit_eventual(&self, task: ReplicationTask) -> Result<()> {
        self.metrics.task_received();
        match self.queue_tx.try_send(task) {
            Ok(()) => {
                self.metrics.queue_inc();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(Error::Unavailable("replication queue full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::Unavailable("coordinator is shut down".into()))
            }
        }
    }

    /// Fan out a strong-mode task and race for quorum.
    pub async fn replicate_strong(&self, task: ReplicationTask) -> StrongOutcome {
        self.metrics.task_received();
        let replicas = task.replica_nodes.clone();
        let n = replicas.len();
        if n == 0 {
            return StrongOutcome::Quorum {
                acks: 0,
                required: 0,
            };
        }
        let required = n / 2 + 1;
        let started = Instant::now();

        let task = Arc::new(task);
        let (ack_tx, mut ack_rx) = mpsc::channel(n);
        let mut handles = Vec::with_capacity(n);
        for replica in replicas {
            let ack_tx = ack_tx.clone();
            let client = self.client.clone();
            let metrics = Arc::clone(&self.metrics);
            let task = Arc::clone(&task);
            handles.push(tokio::spawn(async move {
                let ok = match client.apply(&replica, &task).await {
                    Ok(()) => {
                        metrics.replica_succeeded();
                        true
                    }
                    Err(e) => {
                        metrics.replica_failed();
                        warn!(key = task.key, %replica, error = %e, "strong-mode replica call failed");
                        false
                    }
                };
                let _ = ack_tx.send(ok).await;
            }));
        }
        drop(ack_tx);

        let deadline = tokio::time::Instant::now() + self.config.strong_deadline;
        let mut acks = 0;
        let mut received = 0;
        loop {
            match tokio::time::timeout_at(deadline, ack_rx.recv()).await {
                Ok(Some(ok)) => {
                    received += 1;
                    if ok {
                        acks += 1;
                        if acks >= required {
                            // Stragglers keep running; their outcomes land
                            // in metrics only.
                            self.metrics
                                .task_completed(started.elapsed().as_millis() as u64);
                            debug!(key = task.key, acks, required, "strong quorum reached");
                            return StrongOutcome::Quorum { acks, required };
                        }
                    }
                    if received == n {
                        return StrongOutcome::QuorumFailed { acks, replicas: n };
                    }
                }
                Ok(None) => {
                    return StrongOutcome::QuorumFailed { acks, replicas: n };
                }
                Err(_) => {
                    for handle in &handles {
                        handle.abort();
                    }
                    warn!(key = task.key, acks, required, "strong quorum deadline exceeded");
                    return StrongOutcome::DeadlineExceeded { acks };
                }
            }
        }
    }

    /// Stop the workers. Each finishes the task in hand; queued tasks are
    /// dropped (they are eventual by definition).
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn worker_loop(
    worker_id: usize,
    queue_rx: Arc<Mutex<mpsc::Receiver<ReplicationTask>>>,
    client: ReplicaClient,
    metrics: Arc<ReplicatorMetrics>,
    retry_tx: mpsc::UnboundedSender<ReplicationTask>,
    config: ReplicatorConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let task = {
            let mut queue = queue_rx.lock().await;
            tokio::select! {
                _ = shutdown_rx.changed() => None,
                task = queue.recv() => task,
            }
        };
        let Some(task) = task else { break };
        metrics.queue_dec();
        process_task(task, &client, &metrics, &retry_tx, &config).await;
    }
    debug!(worker_id, "replication worker stopped");
}

/// Fan a task out to its replicas sequentially and classify the result.
async fn process_task(
    mut task: ReplicationTask,
    client: &ReplicaClient,
    metrics: &ReplicatorMetrics,
    retry_tx: &mpsc::UnboundedSender<ReplicationTask>,
    config: &ReplicatorConfig,
) {
    let mut retryable = false;
    let mut failed = false;
    for replica in &task.replica_nodes {
        match client.apply(replica, &task).await {
            Ok(()) => metrics.replica_succeeded(),
            Err(e) => {
                metrics.replica_failed();
                failed = true;
                if matches!(e, ReplicaError::Retryable(_)) {
                    retryable = true;
                }
                warn!(
                    key = task.key,
                    %replica,
                    attempts = task.attempts,
                    error = %e,
                    "replica apply failed"
                );
            }
        }
    }

    if !failed {
        metrics.task_completed(task.enqueued_at.elapsed().as_millis() as u64);
        return;
    }
    if !retryable {
        // Only 4xx failures: retrying the identical request cannot help.
        metrics.permanent_failure();
        return;
    }
    if task.attempts < config.max_attempts {
        task.attempts += 1;
        metrics.retry_scheduled();
        if retry_tx.send(task).is_err() {
            metrics.retry_released();
            metrics.permanent_failure();
        }
    } else {
        metrics.permanent_failure();
        error!(
            key = task.key,
            attempts = task.attempts,
            "replication failed permanently, dropping task"
        );
    }
}

/// Drains the retry channel, scheduling each task's delayed re-enqueue as
/// its own timed task so the worker never blocks on a sleep.
async fn retry_loop(
    mut retry_rx: mpsc::UnboundedReceiver<ReplicationTask>,
    queue_tx: mpsc::Sender<ReplicationTask>,
    metrics: Arc<ReplicatorMetrics>,
    config: ReplicatorConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let task = tokio::select! {
            _ = shutdown_rx.changed() => break,
            task = retry_rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };
        let delay = config.retry_base_delay * task.attempts;
        let queue_tx = queue_tx.clone();
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            metrics.retry_released();
            match queue_tx.try_send(task) {
                Ok(()) => metrics.queue_inc(),
                Err(e) => {
                    metrics.permanent_failure();
                    warn!(error = %e, "queue full, dropping retried task");
                }
            }
        });
    }
    info!("retry worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::put;
    use axum::Router;
    use coral_core::{NodeAddr, StoreOp};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn test_config() -> ReplicatorConfig {
        ReplicatorConfig {
            queue_capacity: 16,
            workers: 2,
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(20),
            call_timeout: Duration::from_millis(500),
            strong_deadline: Duration::from_millis(1500),
        }
    }

    fn task_for(replicas: &[String]) -> ReplicationTask {
        ReplicationTask {
            key: "foo".into(),
            op: StoreOp::Set,
            value: Some(b"bar".to_vec()),
            ttl_ns: None,
            replica_nodes: replicas.iter().map(|r| NodeAddr::from(r.as_str())).collect(),
            user_id: "user-7".into(),
            attempts: 0,
            enqueued_at: Instant::now(),
        }
    }

    async fn spawn_stub(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Stub replica that counts applies and answers a scripted sequence of
    /// status codes (last one repeats).
    fn scripted_replica(counter: Arc<AtomicU32>, script: Vec<StatusCode>) -> Router {
        Router::new().route(
            "/store/:key",
            put(move |State((counter, script)): State<(Arc<AtomicU32>, Vec<StatusCode>)>| async move {
                let call = counter.fetch_add(1, Ordering::SeqCst) as usize;
                *script.get(call).unwrap_or(script.last().unwrap())
            })
            .delete(|| async { StatusCode::OK }),
        )
        .with_state((counter, script))
    }

    #[tokio::test]
    async fn test_eventual_task_reaches_all_replicas() {
        let hits_a = Arc::new(AtomicU32::new(0));
        let hits_b = Arc::new(AtomicU32::new(0));
        let a = spawn_stub(scripted_replica(hits_a.clone(), vec![StatusCode::OK])).await;
        let b = spawn_stub(scripted_replica(hits_b.clone(), vec![StatusCode::OK])).await;

        let config = test_config();
        let client = ReplicaClient::new(config.call_timeout).unwrap();
        let coordinator = Coordinator::start(config, client);

        coordinator.submit_eventual(task_for(&[a, b])).unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(hits_a.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.load(Ordering::SeqCst), 1);
        let snap = coordinator.metrics().snapshot();
        assert_eq!(snap.successful_replicas, 2);
        assert_eq!(snap.queue_size, 0);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_immediately() {
        // No workers: nothing drains the queue.
        let config = ReplicatorConfig {
            queue_capacity: 2,
            workers: 0,
            ..test_config()
        };
        let client = ReplicaClient::new(config.call_timeout).unwrap();
        let coordinator = Coordinator::start(config, client);

        coordinator
            .submit_eventual(task_for(&["http://127.0.0.1:1".into()]))
            .unwrap();
        coordinator
            .submit_eventual(task_for(&["http://127.0.0.1:1".into()]))
            .unwrap();
        let err = coordinator
            .submit_eventual(task_for(&["http://127.0.0.1:1".into()]))
            .unwrap_err();
        assert_eq!(err.status_code(), 503);
        assert_eq!(coordinator.metrics().queue_size(), 2);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        // Fails twice with 500, then succeeds.
        let hits = Arc::new(AtomicU32::new(0));
        let replica = spawn_stub(scripted_replica(
            hits.clone(),
            vec![
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::OK,
            ],
        ))
        .await;

        let config = test_config();
        let client = ReplicaClient::new(config.call_timeout).unwrap();
        let coordinator = Coordinator::start(config, client);
        coordinator.submit_eventual(task_for(&[replica])).unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        let snap = coordinator.metrics().snapshot();
        assert_eq!(snap.successful_replicas, 1);
        assert_eq!(snap.failed_replicas, 2);
        assert_eq!(snap.permanent_failures, 0);
        assert_eq!(snap.retries_in_progress, 0);
    }

    #[tokio::test]
    async fn test_retries_exhaust_to_permanent_failure() {
        let hits = Arc::new(AtomicU32::new(0));
        let replica = spawn_stub(scripted_replica(
            hits.clone(),
            vec![StatusCode::INTERNAL_SERVER_ERROR],
        ))
        .await;

        let config = test_config();
        let client = ReplicaClient::new(config.call_timeout).unwrap();
        let coordinator = Coordinator::start(config, client);
        coordinator.submit_eventual(task_for(&[replica])).unwrap();

        tokio::time::sleep(Duration::from_millis(800)).await;
        // Initial attempt + max_attempts retries.
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        let snap = coordinator.metrics().snapshot();
        assert_eq!(snap.permanent_failures, 1);
        assert_eq!(snap.retries_in_progress, 0);
    }

    #[tokio::test]
    async fn test_4xx_is_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let replica =
            spawn_stub(scripted_replica(hits.clone(), vec![StatusCode::BAD_REQUEST])).await;

        let config = test_config();
        let client = ReplicaClient::new(config.call_timeout).unwrap();
        let coordinator = Coordinator::start(config, client);
        coordinator.submit_eventual(task_for(&[replica])).unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let snap = coordinator.metrics().snapshot();
        assert_eq!(snap.permanent_failures, 1);
        assert_eq!(snap.failed_replicas, 1);
    }

    #[tokio::test]
    async fn test_strong_quorum_success() {
        let a = spawn_stub(scripted_replica(
            Arc::new(AtomicU32::new(0)),
            vec![StatusCode::OK],
        ))
        .await;
        let b = spawn_stub(scripted_replica(
            Arc::new(AtomicU32::new(0)),
            vec![StatusCode::OK],
        ))
        .await;

        let config = test_config();
        let client = ReplicaClient::new(config.call_timeout).unwrap();
        let coordinator = Coordinator::start(config, client);

        let outcome = coordinator.replicate_strong(task_for(&[a, b])).await;
        assert_eq!(
            outcome,
            StrongOutcome::Quorum {
                acks: 2,
                required: 2
            }
        );
    }

    #[tokio::test]
    async fn test_strong_majority_is_enough() {
        let ok = spawn_stub(scripted_replica(
            Arc::new(AtomicU32::new(0)),
            vec![StatusCode::OK],
        ))
        .await;
        let bad = spawn_stub(scripted_replica(
            Arc::new(AtomicU32::new(0)),
            vec![StatusCode::INTERNAL_SERVER_ERROR],
        ))
        .await;
        let ok2 = spawn_stub(scripted_replica(
            Arc::new(AtomicU32::new(0)),
            vec![StatusCode::OK],
        ))
        .await;

        let config = test_config();
        let client = ReplicaClient::new(config.call_timeout).unwrap();
        let coordinator = Coordinator::start(config, client);

        let outcome = coordinator.replicate_strong(task_for(&[ok, bad, ok2])).await;
        assert!(matches!(outcome, StrongOutcome::Quorum { acks: 2, required: 2 }));
    }

    #[tokio::test]
    async fn test_strong_quorum_failure_when_all_respond() {
        // Two replicas, one erroring: 1/2 acks < required 2.
        let ok = spawn_stub(scripted_replica(
            Arc::new(AtomicU32::new(0)),
            vec![StatusCode::OK],
        ))
        .await;
        let bad = spawn_stub(scripted_replica(
            Arc::new(AtomicU32::new(0)),
            vec![StatusCode::INTERNAL_SERVER_ERROR],
        ))
        .await;

        let config = test_config();
        let client = ReplicaClient::new(config.call_timeout).unwrap();
        let coordinator = Coordinator::start(config, client);

        let outcome = coordinator.replicate_strong(task_for(&[ok, bad])).await;
        assert_eq!(
            outcome,
            StrongOutcome::QuorumFailed {
                acks: 1,
                replicas: 2
            }
        );
    }

    #[tokio::test]
    async fn test_strong_deadline_exceeded() {
        // Replica hangs past the deadline.
        let hang = Router::new().route(
            "/store/:key",
            put(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            }),
        );
        let replica = spawn_stub(hang).await;

        let config = ReplicatorConfig {
            call_timeout: Duration::from_secs(2),
            strong_deadline: Duration::from_millis(200),
            ..test_config()
        };
        let client = ReplicaClient::new(config.call_timeout).unwrap();
        let coordinator = Coordinator::start(config, client);

        let started = Instant::now();
        let outcome = coordinator.replicate_strong(task_for(&[replica])).await;
        assert_eq!(outcome, StrongOutcome::DeadlineExceeded { acks: 0 });
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_empty_replica_set_is_trivially_quorate() {
        let config = test_config();
        let client = ReplicaClient::new(config.call_timeout).unwrap();
        let coordinator = Coordinator::start(config, client);
        let outcome = coordinator.replicate_strong(task_for(&[])).await;
        assert_eq!(
            outcome,
            StrongOutcome::Quorum {
                acks: 0,
                required: 0
            }
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_workers_without_draining() {
        let hits = Arc::new(AtomicU32::new(0));
        let replica = spawn_stub(scripted_replica(hits.clone(), vec![StatusCode::OK])).await;

        let config = ReplicatorConfig {
            workers: 1,
            ..test_config()
        };
        let client = ReplicaClient::new(config.call_timeout).unwrap();
        let coordinator = Coordinator::start(config, client);

        coordinator.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Queued after shutdown: accepted by the channel but never drained.
        coordinator.submit_eventual(task_for(&[replica])).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
