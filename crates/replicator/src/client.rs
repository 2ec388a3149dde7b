//! HTTP client for applying a mutation to one replica.

use crate::task::ReplicationTask;
use coral_core::{Error, NodeAddr, Result, StoreOp};
use std::time::Duration;

/// Outcome classification for a failed replica call.
///
/// 4xx responses are the replica rejecting the request itself — retrying
/// the identical request cannot succeed. Transport errors and 5xx are
/// transient and worth another attempt.
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("retryable replica failure: {0}")]
    Retryable(String),
    #[error("permanent replica failure: {0}")]
    Permanent(String),
}

/// Client for the storage nodes' internal `/store/{key}` surface.
#[derive(Clone)]
pub struct ReplicaClient {
    http: reqwest::Client,
}

impl ReplicaClient {
    /// `call_timeout` bounds every replica call; it must be strictly less
    /// than the strong-mode deadline.
    pub fn new(call_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("building HTTP client: {e}")))?;
        Ok(ReplicaClient { http })
    }

    /// Apply one task's mutation to one replica. 2xx is success.
    pub async fn apply(&self, replica: &NodeAddr, task: &ReplicationTask) -> std::result::Result<(), ReplicaError> {
        let url = format!("{}/store/{}", replica, task.key);
        let request = match task.op {
            StoreOp::Set => {
                let mut request = self
                    .http
                    .put(&url)
                    .header("X-Replication", "true")
                    .body(task.value.clone().unwrap_or_default());
                if let Some(ttl_ns) = task.ttl_ns {
                    request = request.query(&[("ttl", format!("{ttl_ns}ns"))]);
                }
                request
            }
            StoreOp::Delete => self.http.delete(&url).header("X-Replication", "true"),
        };

        match request.send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) if resp.status().is_client_error() => Err(ReplicaError::Permanent(format!(
                "{} {} -> {}",
                task.op, url, resp.status()
            ))),
            Ok(resp) => Err(ReplicaError::Retryable(format!(
                "{} {} -> {}",
                task.op, url, resp.status()
            ))),
            Err(e) => Err(ReplicaError::Retryable(format!("{} {url}: {e}", task.op))),
        }
    }
}
