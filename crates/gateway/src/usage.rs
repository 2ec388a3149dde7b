//! Usage sink interface: fire-and-forget request accounting.
//!
//! Analytics storage lives elsewhere; the gateway only emits. Recording
//! never fails a request and never delays a response — callers dispatch
//! on a spawned task.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// One request's accounting record.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub method: String,
    pub key: String,
    pub status: u16,
    /// Seconds since epoch.
    pub timestamp: u64,
}

impl UsageRecord {
    pub fn new(user_id: &str, method: &str, key: &str, status: u16) -> Self {
        UsageRecord {
            user_id: user_id.to_string(),
            method: method.to_string(),
            key: key.to_string(),
            status,
            timestamp: coral_core::unix_nanos() / 1_000_000_000,
        }
    }
}

#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record_request(&self, record: UsageRecord);
}

/// Posts records to the user-manager service, dropping them on error.
pub struct HttpUsageSink {
    http: reqwest::Client,
    base_url: String,
}

impl HttpUsageSink {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> coral_core::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| coral_core::Error::Internal(format!("building HTTP client: {e}")))?;
        Ok(HttpUsageSink {
            http,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl UsageSink for HttpUsageSink {
    async fn record_request(&self, record: UsageRecord) {
        let url = format!("{}/v1/usage", self.base_url);
        if let Err(e) = self.http.post(&url).json(&record).send().await {
            debug!(error = %e, "usage record dropped");
        }
    }
}

/// Discards every record.
#[derive(Debug, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record_request(&self, _record: UsageRecord) {}
}
