//! Identity provider interface.
//!
//! Account management (registration, password hashing, API-key issuance)
//! is another service's concern; the gateway only needs "this API key
//! belongs to that user". An unreachable provider is an authentication
//! failure for the request in hand, never a gateway startup failure.

use async_trait::async_trait;
use coral_core::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Authenticated tenant identity, bound to the request scope after a
/// successful API-key resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps a presented API key to a user, or fails the authentication.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, api_key: &str) -> Result<UserId>;
}

/// Resolves API keys against the user-manager service.
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    user_id: String,
}

impl HttpIdentityProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("building HTTP client: {e}")))?;
        Ok(HttpIdentityProvider {
            http,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn resolve(&self, api_key: &str) -> Result<UserId> {
        let url = format!("{}/v1/auth/verify", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "api_key": api_key }))
            .send()
            .await
            .map_err(|e| Error::Unauthenticated(format!("identity provider unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Unauthenticated("invalid API key".into()));
        }
        let verified: VerifyResponse = response
            .json()
            .await
            .map_err(|e| Error::Unauthenticated(format!("malformed identity response: {e}")))?;
        Ok(UserId::new(verified.user_id))
    }
}

/// Fixed key → user table. Backs tests and single-tenant deployments.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    keys: HashMap<String, String>,
}

impl StaticIdentityProvider {
    pub fn new<I, K, U>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, U)>,
        K: Into<String>,
        U: Into<String>,
    {
        StaticIdentityProvider {
            keys: pairs
                .into_iter()
                .map(|(k, u)| (k.into(), u.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve(&self, api_key: &str) -> Result<UserId> {
        self.keys
            .get(api_key)
            .map(UserId::new)
            .ok_or_else(|| Error::Unauthenticated("invalid API key".into()))
    }
}
