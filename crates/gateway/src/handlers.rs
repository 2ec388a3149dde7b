//! Request orchestration: primary write, replication dispatch, primary read.

use crate::identity::{IdentityProvider, UserId};
use crate::middleware::{self, error_response, X_CONSISTENCY, X_USER_ID};
use crate::ratelimit::RateLimiter;
use crate::usage::{UsageRecord, UsageSink};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use coral_core::{
    parse_ttl, validate_key, Consistency, Error, NodeAddr, ReplicateRequest, StoreOp,
};
use coral_ring::HashRing;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Timeout for forwarded storage-node and coordinator calls.
pub const FORWARD_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Long-lived gateway state shared by handlers and middleware.
pub struct GatewayState {
    pub ring: HashRing,
    pub http: reqwest::Client,
    pub identity: Arc<dyn IdentityProvider>,
    pub usage: Arc<dyn UsageSink>,
    pub limiter: RateLimiter,
    pub replicator_url: String,
}

/// Response body for PUT and DELETE.
#[derive(Debug, Serialize, Deserialize)]
pub struct KvWriteResponse {
    pub success: bool,
    pub key: String,
    pub primary_node: String,
    /// Number of replica nodes the write fans out to.
    pub replicas: usize,
}

#[derive(Debug, Serialize)]
pub struct GatewayHealth {
    pub status: String,
    pub service: String,
    pub nodes: Vec<NodeAddr>,
}

#[derive(Debug, Deserialize)]
struct TtlQuery {
    ttl: Option<String>,
}

/// Build the public router with the full middleware stack.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(
            "/v1/kv/:key",
            get(get_kv).put(put_kv).delete(delete_kv),
        )
        .route("/health", get(health))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::rate_limit,
        ))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::auth,
        ))
        .layer(middleware::cors_layer())
        .with_state(state)
}

/// Forward an upstream response verbatim: status, body, `Content-Type`.
async fn proxy_response(upstream: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let body = upstream.bytes().await.unwrap_or_default();
    (
        status,
        [(header::CONTENT_TYPE, content_type)],
        body.to_vec(),
    )
        .into_response()
}

fn consistency_from(headers: &HeaderMap) -> Result<Consistency, Error> {
    match headers.get(&X_CONSISTENCY) {
        Some(value) => value
            .to_str()
            .map_err(|_| Error::BadRequest("invalid X-Consistency header".into()))?
            .parse(),
        None => Ok(Consistency::default()),
    }
}

fn record_usage(state: &Arc<GatewayState>, user: &UserId, method: &str, key: &str, status: u16) {
    let usage = Arc::clone(&state.usage);
    let record = UsageRecord::new(user.as_str(), method, key, status);
    tokio::spawn(async move {
        usage.record_request(record).await;
    });
}

async fn put_kv(
    State(state): State<Arc<GatewayState>>,
    Path(key): Path<String>,
    Query(query): Query<TtlQuery>,
    axum::Extension(user): axum::Extension<UserId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    orchestrate_write(state, user, key, StoreOp::Set, Some(body), query.ttl, &headers).await
}

async fn delete_kv(
    State(state): State<Arc<GatewayState>>,
    Path(key): Path<String>,
    axum::Extension(user): axum::Extension<UserId>,
    headers: HeaderMap,
) -> Response {
    orchestrate_write(state, user, key, StoreOp::Delete, None, None, &headers).await
}

/// PUT/DELETE path: write the primary, then hand the replicas to the
/// coordinator with the requested consistency.
async fn orchestrate_write(
    state: Arc<GatewayState>,
    user: UserId,
    key: String,
    op: StoreOp,
    value: Option<Bytes>,
    ttl: Option<String>,
    headers: &HeaderMap,
) -> Response {
    let method = match op {
        StoreOp::Set => "PUT",
        StoreOp::Delete => "DELETE",
    };

    if let Err(e) = validate_key(&key) {
        return error_response(&e);
    }
    let consistency = match consistency_from(headers) {
        Ok(consistency) => consistency,
        Err(e) => return error_response(&e),
    };
    let ttl_ns = match ttl.as_deref() {
        Some(raw) => match parse_ttl(raw) {
            Ok(parsed) => Some(parsed.as_nanos() as u64),
            Err(e) => return error_response(&e),
        },
        None => None,
    };

    let located = state.ring.locate(&key, state.ring.replication_factor());
    let Some((primary, replicas)) = located.split_first() else {
        return error_response(&Error::Unavailable("no storage nodes available".into()));
    };

    // Primary write first; replication only follows a durable primary.
    let url = format!("{primary}/store/{key}");
    let mut request = match op {
        StoreOp::Set => state
            .http
            .put(&url)
            .body(value.clone().unwrap_or_default()),
        StoreOp::Delete => state.http.delete(&url),
    };
    request = request.header(X_USER_ID.as_str(), user.as_str());
    if let Some(raw) = &ttl {
        request = request.query(&[("ttl", raw)]);
    }

    let upstream = match request.send().await {
        Ok(upstream) => upstream,
        Err(e) => {
            record_usage(&state, &user, method, &key, 503);
            return error_response(&Error::Unavailable(format!(
                "primary write failed: {e}"
            )));
        }
    };
    let primary_status = upstream.status();
    // A DELETE on a key the primary no longer holds still fans out: the
    // replicas may hold it.
    let tolerated_miss = op == StoreOp::Delete && primary_status == reqwest::StatusCode::NOT_FOUND;
    if !primary_status.is_success() && !tolerated_miss {
        record_usage(&state, &user, method, &key, primary_status.as_u16());
        return proxy_response(upstream).await;
    }

    if !replicas.is_empty() {
        let descriptor = ReplicateRequest {
            key: key.clone(),
            value: value.as_ref().map(|b| b.to_vec()),
            op,
            ttl_ns,
            consistency,
            primary_node: primary.to_string(),
            replica_nodes: replicas.iter().map(|r| r.to_string()).collect(),
            user_id: user.to_string(),
        };
        let replicate_url = format!("{}/replicate", state.replicator_url);

        match consistency {
            Consistency::Eventual => {
                // Fire and forget: the client's 200 does not wait, and an
                // enqueue failure only costs replica freshness.
                let http = state.http.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    match http.post(&replicate_url).json(&descriptor).send().await {
                        Ok(resp) if !resp.status().is_success() => {
                            warn!(key, status = %resp.status(), "replication dispatch rejected");
                        }
                        Err(e) => warn!(key, error = %e, "replication dispatch failed"),
                        Ok(_) => {}
                    }
                });
            }
            Consistency::Strong => {
                let outcome = state
                    .http
                    .post(&replicate_url)
                    .json(&descriptor)
                    .send()
                    .await;
                match outcome {
                    Ok(resp) if !resp.status().is_success() => {
                        // The primary holds the data but replica durability
                        // is unconfirmed; surface the coordinator's verdict.
                        record_usage(&state, &user, method, &key, resp.status().as_u16());
                        return proxy_response(resp).await;
                    }
                    Err(e) => {
                        record_usage(&state, &user, method, &key, 503);
                        return error_response(&Error::Unavailable(format!(
                            "replication coordinator unreachable: {e}"
                        )));
                    }
                    Ok(_) => {}
                }
            }
        }
    }

    record_usage(&state, &user, method, &key, 200);
    Json(KvWriteResponse {
        success: true,
        key,
        primary_node: primary.to_string(),
        replicas: replicas.len(),
    })
    .into_response()
}

/// GET path: primary only, no replica fallback. Whichever node the ring
/// currently designates primary answers — a ring change between a write
/// and a read may expose stale or absent data under eventual mode.
async fn get_kv(
    State(state): State<Arc<GatewayState>>,
    Path(key): Path<String>,
    axum::Extension(user): axum::Extension<UserId>,
) -> Response {
    if let Err(e) = validate_key(&key) {
        return error_response(&e);
    }
    let Some(primary) = state.ring.primary(&key) else {
        return error_response(&Error::Unavailable("no storage nodes available".into()));
    };

    let url = format!("{primary}/store/{key}");
    match state
        .http
        .get(&url)
        .header(X_USER_ID.as_str(), user.as_str())
        .send()
        .await
    {
        Ok(upstream) => {
            record_usage(&state, &user, "GET", &key, upstream.status().as_u16());
            proxy_response(upstream).await
        }
        Err(e) => {
            record_usage(&state, &user, "GET", &key, 503);
            error_response(&Error::Unavailable(format!("primary read failed: {e}")))
        }
    }
}

async fn health(State(state): State<Arc<GatewayState>>) -> Json<GatewayHealth> {
    Json(GatewayHealth {
        status: "healthy".to_string(),
        service: "gateway".to_string(),
        nodes: state.ring.all(),
    })
}
