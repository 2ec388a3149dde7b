//! HTTP surface of a storage node (internal, called by the gateway and
//! the replication coordinator).

use crate::store::Store;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use coral_core::{parse_ttl, Error};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

static X_NODE_ID: HeaderName = HeaderName::from_static("x-node-id");
static X_REPLICATION: HeaderName = HeaderName::from_static("x-replication");

#[derive(Clone)]
struct NodeState {
    store: Arc<Store>,
}

/// Acknowledgment body for PUT and DELETE.
#[derive(Debug, Serialize, Deserialize)]
pub struct MutationAck {
    pub success: bool,
    pub key: String,
    pub node_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub node_id: String,
    pub key_count: usize,
    pub wal_size_bytes: u64,
    pub skipped_corrupted: u64,
    /// Seconds since epoch at collection time.
    pub timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeHealth {
    pub status: String,
    pub node_id: String,
}

#[derive(Debug, Deserialize)]
struct TtlQuery {
    ttl: Option<String>,
}

/// Build the node router.
pub fn router(store: Arc<Store>) -> Router {
    let state = NodeState { store };
    Router::new()
        .route(
            "/store/:key",
            get(get_store).put(put_store).delete(delete_store),
        )
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
}

fn error_response(err: &Error) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

async fn put_store(
    State(state): State<NodeState>,
    Path(key): Path<String>,
    Query(query): Query<TtlQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if headers.contains_key(&X_REPLICATION) {
        debug!(key, "applying replicated write");
    }

    let ttl_ns = match query.ttl.as_deref() {
        Some(raw) => match parse_ttl(raw) {
            Ok(ttl) => Some(ttl.as_nanos() as u64),
            Err(e) => return error_response(&e),
        },
        None => None,
    };

    let store = Arc::clone(&state.store);
    let write_key = key.clone();
    let result =
        tokio::task::spawn_blocking(move || store.set(&write_key, body.to_vec(), ttl_ns)).await;
    match result {
        Ok(Ok(())) => Json(MutationAck {
            success: true,
            key,
            node_id: state.store.node_id().to_string(),
        })
        .into_response(),
        Ok(Err(e)) => error_response(&e),
        Err(e) => error_response(&Error::Internal(e.to_string())),
    }
}

async fn get_store(State(state): State<NodeState>, Path(key): Path<String>) -> Response {
    match state.store.get(&key) {
        Some(value) => (
            [
                (header::CONTENT_TYPE.clone(), "application/octet-stream"),
                (X_NODE_ID.clone(), state.store.node_id()),
            ],
            value,
        )
            .into_response(),
        None => error_response(&Error::NotFound(key)),
    }
}

async fn delete_store(State(state): State<NodeState>, Path(key): Path<String>) -> Response {
    let store = Arc::clone(&state.store);
    let delete_key = key.clone();
    let result = tokio::task::spawn_blocking(move || store.delete(&delete_key)).await;
    match result {
        Ok(Ok(true)) => Json(MutationAck {
            success: true,
            key,
            node_id: state.store.node_id().to_string(),
        })
        .into_response(),
        Ok(Ok(false)) => error_response(&Error::NotFound(key)),
        Ok(Err(e)) => error_response(&e),
        Err(e) => error_response(&Error::Internal(e.to_string())),
    }
}

async fn metrics(State(state): State<NodeState>) -> Json<NodeMetrics> {
    Json(NodeMetrics {
        node_id: state.store.node_id().to_string(),
        key_count: state.store.key_count(),
        wal_size_bytes: state.store.wal_size_bytes(),
        skipped_corrupted: state.store.skipped_corrupted(),
        timestamp: coral_core::unix_nanos() / 1_000_000_000,
    })
}

async fn health(State(state): State<NodeState>) -> Json<NodeHealth> {
    Json(NodeHealth {
        status: "healthy".to_string(),
        node_id: state.store.node_id().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn test_router(dir: &std::path::Path) -> Router {
        router(Arc::new(Store::open("node-test", dir).unwrap()))
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = tempdir().unwrap();
        let app = test_router(dir.path());

        let put = Request::put("/store/foo").body(Body::from("bar")).unwrap();
        let response = app.clone().oneshot(put).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ack = body_json(response).await;
        assert_eq!(ack["success"], true);
        assert_eq!(ack["key"], "foo");
        assert_eq!(ack["node_id"], "node-test");

        let get = Request::get("/store/foo").body(Body::empty()).unwrap();
        let response = app.oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-node-id"], "node-test");
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"bar");
    }

    #[tokio::test]
    async fn test_get_missing_is_404() {
        let dir = tempdir().unwrap();
        let app = test_router(dir.path());
        let response = app
            .oneshot(Request::get("/store/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("nope"));
    }

    #[tokio::test]
    async fn test_delete_roundtrip() {
        let dir = tempdir().unwrap();
        let app = test_router(dir.path());

        let put = Request::put("/store/foo").body(Body::from("bar")).unwrap();
        app.clone().oneshot(put).await.unwrap();

        let del = Request::delete("/store/foo").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(del).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let del_again = Request::delete("/store/foo").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(del_again).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let get = Request::get("/store/foo").body(Body::empty()).unwrap();
        let response = app.oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_ttl_is_400() {
        let dir = tempdir().unwrap();
        let app = test_router(dir.path());
        let put = Request::put("/store/foo?ttl=banana")
            .body(Body::from("bar"))
            .unwrap();
        let response = app.oneshot(put).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ttl_param_applies() {
        let dir = tempdir().unwrap();
        let app = test_router(dir.path());
        let put = Request::put("/store/foo?ttl=20ms")
            .body(Body::from("bar"))
            .unwrap();
        assert_eq!(
            app.clone().oneshot(put).await.unwrap().status(),
            StatusCode::OK
        );

        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        let get = Request::get("/store/foo").body(Body::empty()).unwrap();
        let response = app.oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_and_health() {
        let dir = tempdir().unwrap();
        let app = test_router(dir.path());

        let put = Request::put("/store/foo").body(Body::from("bar")).unwrap();
        app.clone().oneshot(put).await.unwrap();

        let response = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let metrics = body_json(response).await;
        assert_eq!(metrics["node_id"], "node-test");
        assert_eq!(metrics["key_count"], 1);
        assert!(metrics["wal_size_bytes"].as_u64().unwrap() > 0);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let health = body_json(response).await;
        assert_eq!(health["status"], "healthy");
    }
}
