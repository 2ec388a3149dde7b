//! HTTP surface of the replication coordinator (internal).

use crate::coordinator::{Coordinator, StrongOutcome};
use crate::task::ReplicationTask;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use coral_core::{Consistency, ReplicateRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Queue occupancy fraction above which health reports `degraded`.
const DEGRADED_QUEUE_FRACTION: f64 = 0.9;

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicateAck {
    pub success: bool,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicatorHealth {
    pub status: String,
    pub queue_size: usize,
}

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/replicate", post(replicate))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(coordinator)
}

async fn replicate(
    State(coordinator): State<Arc<Coordinator>>,
    Json(request): Json<ReplicateRequest>,
) -> Response {
    let consistency = request.consistency;
    let task = ReplicationTask::from_request(request);

    match consistency {
        Consistency::Eventual => match coordinator.submit_eventual(task) {
            Ok(()) => (
                StatusCode::ACCEPTED,
                Json(ReplicateAck {
                    success: true,
                    status: "queued".into(),
                    acks: None,
                    required: None,
                }),
            )
                .into_response(),
            Err(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response(),
        },
        Consistency::Strong => match coordinator.replicate_strong(task).await {
            StrongOutcome::Quorum { acks, required } => Json(ReplicateAck {
                success: true,
                status: "replicated".into(),
                acks: Some(acks),
                required: Some(required),
            })
            .into_response(),
            StrongOutcome::DeadlineExceeded { acks } => (
                StatusCode::REQUEST_TIMEOUT,
                Json(serde_json::json!({
                    "error": format!("quorum not reached before deadline ({acks} acks)")
                })),
            )
                .into_response(),
            StrongOutcome::QuorumFailed { acks, replicas } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": format!("quorum not reached: {acks}/{replicas} replicas acked")
                })),
            )
                .into_response(),
        },
    }
}

async fn metrics(State(coordinator): State<Arc<Coordinator>>) -> Response {
    Json(coordinator.metrics().snapshot()).into_response()
}

async fn health(State(coordinator): State<Arc<Coordinator>>) -> Json<ReplicatorHealth> {
    let queue_size = coordinator.metrics().queue_size();
    let threshold =
        (coordinator.config().queue_capacity as f64 * DEGRADED_QUEUE_FRACTION) as usize;
    let status = if queue_size < threshold {
        "healthy"
    } else {
        "degraded"
    };
    Json(ReplicatorHealth {
        status: status.into(),
        queue_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ReplicaClient;
    use crate::task::ReplicatorConfig;
    use axum::body::Body;
    use axum::http::Request;
    use coral_core::StoreOp;
    use tower::ServiceExt;

    fn test_app(config: ReplicatorConfig) -> Router {
        let client = ReplicaClient::new(config.call_timeout).unwrap();
        router(Coordinator::start(config, client))
    }

    fn eventual_body() -> String {
        serde_json::to_string(&ReplicateRequest {
            key: "foo".into(),
            value: Some(b"bar".to_vec()),
            op: StoreOp::Set,
            ttl_ns: None,
            consistency: Consistency::Eventual,
            primary_node: "http://127.0.0.1:1".into(),
            replica_nodes: vec![],
            user_id: "u".into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_eventual_replicate_returns_202() {
        let app = test_app(ReplicatorConfig::default());
        let request = Request::post("/replicate")
            .header("content-type", "application/json")
            .body(Body::from(eventual_body()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_full_queue_returns_503() {
        let config = ReplicatorConfig {
            queue_capacity: 1,
            workers: 0,
            ..ReplicatorConfig::default()
        };
        let app = test_app(config);
        for expected in [StatusCode::ACCEPTED, StatusCode::SERVICE_UNAVAILABLE] {
            let request = Request::post("/replicate")
                .header("content-type", "application/json")
                .body(Body::from(eventual_body()))
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), expected);
        }
    }

    #[tokio::test]
    async fn test_health_degrades_when_queue_nearly_full() {
        let config = ReplicatorConfig {
            queue_capacity: 10,
            workers: 0,
            ..ReplicatorConfig::default()
        };
        let app = test_app(config);

        let health = |app: Router| async move {
            let response = app
                .oneshot(Request::get("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            serde_json::from_slice::<ReplicatorHealth>(&bytes).unwrap()
        };

        assert_eq!(health(app.clone()).await.status, "healthy");

        for _ in 0..9 {
            let request = Request::post("/replicate")
                .header("content-type", "application/json")
                .body(Body::from(eventual_body()))
                .unwrap();
            app.clone().oneshot(request).await.unwrap();
        }
        assert_eq!(health(app).await.status, "degraded");
    }

    #[tokio::test]
    async fn test_metrics_shape() {
        let app = test_app(ReplicatorConfig::default());
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let snapshot: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(snapshot["total_replications"], 0);
        assert_eq!(snapshot["queue_size"], 0);
        assert_eq!(snapshot["average_ack_time_ms"], 0.0);
    }
}
