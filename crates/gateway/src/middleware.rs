//! Authentication and rate-limit middleware.
//!
//! Stack order (outermost first): trace → CORS → auth → rate limit →
//! handler. `/health` bypasses both auth and rate limiting.

use crate::handlers::GatewayState;
use crate::identity::UserId;
use axum::extract::{Request, State};
use axum::http::{header, HeaderName, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use coral_core::Error;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub static X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");
pub static X_CONSISTENCY: HeaderName = HeaderName::from_static("x-consistency");
pub static X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");

pub fn error_response(err: &Error) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

/// Resolve `X-API-Key` and bind the user to the request scope.
pub async fn auth(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let api_key = request
        .headers()
        .get(&X_API_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let Some(api_key) = api_key else {
        return error_response(&Error::Unauthenticated("missing X-API-Key header".into()));
    };

    match state.identity.resolve(&api_key).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => error_response(&e),
    }
}

/// Refill-then-consume one token for the authenticated user.
pub async fn rate_limit(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    // No bound user means an auth-exempt path.
    let Some(user) = request.extensions().get::<UserId>().cloned() else {
        return next.run(request).await;
    };
    if !state.limiter.try_acquire(user.as_str()) {
        return error_response(&Error::RateLimited(user.to_string()));
    }
    next.run(request).await
}

/// Wildcard-origin CORS for the dashboard and other browser clients.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            X_API_KEY.clone(),
            X_CONSISTENCY.clone(),
        ])
}
