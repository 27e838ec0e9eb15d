//! Serves a [`LocalTarget`] over HTTP so it can be called remotely.
//!
//! Routes:
//! - `GET /health` -- the target's self-reported health
//! - `POST /{method}` -- JSON `CallArgs` in, the method's JSON result out;
//!   404 for an unknown method, 400 for malformed arguments, 500 otherwise

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use subtle::ConstantTimeEq;
use switchyard_core::{CallArgs, ErrorBody, HealthReport, HealthStatus};
use tracing::warn;

use super::transport::SERVICE_TOKEN_HEADER;
use crate::error::LocalCallError;
use crate::local::LocalTarget;

#[derive(Clone)]
struct EndpointState {
    target: Arc<dyn LocalTarget>,
    token: Option<Arc<str>>,
}

/// Builds an axum router exposing `target` without authentication.
pub fn remote_endpoint_router(target: Arc<dyn LocalTarget>) -> Router {
    build(EndpointState {
        target,
        token: None,
    })
}

/// Like [`remote_endpoint_router`], but calls must carry `token` in the
/// `X-Service-Token` header.
pub fn remote_endpoint_router_with_token(
    target: Arc<dyn LocalTarget>,
    token: impl Into<String>,
) -> Router {
    build(EndpointState {
        target,
        token: Some(Arc::from(token.into())),
    })
}

fn build(state: EndpointState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/{method}", post(call_handler))
        .with_state(state)
}

fn error(status: StatusCode, kind: &str, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody::new(kind, message))).into_response()
}

fn authorized(state: &EndpointState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.token else {
        return true;
    };
    headers
        .get(SERVICE_TOKEN_HEADER)
        .is_some_and(|got| bool::from(got.as_bytes().ct_eq(expected.as_bytes())))
}

async fn health_handler(State(state): State<EndpointState>) -> Response {
    match state.target.health().await {
        Ok(status) => (StatusCode::OK, Json(HealthReport::new(status))).into_response(),
        Err(e) => {
            let mut report = HealthReport::new(HealthStatus::Down);
            report
                .details
                .insert("error".to_string(), e.to_string().into());
            (StatusCode::SERVICE_UNAVAILABLE, Json(report)).into_response()
        }
    }
}

async fn call_handler(
    State(state): State<EndpointState>,
    Path(method): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !authorized(&state, &headers) {
        return error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid service token");
    }
    if !state.target.has_method(&method) {
        return error(
            StatusCode::NOT_FOUND,
            "unsupported_method",
            format!("method {method:?} is not supported"),
        );
    }

    let args = if body.is_empty() {
        CallArgs::new()
    } else {
        match serde_json::from_slice::<CallArgs>(&body) {
            Ok(args) => args,
            Err(e) => return error(StatusCode::BAD_REQUEST, "invalid_args", e.to_string()),
        }
    };

    match state.target.call(&method, args).await {
        Ok(value) => Json(value).into_response(),
        Err(LocalCallError::MethodNotFound { method }) => error(
            StatusCode::NOT_FOUND,
            "unsupported_method",
            format!("method {method:?} is not supported"),
        ),
        Err(LocalCallError::InvalidArgs(message)) => {
            error(StatusCode::BAD_REQUEST, "invalid_args", message)
        }
        Err(e) => {
            warn!(%method, error = %e, "remote endpoint call failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "call_failed", e.to_string())
        }
    }
}
