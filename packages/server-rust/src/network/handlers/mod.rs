//! Admin HTTP handlers.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors), the `ApiError` response type, and re-exports every handler
//! for building the router.

pub mod health;
pub mod ops;
pub mod services;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use ops::{
    clear_cache_handler, invalidate_service_handler, probe_all_handler, probe_service_handler,
    queue_stats_handler, reconcile_mounts_handler,
};
pub use services::{get_service_handler, list_services_handler, patch_service_handler, set_mode_handler};

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use switchyard_core::ErrorBody;

use super::{AdminConfig, ShutdownController};
use crate::admission::AdmissionQueue;
use crate::cache::ConnectionCache;
use crate::error::StorageError;
use crate::health::HealthMonitor;
use crate::local::Mounter;
use crate::registry::Registry;

/// Shared state passed to all admin handlers. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub cache: Arc<ConnectionCache>,
    pub mounter: Arc<Mounter>,
    pub monitor: Arc<HealthMonitor>,
    pub queue: Arc<AdmissionQueue>,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<AdminConfig>,
    /// Process start, for uptime.
    pub start_time: Instant,
}

/// Error returned by admin handlers, rendered as an `ErrorBody`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("service {0:?} not found")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("missing or invalid admin token")]
    Unauthorized,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Storage(_) => "storage",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Storage(e) = &self {
            tracing::error!(error = %e, "admin request failed on storage");
        }
        let body = ErrorBody::new(self.kind(), self.to_string());
        (self.status(), Json(body)).into_response()
    }
}
