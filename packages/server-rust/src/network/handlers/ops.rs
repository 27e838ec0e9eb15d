//! Operational endpoints: cache eviction, on-demand probes, mount
//! reconciliation and admission statistics.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use super::{ApiError, AppState};
use crate::admission::QueueStats;
use crate::health::ProbeReport;
use crate::local::MountReport;

/// `DELETE /cache`
pub async fn clear_cache_handler(State(state): State<AppState>) -> StatusCode {
    state.cache.invalidate_all().await;
    StatusCode::NO_CONTENT
}

/// `DELETE /cache/{name}`
pub async fn invalidate_service_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> StatusCode {
    state.cache.invalidate(&name).await;
    StatusCode::NO_CONTENT
}

/// `POST /probe`: runs a full probe cycle and returns every report.
pub async fn probe_all_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProbeReport>>, ApiError> {
    Ok(Json(state.monitor.probe_all().await?))
}

/// `POST /probe/{name}`
pub async fn probe_service_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProbeReport>, ApiError> {
    state
        .monitor
        .probe_service(&name)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(name))
}

/// `POST /mounts/reconcile`
pub async fn reconcile_mounts_handler(
    State(state): State<AppState>,
) -> Result<Json<MountReport>, ApiError> {
    Ok(Json(state.mounter.reconcile().await?))
}

/// `GET /queue/stats`
pub async fn queue_stats_handler(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.queue.stats())
}
