//! Process health, liveness, and readiness endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::LifecycleState;

/// Detailed process health as JSON.
///
/// Always 200; the `state` field tells monitors whether the process is
/// ready, starting, or draining.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cache = state.cache.stats();
    Json(json!({
        "state": state.shutdown.state().as_str(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "in_flight": state.shutdown.in_flight_count(),
        "cache_available": cache.available,
        "queue_closed": state.queue.is_closed(),
        "queue_outstanding": state.queue.outstanding(),
        "health_monitor_running": state.monitor.is_running().await,
        "mounted": state.mounter.mounted(),
    }))
}

/// Liveness: 200 whenever the process can answer at all.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness: 200 only in the Ready state, 503 while starting or draining.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.state() == LifecycleState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
