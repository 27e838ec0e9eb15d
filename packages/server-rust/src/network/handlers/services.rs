//! Service registry endpoints: inspection and operator configuration.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use switchyard_core::{ConfigUpdate, ConnectionMode, ServiceRecord};

use super::{ApiError, AppState};

/// A record plus the mode calls would currently take.
#[derive(Debug, Serialize)]
pub struct ServiceView {
    #[serde(flatten)]
    pub record: ServiceRecord,
    pub effective_mode: ConnectionMode,
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: ConnectionMode,
}

async fn view(state: &AppState, record: ServiceRecord) -> ServiceView {
    let effective_mode = state.cache.effective_mode(&record.name).await;
    ServiceView {
        record,
        effective_mode,
    }
}

async fn load(state: &AppState, name: &str) -> Result<ServiceRecord, ApiError> {
    state
        .registry
        .get(name)
        .await?
        .ok_or_else(|| ApiError::NotFound(name.to_string()))
}

/// `GET /services`
pub async fn list_services_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServiceView>>, ApiError> {
    let records = state.registry.list_all().await?;
    let mut views = Vec::with_capacity(records.len());
    for record in records {
        views.push(view(&state, record).await);
    }
    Ok(Json(views))
}

/// `GET /services/{name}`
pub async fn get_service_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServiceView>, ApiError> {
    let record = load(&state, &name).await?;
    Ok(Json(view(&state, record).await))
}

/// `PUT /services/{name}/mode` with `{"mode": "local" | "remote" | "disabled"}`.
pub async fn set_mode_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ModeRequest>,
) -> Result<Json<ServiceView>, ApiError> {
    apply(&state, &name, &ConfigUpdate::mode(request.mode)).await
}

/// `PATCH /services/{name}` with a partial `ConfigUpdate`.
pub async fn patch_service_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<ServiceView>, ApiError> {
    if update.is_empty() {
        return Err(ApiError::BadRequest("update has no fields".to_string()));
    }
    apply(&state, &name, &update).await
}

async fn apply(
    state: &AppState,
    name: &str,
    update: &ConfigUpdate,
) -> Result<Json<ServiceView>, ApiError> {
    load(state, name).await?;
    state.registry.set_config(name, update).await?;
    let record = load(state, name).await?;
    Ok(Json(view(state, record).await))
}

#[cfg(test)]
mod tests {
    use switchyard_core::ServiceMetadata;

    use super::*;
    use crate::network::handlers::tests::test_state;
    use crate::service::router::tests::Fixture;

    async fn seeded() -> (Fixture, AppState) {
        let fx = Fixture::new();
        fx.registry
            .upsert_discovered(&ServiceMetadata::new("feeds").with_remote_address("http://feeds:8001"))
            .await
            .unwrap();
        let state = test_state(&fx, None);
        (fx, state)
    }

    #[tokio::test]
    async fn lists_and_gets_with_effective_mode() {
        let (_fx, state) = seeded().await;

        let list = list_services_handler(State(state.clone())).await.unwrap().0;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].effective_mode, ConnectionMode::Remote);

        let one = get_service_handler(State(state.clone()), Path("feeds".into()))
            .await
            .unwrap()
            .0;
        assert_eq!(one.record.name, "feeds");

        let missing = get_service_handler(State(state), Path("ghost".into())).await;
        assert!(matches!(missing, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn set_mode_disables_routing() {
        let (_fx, state) = seeded().await;

        let updated = set_mode_handler(
            State(state.clone()),
            Path("feeds".into()),
            Json(ModeRequest {
                mode: ConnectionMode::Disabled,
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(updated.record.preferred_mode, ConnectionMode::Disabled);
        assert_eq!(updated.effective_mode, ConnectionMode::Disabled);
    }

    #[tokio::test]
    async fn patch_rejects_empty_and_unknown() {
        let (_fx, state) = seeded().await;

        let empty = patch_service_handler(
            State(state.clone()),
            Path("feeds".into()),
            Json(ConfigUpdate::default()),
        )
        .await;
        assert!(matches!(empty, Err(ApiError::BadRequest(_))));

        let unknown = patch_service_handler(
            State(state.clone()),
            Path("ghost".into()),
            Json(ConfigUpdate::mode(ConnectionMode::Remote)),
        )
        .await;
        assert!(matches!(unknown, Err(ApiError::NotFound(_))));

        let deactivated = patch_service_handler(
            State(state),
            Path("feeds".into()),
            Json(ConfigUpdate {
                is_active: Some(false),
                ..ConfigUpdate::default()
            }),
        )
        .await
        .unwrap()
        .0;
        assert!(!deactivated.record.is_active);
        assert_eq!(deactivated.effective_mode, ConnectionMode::Disabled);
    }
}
