//! Admin HTTP server with deferred startup.
//!
//! `new()` assembles state, `start()` binds the listener, and `serve()`
//! accepts requests until shutdown. Binding before serving lets the caller
//! learn an OS-assigned port first.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::handlers::{
    clear_cache_handler, get_service_handler, health_handler, invalidate_service_handler,
    list_services_handler, liveness_handler, patch_service_handler, probe_all_handler,
    probe_service_handler, queue_stats_handler, readiness_handler, reconcile_mounts_handler,
    set_mode_handler, AppState,
};
use super::middleware::{build_http_layers, require_admin_token, track_in_flight};
use super::shutdown::ShutdownController;

/// How long `serve` waits for in-flight admin requests after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Serves the administrative JSON API.
pub struct AdminServer {
    state: AppState,
    listener: Option<TcpListener>,
}

impl AdminServer {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            listener: None,
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.state.shutdown)
    }

    /// Assembles every route and layer.
    ///
    /// Read-only routes are open; mutating routes pass the admin token check.
    pub fn build_router(&self) -> Router {
        let state = self.state.clone();

        let mutating = Router::new()
            .route("/services/{name}/mode", put(set_mode_handler))
            .route("/services/{name}", patch(patch_service_handler))
            .route("/cache", delete(clear_cache_handler))
            .route("/cache/{name}", delete(invalidate_service_handler))
            .route("/probe", post(probe_all_handler))
            .route("/probe/{name}", post(probe_service_handler))
            .route("/mounts/reconcile", post(reconcile_mounts_handler))
            .route_layer(from_fn_with_state(state.clone(), require_admin_token));

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/services", get(list_services_handler))
            .route("/services/{name}", get(get_service_handler))
            .route("/queue/stats", get(queue_stats_handler))
            .merge(mutating)
            .layer(from_fn_with_state(state.clone(), track_in_flight))
            .layer(build_http_layers(&state.config))
            .with_state(state)
    }

    /// Binds the configured address and returns the bound port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = self.state.config.bind_address();
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.state.config.host, port, "admin listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        let controller = self.shutdown_controller();

        controller.set_ready();
        info!("admin surface ready");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        controller.begin_shutdown();
        if controller.wait_for_drain(DRAIN_TIMEOUT).await {
            info!("admin requests drained");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "admin drain timed out"
            );
        }
        Ok(())
    }
}
