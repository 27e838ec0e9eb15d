//! Pipeline composition: wraps the router with every call-level layer.

use std::sync::Arc;

use tower::ServiceBuilder;

use super::admission::{AdmissionLayer, AdmissionService};
use super::metrics::{MetricsLayer, MetricsService};
use crate::admission::AdmissionQueue;
use crate::service::router::ConnectionRouter;

/// The composed call pipeline. Cheap to clone.
pub type CallPipeline = AdmissionService<MetricsService<ConnectionRouter>>;

/// Builds the call pipeline around `router`.
///
/// Layer order (outermost to innermost):
/// 1. `AdmissionLayer` -- reject or queue by priority before doing any work
/// 2. `MetricsLayer` -- time the admitted call, closest to the actual dispatch
///
/// The returned service implements
/// `tower::Service<ServiceCall, Response = serde_json::Value, Error = CallError>`.
#[must_use]
pub fn build_call_pipeline(router: ConnectionRouter, queue: Arc<AdmissionQueue>) -> CallPipeline {
    ServiceBuilder::new()
        .layer(AdmissionLayer::new(queue))
        .layer(MetricsLayer)
        .service(router)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
