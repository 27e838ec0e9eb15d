//! Metrics middleware for calls.
//!
//! Wraps each call in a `call` span, logs its outcome, and records
//! `switchyard_call_duration_seconds` labelled by service and outcome.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use serde_json::Value;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::error::CallError;
use crate::service::call::ServiceCall;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments calls with timing and outcome.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<ServiceCall> for MetricsService<S>
where
    S: Service<ServiceCall, Response = Value, Error = CallError> + Send,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = CallError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, CallError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: ServiceCall) -> Self::Future {
        let service = call.service.clone();
        let method = call.method.clone();
        let priority = call.priority.as_str();

        let span = info_span!(
            "call",
            service = %service,
            method = %method,
            priority = priority,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(e) => e.kind(),
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                ::metrics::histogram!(
                    "switchyard_call_duration_seconds",
                    "service" => service.clone(),
                    "outcome" => outcome
                )
                .record(elapsed.as_secs_f64());

                tracing::debug!(
                    service = %service,
                    method = %method,
                    duration_ms,
                    outcome,
                    "call complete"
                );

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
