//! Admission middleware: every call passes its priority lane before running.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use tower::{Layer, Service};

use crate::admission::AdmissionQueue;
use crate::error::CallError;
use crate::service::call::ServiceCall;

// ---------------------------------------------------------------------------
// AdmissionLayer
// ---------------------------------------------------------------------------

/// Tower layer that submits each call to an [`AdmissionQueue`] using the
/// call's priority and timeout.
#[derive(Clone)]
pub struct AdmissionLayer {
    queue: Arc<AdmissionQueue>,
}

impl AdmissionLayer {
    #[must_use]
    pub fn new(queue: Arc<AdmissionQueue>) -> Self {
        Self { queue }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            queue: Arc::clone(&self.queue),
        }
    }
}

// ---------------------------------------------------------------------------
// AdmissionService
// ---------------------------------------------------------------------------

/// Rejects with `QueueFull` when the lane is saturated, and cancels with
/// `Timeout` when the call's budget runs out while queued or running.
#[derive(Clone)]
pub struct AdmissionService<S> {
    inner: S,
    queue: Arc<AdmissionQueue>,
}

impl<S> Service<ServiceCall> for AdmissionService<S>
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
        let priority = call.priority;
        let timeout = call.timeout;
        let queue = Arc::clone(&self.queue);
        // The inner future does no work until polled, which happens only once
        // the lane admits it.
        let fut = self.inner.call(call);

        Box::pin(async move { queue.submit(fut, priority, timeout).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use switchyard_core::Priority;
    use tower::ServiceExt;

    use super::*;
    use crate::service::config::{AdmissionConfig, LaneConfig};

    /// Sleeps for the duration given as the first argument (ms), then echoes it.
    #[derive(Clone)]
    struct Sleeper;

    impl Service<ServiceCall> for Sleeper {
        type Response = Value;
        type Error = CallError;
        type Future = Pin<Box<dyn Future<Output = Result<Value, CallError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, call: ServiceCall) -> Self::Future {
            let ms = call.args.args.first().and_then(Value::as_u64).unwrap_or(0);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!(ms))
            })
        }
    }

    fn queue() -> Arc<AdmissionQueue> {
        Arc::new(AdmissionQueue::new(&AdmissionConfig {
            high: LaneConfig::new(1, 0),
            medium: LaneConfig::new(1, 0),
            low: LaneConfig::new(1, 0),
            drain_timeout: Duration::from_secs(1),
        }))
    }

    #[tokio::test]
    async fn passes_through_when_admitted() {
        let svc = AdmissionLayer::new(queue()).layer(Sleeper);
        let out = svc
            .oneshot(ServiceCall::new("svc", "m").arg(1))
            .await
            .unwrap();
        assert_eq!(out, json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_lane_rejects_as_queue_full() {
        let q = queue();
        let layer = AdmissionLayer::new(Arc::clone(&q));

        let busy = tokio::spawn(
            layer
                .layer(Sleeper)
                .oneshot(ServiceCall::new("svc", "m").arg(1_000).with_priority(Priority::High)),
        );
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let err = layer
            .layer(Sleeper)
            .oneshot(ServiceCall::new("svc", "m").with_priority(Priority::High))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CallError::QueueFull {
                priority: Priority::High
            }
        ));

        // Other lanes are unaffected.
        let ok = layer
            .layer(Sleeper)
            .oneshot(ServiceCall::new("svc", "m").with_priority(Priority::Low))
            .await;
        assert!(ok.is_ok());

        busy.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn call_timeout_maps_to_call_error() {
        let svc = AdmissionLayer::new(queue()).layer(Sleeper);
        let err = svc
            .oneshot(
                ServiceCall::new("svc", "m")
                    .arg(5_000)
                    .with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CallError::Timeout {
                priority: Priority::Medium,
                timeout_ms: 100
            }
        ));
    }
}
