//! Caller-facing entry point: single calls, per-service handles and
//! concurrent fan-out.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use switchyard_core::{CallArgs, Priority};
use tower::{Layer, ServiceExt};

use super::call::ServiceCall;
use super::middleware::{build_call_pipeline, CallPipeline, MetricsLayer};
use super::router::ConnectionRouter;
use crate::admission::{AdmissionQueue, GatherPolicy};
use crate::error::CallError;

/// Issues calls through the full pipeline.
#[derive(Clone)]
pub struct CallClient {
    pipeline: CallPipeline,
    router: ConnectionRouter,
    queue: Arc<AdmissionQueue>,
}

impl CallClient {
    #[must_use]
    pub fn new(router: ConnectionRouter, queue: Arc<AdmissionQueue>) -> Self {
        Self {
            pipeline: build_call_pipeline(router.clone(), Arc::clone(&queue)),
            router,
            queue,
        }
    }

    /// Performs one call.
    ///
    /// # Errors
    ///
    /// Any [`CallError`] from admission or routing.
    pub async fn call(&self, call: ServiceCall) -> Result<Value, CallError> {
        self.pipeline.clone().oneshot(call).await
    }

    /// A handle bound to one service name.
    #[must_use]
    pub fn service(&self, name: impl Into<String>) -> ServiceHandle {
        ServiceHandle {
            client: self.clone(),
            service: name.into(),
            priority: Priority::default(),
            timeout: None,
        }
    }

    /// Runs `calls` concurrently in `priority`'s lane, at most `concurrency`
    /// at a time. Each call's own priority is ignored; its timeout applies to
    /// its execution.
    ///
    /// # Errors
    ///
    /// Under [`GatherPolicy::AllOrNothing`], the first failing call's error.
    pub async fn gather(
        &self,
        calls: Vec<ServiceCall>,
        priority: Priority,
        concurrency: usize,
        policy: GatherPolicy,
    ) -> Result<Vec<Result<Value, CallError>>, CallError> {
        let operations = calls.into_iter().map(|call| {
            let timeout = call.timeout;
            let fut = MetricsLayer.layer(self.router.clone()).oneshot(call);
            async move {
                match timeout {
                    Some(limit) => match tokio::time::timeout(limit, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(timed_out(priority, limit)),
                    },
                    None => fut.await,
                }
            }
        });

        self.queue
            .gather(operations, priority, concurrency, policy)
            .await
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<AdmissionQueue> {
        &self.queue
    }
}

fn timed_out(priority: Priority, limit: Duration) -> CallError {
    CallError::Timeout {
        priority,
        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
    }
}

// ---------------------------------------------------------------------------
// ServiceHandle
// ---------------------------------------------------------------------------

/// Calls methods on one service with a fixed priority and timeout.
#[derive(Clone)]
pub struct ServiceHandle {
    client: CallClient,
    service: String,
    priority: Priority,
    timeout: Option<Duration>,
}

impl ServiceHandle {
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.service
    }

    /// Calls `method` with `args`.
    ///
    /// # Errors
    ///
    /// Same as [`CallClient::call`].
    pub async fn call(&self, method: impl Into<String>, args: CallArgs) -> Result<Value, CallError> {
        let mut call = ServiceCall::new(self.service.clone(), method)
            .with_args(args)
            .with_priority(self.priority);
        call.timeout = self.timeout;
        self.client.call(call).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;
    use switchyard_core::ServiceMetadata;

    use super::*;
    use crate::error::RemoteError;
    use crate::local::{LocalTarget, MethodTable};
    use crate::service::config::AdmissionConfig;
    use crate::service::router::tests::{FakeTransport, Fixture};

    fn echo() -> Arc<dyn LocalTarget> {
        Arc::new(
            MethodTable::new()
                .method("echo", |args: CallArgs| async move {
                    Ok(args.get("v", 0).cloned().unwrap_or(Value::Null))
                })
                .method("slow", |_args: CallArgs| async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Value::Null)
                }),
        )
    }

    async fn client(fx: &Fixture, transport: Arc<FakeTransport>) -> CallClient {
        fx.local_service("svc", echo(), None).await;
        CallClient::new(
            fx.router(transport),
            Arc::new(AdmissionQueue::new(&AdmissionConfig::default())),
        )
    }

    #[tokio::test]
    async fn handle_calls_local_target() {
        let fx = Fixture::new();
        let transport = FakeTransport::replying(Ok(Value::Null));
        let client = client(&fx, Arc::clone(&transport)).await;

        let out = client
            .service("svc")
            .with_priority(Priority::High)
            .call("echo", CallArgs::new().kwarg("v", 7))
            .await
            .unwrap();
        assert_eq!(out, json!(7));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.queue().stats().lanes[Priority::High.index()].processed, 1);
    }

    #[tokio::test]
    async fn gather_keeps_order_and_partial_failures() {
        let fx = Fixture::new();
        let client = client(&fx, FakeTransport::replying(Err(RemoteError::Transport("refused".into())))).await;

        let results = client
            .gather(
                vec![
                    ServiceCall::new("svc", "echo").arg(1),
                    ServiceCall::new("nope", "echo"),
                    ServiceCall::new("svc", "echo").arg(3),
                ],
                Priority::Low,
                2,
                GatherPolicy::PartialOk,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), &json!(1));
        assert!(matches!(results[1], Err(CallError::ServiceUnavailable { .. })));
        assert_eq!(results[2].as_ref().unwrap(), &json!(3));
    }

    #[tokio::test]
    async fn gather_all_or_nothing_surfaces_first_error() {
        let fx = Fixture::new();
        let client = client(&fx, FakeTransport::replying(Ok(Value::Null))).await;

        let err = client
            .gather(
                vec![
                    ServiceCall::new("svc", "echo").arg(1),
                    ServiceCall::new("svc", "missing"),
                ],
                Priority::Medium,
                4,
                GatherPolicy::AllOrNothing,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::UnsupportedMethod { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn gather_applies_per_call_timeout() {
        let fx = Fixture::new();
        let client = client(&fx, FakeTransport::replying(Ok(Value::Null))).await;

        let results = client
            .gather(
                vec![ServiceCall::new("svc", "slow").with_timeout(Duration::from_millis(50))],
                Priority::Medium,
                1,
                GatherPolicy::PartialOk,
            )
            .await
            .unwrap();
        assert!(matches!(
            results[0],
            Err(CallError::Timeout { timeout_ms: 50, .. })
        ));
    }
}
