//! Connection routing: dispatches a [`ServiceCall`] to the service's local
//! target or its remote address, falling back from Local to Remote.
//!
//! Every failed mode is written back as a health downgrade before the next
//! mode is tried. The registry's observers evict the cached decision during
//! that write, so a concurrent caller arriving right after does not retry
//! the same dead path.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use switchyard_core::{CallArgs, ConnectionMode, HealthStatus, ServiceRecord};
use tower::Service;
use tracing::{debug, warn};

use super::call::ServiceCall;
use crate::cache::ConnectionCache;
use crate::error::{CallError, LocalCallError, RemoteError};
use crate::local::Mounter;
use crate::registry::Registry;
use crate::remote::RemoteTransport;

/// Why a local attempt did not produce a value.
enum LocalFailure {
    /// The target exists but lacks the method.
    Unsupported,
    Failed(String),
}

// ---------------------------------------------------------------------------
// ConnectionRouter
// ---------------------------------------------------------------------------

/// Resolves the effective mode of a service and performs the call.
///
/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct ConnectionRouter {
    registry: Arc<Registry>,
    cache: Arc<ConnectionCache>,
    mounter: Arc<Mounter>,
    transport: Arc<dyn RemoteTransport>,
}

impl ConnectionRouter {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        cache: Arc<ConnectionCache>,
        mounter: Arc<Mounter>,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        Self {
            registry,
            cache,
            mounter,
            transport,
        }
    }

    /// Performs `call`, preferring Local and falling back to Remote.
    ///
    /// # Errors
    ///
    /// - [`CallError::ServiceUnavailable`] when the service is unknown,
    ///   inactive, disabled, or every attempted mode failed
    /// - [`CallError::UnsupportedMethod`] when the target lacks the method;
    ///   no other mode is tried
    /// - [`CallError::Storage`] if the registry cannot be read
    pub async fn dispatch(&self, call: ServiceCall) -> Result<Value, CallError> {
        let ServiceCall {
            service,
            method,
            args,
            timeout,
            ..
        } = call;

        let record = match self.registry.get(&service).await? {
            Some(record) if record.is_active => record,
            _ => return Err(unavailable(service, Vec::new())),
        };

        let mode = self.cache.effective_mode(&service).await;
        debug!(%service, %method, %mode, "routing call");

        let mut attempted = Vec::with_capacity(2);

        if mode == ConnectionMode::Local {
            attempted.push(ConnectionMode::Local);
            match self.call_local(&service, &method, args.clone()).await {
                Ok(value) => {
                    count(ConnectionMode::Local, "ok");
                    return Ok(value);
                }
                Err(LocalFailure::Unsupported) => {
                    count(ConnectionMode::Local, "unsupported");
                    return Err(CallError::UnsupportedMethod { service, method });
                }
                Err(LocalFailure::Failed(reason)) => {
                    count(ConnectionMode::Local, "error");
                    warn!(%service, %method, %reason, "local call failed");
                    self.downgrade(&service, HealthStatus::Degraded).await;
                }
            }
        }

        let remote_allowed = match mode {
            ConnectionMode::Remote => true,
            ConnectionMode::Local => record.remote_address.is_some(),
            ConnectionMode::Disabled => false,
        };
        let Some(address) = record.remote_address.as_deref().filter(|_| remote_allowed) else {
            return Err(unavailable(service, attempted));
        };

        attempted.push(ConnectionMode::Remote);
        match self.transport.call(address, &method, &args, timeout).await {
            Ok(value) => {
                count(ConnectionMode::Remote, "ok");
                Ok(value)
            }
            Err(RemoteError::UnsupportedMethod { .. }) => {
                count(ConnectionMode::Remote, "unsupported");
                Err(CallError::UnsupportedMethod { service, method })
            }
            Err(e) => {
                count(ConnectionMode::Remote, "error");
                warn!(%service, %method, %address, error = %e, "remote call failed");
                self.downgrade(&service, HealthStatus::Down).await;
                Err(unavailable(service, attempted))
            }
        }
    }

    async fn call_local(
        &self,
        service: &str,
        method: &str,
        args: CallArgs,
    ) -> Result<Value, LocalFailure> {
        let Some(target) = self.mounter.get(service) else {
            return Err(LocalFailure::Failed("no local target mounted".to_string()));
        };
        if !target.has_method(method) {
            return Err(LocalFailure::Unsupported);
        }
        match target.call(method, args).await {
            Ok(value) => Ok(value),
            Err(LocalCallError::MethodNotFound { .. }) => Err(LocalFailure::Unsupported),
            Err(e) => Err(LocalFailure::Failed(e.to_string())),
        }
    }

    /// Records a mode failure. Storage trouble here must not mask the call
    /// outcome, so it is only logged.
    async fn downgrade(&self, service: &str, status: HealthStatus) {
        let now = self.registry.clock().now();
        if let Err(e) = self.registry.set_health(service, status, now).await {
            warn!(service, error = %e, "failed to record health downgrade");
        }
    }

    /// The record a call to `service` would be routed by, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Storage`] if the registry cannot be read.
    pub async fn record(&self, service: &str) -> Result<Option<ServiceRecord>, CallError> {
        Ok(self.registry.get(service).await?)
    }
}

fn unavailable(service: String, attempted_modes: Vec<ConnectionMode>) -> CallError {
    CallError::ServiceUnavailable {
        service,
        attempted_modes,
    }
}

fn count(mode: ConnectionMode, outcome: &'static str) {
    metrics::counter!("switchyard_calls_total", "mode" => mode.as_str(), "outcome" => outcome)
        .increment(1);
}

impl Service<ServiceCall> for ConnectionRouter {
    type Response = Value;
    type Error = CallError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, CallError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: ServiceCall) -> Self::Future {
        let router = self.clone();
        Box::pin(async move { router.dispatch(call).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
