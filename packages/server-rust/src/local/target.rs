//! In-process call targets.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use switchyard_core::{CallArgs, HealthStatus};

use crate::error::LocalCallError;

/// Name of the optional method a target may expose to report its own health.
pub const HEALTH_METHOD: &str = "health";

/// An in-process implementation of a service, addressed by method name.
///
/// `has_method` must be answerable without calling anything, so the router
/// can tell an unsupported method apart from a failed one.
#[async_trait]
pub trait LocalTarget: Send + Sync {
    fn has_method(&self, method: &str) -> bool;

    /// Names of every callable method, sorted.
    fn methods(&self) -> Vec<String>;

    /// # Errors
    ///
    /// [`LocalCallError::MethodNotFound`] for an unknown method, or whatever
    /// the method itself fails with.
    async fn call(&self, method: &str, args: CallArgs) -> Result<Value, LocalCallError>;

    /// Self-reported health. A target that is loaded and answers is assumed
    /// healthy.
    ///
    /// # Errors
    ///
    /// Any error means the target could not be checked; probers treat it as
    /// `Down`.
    async fn health(&self) -> Result<HealthStatus, LocalCallError> {
        Ok(HealthStatus::Healthy)
    }
}

// ---------------------------------------------------------------------------
// MethodTable
// ---------------------------------------------------------------------------

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, LocalCallError>> + Send>>;
type Handler = Arc<dyn Fn(CallArgs) -> HandlerFuture + Send + Sync>;

/// A string-keyed dispatch table of async handlers.
///
/// ```ignore
/// let target = MethodTable::new()
///     .method("echo", |args| async move { Ok(serde_json::json!(args.args)) });
/// ```
#[derive(Clone, Default)]
pub struct MethodTable {
    handlers: BTreeMap<String, Handler>,
}

impl MethodTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any previous handler.
    ///
    /// A handler named [`HEALTH_METHOD`] also backs [`LocalTarget::health`].
    #[must_use]
    pub fn method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, LocalCallError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args| Box::pin(handler(args)));
        self.handlers.insert(name.into(), handler);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Reads a health method's return value: a bare status string or an object
/// with a `status` key. Anything else reads as `Degraded`.
fn status_from_value(value: &Value) -> HealthStatus {
    let status = match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("status").and_then(Value::as_str),
        _ => None,
    };
    status
        .and_then(|s| s.parse().ok())
        .unwrap_or(HealthStatus::Degraded)
}

#[async_trait]
impl LocalTarget for MethodTable {
    fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    fn methods(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    async fn call(&self, method: &str, args: CallArgs) -> Result<Value, LocalCallError> {
        let handler = self
            .handlers
            .get(method)
            .ok_or_else(|| LocalCallError::MethodNotFound {
                method: method.to_string(),
            })?;
        handler(args).await
    }

    async fn health(&self) -> Result<HealthStatus, LocalCallError> {
        match self.handlers.get(HEALTH_METHOD) {
            Some(handler) => Ok(status_from_value(&handler(CallArgs::new()).await?)),
            None => Ok(HealthStatus::Healthy),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn echo_table() -> MethodTable {
        MethodTable::new()
            .method("echo", |args: CallArgs| async move {
                Ok(json!({"args": args.args}))
            })
            .method("fail", |_| async { Err(LocalCallError::failed("nope")) })
    }

    #[tokio::test]
    async fn dispatches_by_name() {
        let table = echo_table();
        let out = table
            .call("echo", CallArgs::new().arg("hi"))
            .await
            .unwrap();
        assert_eq!(out, json!({"args": ["hi"]}));
        assert_eq!(table.methods(), vec!["echo".to_string(), "fail".to_string()]);
    }

    #[tokio::test]
    async fn unknown_method_is_distinguishable() {
        let table = echo_table();
        assert!(!table.has_method("missing"));
        let err = table.call("missing", CallArgs::new()).await.unwrap_err();
        assert!(matches!(err, LocalCallError::MethodNotFound { method } if method == "missing"));

        let err = table.call("fail", CallArgs::new()).await.unwrap_err();
        assert!(matches!(err, LocalCallError::Failed(_)));
    }

    #[tokio::test]
    async fn health_defaults_to_healthy() {
        assert_eq!(echo_table().health().await.unwrap(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn explicit_health_method_is_used() {
        let table = MethodTable::new()
            .method(HEALTH_METHOD, |_| async { Ok(json!({"status": "degraded"})) });
        assert_eq!(table.health().await.unwrap(), HealthStatus::Degraded);

        let table = MethodTable::new().method(HEALTH_METHOD, |_| async { Ok(json!("down")) });
        assert_eq!(table.health().await.unwrap(), HealthStatus::Down);

        let table = MethodTable::new().method(HEALTH_METHOD, |_| async {
            Err(LocalCallError::failed("db unreachable"))
        });
        assert!(table.health().await.is_err());
    }
}
