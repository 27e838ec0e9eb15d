//! The request type flowing through the call pipeline.

use std::time::Duration;

use serde_json::Value;
use switchyard_core::{CallArgs, Priority};

/// One call of `method` on `service`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    pub service: String,
    pub method: String,
    pub args: CallArgs,
    /// Admission lane; defaults to `Medium`.
    pub priority: Priority,
    /// Budget for queueing plus execution. `None` means unbounded admission
    /// and the remote transport's default timeout.
    pub timeout: Option<Duration>,
}

impl ServiceCall {
    #[must_use]
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            args: CallArgs::new(),
            priority: Priority::default(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: CallArgs) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args = self.args.arg(value);
        self
    }

    #[must_use]
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args = self.args.kwarg(key, value);
        self
    }

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
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn builder_defaults_and_overrides() {
        let call = ServiceCall::new("ai_svc", "summarize");
        assert_eq!(call.priority, Priority::Medium);
        assert!(call.args.is_empty());
        assert!(call.timeout.is_none());

        let call = call
            .arg("text")
            .kwarg("lang", "en")
            .with_priority(Priority::High)
            .with_timeout(Duration::from_secs(2));
        assert_eq!(call.args.args, vec![json!("text")]);
        assert_eq!(call.args.kwargs.get("lang"), Some(&json!("en")));
        assert_eq!(call.priority, Priority::High);
        assert_eq!(call.timeout, Some(Duration::from_secs(2)));
    }
}
