//! Error taxonomy for routing, admission, storage, and dispatch.
//!
//! Callers receive a typed [`CallError`] so they can decide per kind whether
//! to retry, shed, or surface the failure.

use switchyard_core::{ConnectionMode, InvalidServiceName, Priority};

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Registry persistence failure. Treated as an infrastructure fault and
/// always surfaced, never swallowed.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("registry storage error: {0}")]
    Backend(#[from] anyhow::Error),
    #[error("stored record for {name:?} is corrupt: {reason}")]
    Corrupt { name: String, reason: String },
}

/// Errors from registry operations that accept new service names.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    InvalidName(#[from] InvalidServiceName),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failure of the cache store. Never propagated past `ConnectionCache`,
/// which falls through to the registry instead.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cache store unavailable: {0}")]
pub struct CacheStoreError(pub String);

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Rejections and cancellations produced by the admission queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("{priority} priority lane is full")]
    QueueFull { priority: Priority },
    #[error("{priority} priority call timed out after {timeout_ms}ms")]
    Timeout { priority: Priority, timeout_ms: u64 },
    #[error("admission queue is shutting down")]
    ShuttingDown,
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Failure of an in-process call target.
#[derive(Debug, thiserror::Error)]
pub enum LocalCallError {
    #[error("method {method:?} is not registered")]
    MethodNotFound { method: String },
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("call failed: {0}")]
    Failed(#[from] anyhow::Error),
}

impl LocalCallError {
    /// Shorthand for a [`LocalCallError::Failed`] with a plain message.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(anyhow::anyhow!("{message}"))
    }
}

/// Failure of a call or probe over the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("remote does not support method {method:?}")]
    UnsupportedMethod { method: String },
    #[error("remote returned HTTP {status}")]
    Status { status: u16 },
    #[error("remote call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not decode remote response: {0}")]
    Decode(String),
    #[error("invalid remote address {0:?}")]
    InvalidAddress(String),
}

// ---------------------------------------------------------------------------
// CallError
// ---------------------------------------------------------------------------

/// Error returned to callers of the routing pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Every attempted dispatch mode failed (or none was available).
    #[error("service {service:?} unavailable (attempted: [{}])", join_modes(.attempted_modes))]
    ServiceUnavailable {
        service: String,
        attempted_modes: Vec<ConnectionMode>,
    },
    /// The target exists but lacks the operation.
    #[error("service {service:?} does not support method {method:?}")]
    UnsupportedMethod { service: String, method: String },
    #[error("{priority} priority lane is full")]
    QueueFull { priority: Priority },
    #[error("{priority} priority call timed out after {timeout_ms}ms")]
    Timeout { priority: Priority, timeout_ms: u64 },
    #[error("switchyard is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CallError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable { .. } | Self::QueueFull { .. } | Self::Timeout { .. }
        )
    }

    /// Stable machine-readable kind, used in logs, metrics and error bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::UnsupportedMethod { .. } => "unsupported_method",
            Self::QueueFull { .. } => "queue_full",
            Self::Timeout { .. } => "timeout",
            Self::ShuttingDown => "shutting_down",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<AdmissionError> for CallError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::QueueFull { priority } => Self::QueueFull { priority },
            AdmissionError::Timeout {
                priority,
                timeout_ms,
            } => Self::Timeout {
                priority,
                timeout_ms,
            },
            AdmissionError::ShuttingDown => Self::ShuttingDown,
        }
    }
}

fn join_modes(modes: &[ConnectionMode]) -> String {
    modes
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_lists_attempted_modes() {
        let err = CallError::ServiceUnavailable {
            service: "ai_svc".to_string(),
            attempted_modes: vec![ConnectionMode::Local, ConnectionMode::Remote],
        };
        assert_eq!(
            err.to_string(),
            "service \"ai_svc\" unavailable (attempted: [local, remote])"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn admission_errors_keep_their_kind() {
        let full: CallError = AdmissionError::QueueFull {
            priority: Priority::Low,
        }
        .into();
        assert_eq!(full.kind(), "queue_full");

        let timeout: CallError = AdmissionError::Timeout {
            priority: Priority::High,
            timeout_ms: 5,
        }
        .into();
        assert!(matches!(
            timeout,
            CallError::Timeout {
                priority: Priority::High,
                timeout_ms: 5
            }
        ));
    }

    #[test]
    fn unsupported_method_is_not_retryable() {
        let err = CallError::UnsupportedMethod {
            service: "svc".to_string(),
            method: "nope".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(!CallError::ShuttingDown.is_retryable());
    }
}
