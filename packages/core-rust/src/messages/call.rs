use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Positional and keyword arguments of a call.
///
/// Serialized as `{"args": [...], "kwargs": {...}}`; both keys may be omitted
/// by senders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl CallArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments with only positional values.
    #[must_use]
    pub fn positional(args: impl IntoIterator<Item = Value>) -> Self {
        Self {
            args: args.into_iter().collect(),
            kwargs: Map::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    #[must_use]
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Keyword argument lookup, falling back to the positional slot `index`.
    #[must_use]
    pub fn get(&self, key: &str, index: usize) -> Option<&Value> {
        self.kwargs.get(key).or_else(|| self.args.get(index))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

/// Error payload returned by the remote endpoint and the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable kind, e.g. `"unsupported_method"`.
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    #[must_use]
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
