//! Tower middleware layers for the call pipeline.
//!
//! - [`admission`]: Priority admission control through the `AdmissionQueue`
//! - [`metrics`]: Per-call span, counters and duration histogram
//! - [`pipeline`]: Composes all layers around the `ConnectionRouter`

pub mod admission;
pub mod metrics;
pub mod pipeline;

pub use admission::AdmissionLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_call_pipeline, CallPipeline};
