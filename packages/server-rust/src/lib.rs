//! Switchyard Server: adaptive local/remote call routing with health
//! probing and priority admission control.
//!
//! - [`registry`] and [`cache`]: service records and cached routing decisions
//! - [`service`]: the call pipeline, router and component lifecycle
//! - [`admission`]: per-priority concurrency and queue-depth limits
//! - [`health`]: background probing
//! - [`local`] and [`remote`]: in-process targets and the HTTP transport
//! - [`network`]: the administrative HTTP surface

pub mod admission;
pub mod app;
pub mod cache;
pub mod cli;
pub mod error;
pub mod health;
pub mod local;
pub mod network;
pub mod registry;
pub mod remote;
pub mod service;
pub mod telemetry;

pub use app::Switchyard;
pub use error::{AdmissionError, CallError, StorageError};
pub use service::{CallClient, ServiceCall, ServiceHandle};
