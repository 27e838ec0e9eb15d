//! JSON wire bodies of the remote dispatch contract.
//!
//! A remote call is `POST {remote_address}/{method}` with a [`CallArgs`] body;
//! a `200` response body is the call's return value. A service reports its
//! health on `GET {remote_address}/health` with a [`HealthReport`]. Failures
//! carry an [`ErrorBody`].

pub mod call;
pub mod health;

pub use call::{CallArgs, ErrorBody};
pub use health::HealthReport;
