//! Service health probing.
//!
//! [`HealthProber`] runs one probe cycle; [`HealthMonitor`] repeats it on a
//! background worker and accepts on-demand probe requests.

pub mod monitor;
pub mod prober;

pub use monitor::{HealthMonitor, HealthTask};
pub use prober::{HealthProber, ProbeMethod, ProbeReport};
