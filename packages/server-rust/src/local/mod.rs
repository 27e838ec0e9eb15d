//! In-process service targets and their mounting.

pub mod mounter;
pub mod target;

pub use mounter::{MountReport, Mounter};
pub use target::{LocalTarget, MethodTable, HEALTH_METHOD};
