//! Administrative HTTP surface: configuration, handlers, middleware, server
//! lifecycle and shutdown control.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::AdminConfig;
pub use handlers::{ApiError, AppState};
pub use module::AdminServer;
pub use shutdown::{InFlightGuard, LifecycleState, ShutdownController};
