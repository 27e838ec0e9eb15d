//! Call execution framework.
//!
//! 1. **Calls** (`call`, `client`): the request type and caller-facing API
//! 2. **Middleware** (`middleware`): Tower layers (admission, metrics)
//! 3. **Routing** (`router`): Local-first dispatch with Remote fallback
//! 4. **Lifecycle** (`lifecycle`): ordered init and reverse-order shutdown
//! 5. **Background workers** (`worker`): periodic tasks such as health probing

pub mod call;
pub mod client;
pub mod config;
pub mod lifecycle;
pub mod middleware;
pub mod router;
pub mod worker;

pub use call::ServiceCall;
pub use client::{CallClient, ServiceHandle};
pub use config::SwitchyardConfig;
pub use lifecycle::{ComponentContext, ComponentRegistry, ManagedComponent};
pub use router::ConnectionRouter;
pub use worker::{BackgroundRunnable, BackgroundWorker, WorkerSchedule};
