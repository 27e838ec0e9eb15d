//! Calling services that run in another process.

pub mod endpoint;
pub mod transport;

pub use endpoint::{remote_endpoint_router, remote_endpoint_router_with_token};
pub use transport::{HttpTransport, RemoteHealth, RemoteTransport, SERVICE_TOKEN_HEADER};
