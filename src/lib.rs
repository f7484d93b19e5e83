//! Gatehouse - multi-tenant HTTPS server core.
//!
//! Resolves each request to a per-virtual-host handler, provisions
//! self-signed TLS certificates on demand when none are configured, and
//! manages the listen/shutdown lifecycle with a bounded graceful-termination
//! deadline. Per-host routing stays with the supplied handlers; this crate
//! only routes between hosts.

pub mod app;
pub mod ca;
pub mod config;
pub mod http;
pub mod middleware;
pub mod vhost;

pub use ca::{CaError, KeyAlgorithm};
pub use config::{AppConfig, Certificate, ServerConfig};
pub use http::{Server, ServerError};
pub use vhost::HostRouter;
