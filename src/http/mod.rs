//! Server lifecycle: TLS configuration, listener, and graceful shutdown.
//!
//! The server binds plaintext or TLS depending on the configured certificate
//! source, serves on a background task, blocks the controlling flow on
//! SIGINT/SIGTERM, and then drains in-flight requests under a bounded
//! deadline. When no certificates are supplied and auto-generation is opted
//! in, one self-signed certificate is minted per configured virtual host.

mod server;
mod shutdown;

pub use server::{Server, ServerError};
