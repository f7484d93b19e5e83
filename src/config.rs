//! Configuration loading and constants.
//!
//! Loads application configuration from TOML files and defines the defaults
//! for listen addresses, connection timeouts, the request body cap, and
//! logging. `AppConfig` is the root configuration struct; `ServerConfig` is
//! the part consumed by the server lifecycle.

use const_format::formatcp;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Listen Address Defaults
// =============================================================================

/// Default plaintext listen port
pub const DEFAULT_PLAIN_PORT: u16 = 8080;

/// Default TLS listen port
pub const DEFAULT_TLS_PORT: u16 = 8443;

/// Default plaintext listen address (all interfaces)
pub const DEFAULT_PLAIN_ADDR: &str = formatcp!(":{}", DEFAULT_PLAIN_PORT);

/// Default TLS listen address (all interfaces)
pub const DEFAULT_TLS_ADDR: &str = formatcp!(":{}", DEFAULT_TLS_PORT);

// =============================================================================
// Connection Timeout Defaults (seconds)
// =============================================================================

/// Time budget for reading a full request
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 20;

/// Time budget for reading the request headers
pub const DEFAULT_READ_HEADER_TIMEOUT_SECS: u64 = 10;

/// Time budget for writing the response
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 30;

/// How long an idle keep-alive connection is kept open.
/// Excluded from the graceful shutdown deadline: idle connections are
/// dropped immediately when the server drains.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

// =============================================================================
// Request Limits
// =============================================================================

/// Maximum accepted request body size in bytes
pub const MAX_REQUEST_BODY_BYTES: usize = 512 * 1024;

// =============================================================================
// Host Dispatch
// =============================================================================

/// Map key of the catch-all handler used when no virtual host matches
pub const DEFAULT_HOST_KEY: &str = "default";

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "gatehouse=debug,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server lifecycle configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Virtual hosts served by the binary
    #[serde(default)]
    pub vhost: Vec<VhostConfig>,
}

/// A PEM-encoded certificate/private-key pair.
///
/// Immutable once constructed; owned by the server's TLS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Certificate {
    /// PEM `CERTIFICATE` block
    pub certificate: String,
    /// PEM private key block (PKCS#8)
    pub private_key: String,
}

/// Server lifecycle configuration.
///
/// All durations default when absent; the listen address defaults based on
/// whether a TLS certificate source is configured.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address. Accepts Go-style `":8443"` (all interfaces) or a full
    /// `host:port` pair.
    pub addr: Option<String>,
    /// Certificate/key pairs to serve. Empty means plaintext unless
    /// `auto_certificate` is set or the listen address names a TLS port.
    pub certificates: Vec<Certificate>,
    /// Generate one self-signed certificate per configured virtual host when
    /// no certificates are supplied. An empty certificate list alone never
    /// triggers generation; a `:443`/`:8443` listen address does.
    pub auto_certificate: bool,
    pub read_timeout_seconds: u64,
    pub read_header_timeout_seconds: u64,
    pub write_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: None,
            certificates: Vec::new(),
            auto_certificate: false,
            read_timeout_seconds: DEFAULT_READ_TIMEOUT_SECS,
            read_header_timeout_seconds: DEFAULT_READ_HEADER_TIMEOUT_SECS,
            write_timeout_seconds: DEFAULT_WRITE_TIMEOUT_SECS,
            idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    /// Whether the server serves TLS: a certificate source is configured
    /// (supplied or generated), or the listen address names a conventional
    /// TLS port. An explicit `:443`/`:8443` address without certificates
    /// gets one generated per virtual host.
    pub fn tls_enabled(&self) -> bool {
        !self.certificates.is_empty()
            || self.auto_certificate
            || self.addr.as_deref().is_some_and(is_tls_port)
    }

    /// Effective listen address, defaulting per the TLS selection.
    pub fn listen_addr(&self) -> &str {
        match &self.addr {
            Some(addr) => addr,
            None if self.tls_enabled() => DEFAULT_TLS_ADDR,
            None => DEFAULT_PLAIN_ADDR,
        }
    }

    /// Parses the effective listen address into a socket address.
    /// A bare `":port"` binds on all interfaces.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = self.listen_addr();
        let full = if addr.starts_with(':') {
            format!("0.0.0.0{}", addr)
        } else {
            addr.to_string()
        };
        full.parse()
            .map_err(|_| ConfigError::Validation(format!("Invalid listen address: {:?}", addr)))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }

    pub fn read_header_timeout(&self) -> Duration {
        Duration::from_secs(self.read_header_timeout_seconds)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Deadline for graceful shutdown: the full read/header/write budget of
    /// an in-flight request. Idle connections are dropped immediately, so the
    /// idle timeout is excluded.
    pub fn shutdown_deadline(&self) -> Duration {
        self.read_timeout() + self.read_header_timeout() + self.write_timeout()
    }
}

/// Whether a listen address names a conventional TLS port
fn is_tls_port(addr: &str) -> bool {
    addr.ends_with(":443") || addr.ends_with(":8443")
}

/// Configuration for a single virtual host served by the binary
#[derive(Debug, Clone, Deserialize)]
pub struct VhostConfig {
    /// Host name the entry answers for. The literal name `"default"` makes
    /// this the catch-all for unmatched hosts.
    pub name: String,
    /// Optional greeting returned by the demo application
    pub message: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
    /// Append log output to this file instead of stdout. File output is
    /// always JSON-formatted.
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;

        // Validate: at least one virtual host must be configured
        if config.vhost.is_empty() {
            return Err(ConfigError::Validation(
                "No virtual hosts configured. Add [[vhost]] sections".to_string(),
            ));
        }

        // Validate: host names are map keys and must be unique
        let mut seen = std::collections::HashSet::new();
        for vhost in &config.vhost {
            if !seen.insert(vhost.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate virtual host name: {:?}",
                    vhost.name
                )));
            }
        }

        // Fail early on an unparseable listen address
        config.server.socket_addr()?;

        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}
