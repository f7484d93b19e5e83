//! Gatehouse application entry point.
//!
//! Loads configuration from a TOML file, initializes tracing (text or JSON,
//! stdout or file), assembles the virtual-host map, and runs the server
//! until a termination signal arrives. Every fatal error propagates here,
//! is logged once, and exits the process non-zero.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use gatehouse::app;
use gatehouse::config::{AppConfig, LoggingConfig, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER};
use gatehouse::{HostRouter, Server};

/// Gatehouse: a multi-tenant HTTPS server
#[derive(Parser, Debug)]
#[command(name = "gatehouse", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level filter (e.g., "gatehouse=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Config comes first: the logging setup depends on it
    let config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("gatehouse: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = init_tracing(&args, &config.logging) {
        eprintln!("gatehouse: failed to open log file: {err}");
        return ExitCode::FAILURE;
    }

    tracing::info!(config = %args.config, "Loaded configuration");

    let mut router = HostRouter::new();
    for vhost in &config.vhost {
        tracing::info!(name = %vhost.name, "Virtual host configured");
        router = router.host(vhost.name.clone(), app::vhost_app(vhost));
    }

    // Single sink for fatal errors: log and exit non-zero
    if let Err(err) = Server::new(config.server, router).run().await {
        tracing::error!(error = %err, "Fatal server error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Initialize tracing with filter priority: CLI > env > default.
///
/// A configured log file always gets JSON output; the file handle is owned
/// by the subscriber and released when the process exits.
fn init_tracing(args: &Args, logging: &LoggingConfig) -> Result<(), std::io::Error> {
    let filter = args
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let fmt_layer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Arc::new(file))
                .boxed()
        }
        None if logging.format == "json" => tracing_subscriber::fmt::layer().json().boxed(),
        None => tracing_subscriber::fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&filter))
        .with(fmt_layer)
        .init();
    Ok(())
}
