//! wst-server: WebSocket tunnel server.
//!
//! Accepts WebSocket connections, reads a VLESS-style request header from
//! the first binary frame, authenticates the client identifier and relays
//! bytes to the requested TCP destination until either side closes.

mod config;
mod relay;
mod server;
mod transport;

use clap::Parser;
use config::{CliOverrides, ServerConfig};
use server::WstServer;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// wst-server: WebSocket tunnel server
#[derive(Parser, Debug)]
#[command(name = "wst-server", version, about = "WebSocket to TCP tunnel server")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    listen: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.wst/config.toml")]
    config: String,

    /// Authorized client identifier (UUID); may be repeated
    #[arg(long = "uuid")]
    uuids: Vec<String>,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Destination connect timeout in seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Idle timeout in seconds (0 disables)
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting wst-server");

    let overrides = CliOverrides {
        listen: cli.listen,
        port: cli.port,
        uuids: cli.uuids,
        max_sessions: cli.max_sessions,
        connect_timeout: cli.connect_timeout,
        idle_timeout: cli.idle_timeout,
    };

    // Load server config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let wst_server = WstServer::new(server_config);

    tokio::select! {
        result = wst_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("wst-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
