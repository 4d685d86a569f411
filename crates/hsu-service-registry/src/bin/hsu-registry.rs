//! Standalone service registry server.
//!
//! # Rust Learning Note
//!
//! This is a **binary crate** (executable), not a library.
//!
//! - `src/lib.rs`: Library code (can be used by other crates)
//! - `src/bin/name.rs`: Executable (has a `main` function)
//!
//! A single crate can have both a library AND multiple binaries.

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use hsu_service_registry::{RegistryConfig, RegistryServer};

/// HSU Service Registry - service registration and discovery
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML). Defaults apply when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Host to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RegistryConfig::load_from_file(path)?,
        None => RegistryConfig::default(),
    };

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    let level = if args.debug {
        "debug".to_string()
    } else {
        config.server.log_level.clone()
    };
    initialize_logging(&level);

    info!("Starting HSU Service Registry");
    if let Some(path) = &args.config {
        info!("Config file: {}", path);
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_token.cancel();
    });

    RegistryServer::new(config).run(shutdown).await?;

    info!("Service registry shut down successfully");
    Ok(())
}

fn initialize_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = signal::ctrl_c().await;
                info!("Received Ctrl+C signal");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM signal");
            }
            _ = signal::ctrl_c() => {
                info!("Received SIGINT signal");
            }
        }
    }

    #[cfg(windows)]
    {
        let _ = signal::ctrl_c().await;
        info!("Received Ctrl+C signal");
    }
}
