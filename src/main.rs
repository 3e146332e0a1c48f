//! BleepGate -- S3-compatible gateway with a browser console.
//!
//! SIGTERM/SIGINT stop the listener from accepting connections; in-flight
//! requests get `server.shutdown_timeout` seconds to finish.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Notify;
use tracing::{info, warn};

use bleepgate::config::{Config, LoggingConfig};
use bleepgate::engine::MemoryEngine;

/// Command-line arguments for the BleepGate server.
#[derive(Parser, Debug)]
#[command(name = "bleepgate", version, about = "S3-compatible gateway with a browser console")]
struct Cli {
    /// Path to the YAML configuration file. Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => bleepgate::config::load_config(path)?,
        None => Config::default(),
    };
    if let Some(bind) = &cli.bind {
        let (host, port) = bind
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("--bind must be host:port, got {bind:?}"))?;
        config.server.host = host.to_string();
        config.server.port = port.parse()?;
    }

    init_logging(&config.logging);
    match &cli.config {
        Some(path) => info!("Loaded configuration from {path}"),
        None => info!("No configuration file given; using defaults"),
    }

    bleepgate::metrics::init_metrics(&config.observability)?;

    // Credential or route-table errors end the process here, before binding.
    let bind_addr = config.server.bind_addr();
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(bleepgate::AppState::new(config, Arc::new(MemoryEngine::new()))?);
    info!(
        access_key = state.signing.access_key(),
        region = state.signing.region(),
        console = state.config.console.enabled,
        prefix = %state.config.console.prefix,
        "Gateway initialized"
    );

    let app = bleepgate::server::app(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("BleepGate listening on {}", bind_addr);

    let stopping = Arc::new(Notify::new());
    let signal = {
        let stopping = Arc::clone(&stopping);
        async move {
            shutdown_signal().await;
            stopping.notify_one();
        }
    };
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .into_future();
    let deadline = async {
        stopping.notified().await;
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        result = server => result?,
        _ = deadline => {
            warn!("In-flight requests still running after {}s; exiting", shutdown_timeout.as_secs());
        }
    }

    info!("BleepGate shut down");
    Ok(())
}

/// Install the global subscriber.  `RUST_LOG` wins over `logging.level`.
fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
