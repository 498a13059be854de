//! chunkyard -- chunked upload server.
//!
//! Crash-only design: chunks are durable once acknowledged and a restart
//! needs no recovery pass.  Interrupted uploads are left to the
//! reclamation sweep.  SIGTERM/SIGINT stop accepting connections and wait
//! for in-flight requests up to the configured timeout.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use chunkyard::config::{Config, LoggingConfig};
use chunkyard::reclaim::Reclaimer;

const DEFAULT_CONFIG_PATH: &str = "chunkyard.yaml";

/// Command-line arguments for the chunkyard server.
#[derive(Parser, Debug)]
#[command(name = "chunkyard", version, about = "Chunked upload server")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, config_source) = load(cli.config.as_deref())?;

    init_tracing(&config.logging);
    info!("Configuration: {}", config_source);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        chunkyard::metrics::init_metrics();
        chunkyard::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let state = Arc::new(chunkyard::AppState::from_config(config.clone())?);

    let reclaimer = if config.reclaim.enabled {
        let reclaimer = Arc::new(Reclaimer::new(
            Arc::clone(state.uploads.store()),
            state.uploads.guards().clone(),
            &config.reclaim,
        ));
        if reclaimer.start().is_some() {
            info!(
                "Reclamation sweep every {}s (ttl {}s)",
                config.reclaim.interval_seconds, config.reclaim.ttl_seconds
            );
        }
        Some(reclaimer)
    } else {
        None
    };

    let app = chunkyard::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("chunkyard listening on {}", bind_addr);

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    let server = tokio::spawn(async move { server.await });

    // Bound the drain only once a signal has arrived.
    tokio::select! {
        res = server => {
            res??;
        }
        _ = async {
            shutdown_signal().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            warn!("In-flight requests still running after {}s, exiting", shutdown_timeout.as_secs());
        }
    }

    if let Some(reclaimer) = reclaimer {
        reclaimer.stop();
    }
    info!("chunkyard shut down");

    Ok(())
}

/// Load the config file.  A missing file is only an error when the path was
/// given explicitly.
fn load(path: Option<&str>) -> anyhow::Result<(Config, String)> {
    match path {
        Some(path) => Ok((chunkyard::config::load_config(path)?, path.to_string())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Ok((
            chunkyard::config::load_config(DEFAULT_CONFIG_PATH)?,
            DEFAULT_CONFIG_PATH.to_string(),
        )),
        None => Ok((Config::default(), "built-in defaults".to_string())),
    }
}

/// Initialize tracing.  `RUST_LOG` overrides `logging.level`.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
