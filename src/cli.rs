//! CLI entry point: argument parsing, config assembly, tracing setup and
//! signal-driven shutdown.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{
    Config, LoggingConfig, load_config, split_target_list, validate_config,
};

/// Balancer CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tcplb",
    version,
    about = "Transparent round-robin TCP load balancer"
)]
pub struct Args {
    /// Backend targets as `host:port` pairs separated by `;`
    /// (e.g. "localhost:11000;localhost:11001").
    pub targets: Option<String>,

    /// Config file path (toml).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen address override (ip:port).
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Connect timeout override (seconds).
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Log level override (e.g. "info", "debug", "trace").
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Run the balancer with the given CLI arguments.
pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    apply_overrides(&mut config, &args)?;
    validate_config(&config)?;

    init_tracing(&config.logging);

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal_handler().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    crate::server::run_with_shutdown(config, shutdown)
        .await
        .map_err(Into::into)
}

/// Fold CLI arguments over the file-based configuration.
fn apply_overrides(config: &mut Config, args: &Args) -> Result<(), crate::BalancerError> {
    if let Some(targets) = &args.targets {
        config.targets = split_target_list(targets)?;
    }
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(secs) = args.connect_timeout {
        config.timeouts.connect_timeout_secs = secs;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = Some(level.clone());
    }
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing(config: &LoggingConfig) {
    let level = config.level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}
