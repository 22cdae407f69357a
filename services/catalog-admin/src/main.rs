//! Catalog admin CLI
//!
//! Command-line client for the catalog API:
//! 1. Loads config (TOML + env overrides)
//! 2. Restores the stored token pair from `auth.token_file`
//! 3. Runs one command through the cached resources, refreshing the access
//!    token transparently when it expires
//! 4. Prints the result as pretty JSON on stdout; logs go to stderr

mod commands;
mod config;
mod metrics;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use catalog_api::Catalog;
use catalog_auth::FileTokenStore;
use catalog_transport::{CancellationToken, Transport};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::Command;
use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "catalog-admin", version, about = "Manage the product catalog")]
struct Cli {
    /// Config file (defaults to CONFIG_PATH, then ./catalog-admin.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print collected metrics to stderr on exit
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // JSON logs on stderr, LOG_LEVEL / RUST_LOG filter; stdout is for output
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let prometheus = metrics::install_recorder()?;

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.api.base_url,
        refresh_url = %config.api.refresh_url(),
        token_file = %config.auth.token_file.display(),
        "configuration loaded"
    );

    let Config { api, auth, cache } = config;

    let store = FileTokenStore::load(auth.token_file.clone())
        .await
        .with_context(|| format!("failed to load tokens from {}", auth.token_file.display()))?;
    let transport =
        Transport::new(api, Arc::new(store)).context("failed to build HTTP transport")?;
    let catalog = Catalog::with_options(transport, cache.resource_options());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        on_signal.cancel();
    });

    let result = commands::run(cli.command, &catalog, &auth, &cancel).await;

    if cli.metrics {
        eprintln!("{}", prometheus.render());
    }

    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. In-flight requests are cancelled, not
/// drained.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, cancelling"),
        _ = terminate => info!("received SIGTERM, cancelling"),
    }
}
