//! easel-server – entry point.
//!
//! Startup order:
//! 1. Parse the command line and configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Open the task and gallery stores, failing tasks a previous run left
//!    unfinished.
//! 4. Build the Axum router and start the HTTP server with graceful shutdown.
//!
//! `easel-server reconcile-gallery` instead rebuilds gallery records for
//! image files that have none, then exits.

mod accounts;
mod config;
mod error;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use easel_core::GalleryStore;
use tracing::{info, warn};

use crate::config::Config;
use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "easel-server", version, about = "Image generation task server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Add records for image files missing from the gallery log.
    ReconcileGallery,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Command line & configuration ────────────────────────────────────────
    let cli = Cli::parse();
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    init_tracing(&cfg);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cfg).await,
        Command::ReconcileGallery => reconcile_gallery(cfg).await,
    }
}

fn init_tracing(cfg: &Config) {
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: EASEL_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn serve(cfg: Config) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "easel-server starting");
    info!(config = ?cfg, "configuration loaded");

    // ── 3. Stores & providers ──────────────────────────────────────────────────
    let addr: SocketAddr = cfg
        .bind_address
        .parse()
        .with_context(|| format!("invalid EASEL_BIND address {:?}", cfg.bind_address))?;
    let state = Arc::new(
        AppState::initialize(cfg)
            .await
            .context("failed to open storage")?,
    );
    info!(
        tasks = state.tasks.len().await,
        images = state.gallery.len().await,
        storage = %state.config.storage_dir().display(),
        "storage ready"
    );

    // ── 4. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("easel-server stopped");
    Ok(())
}

async fn reconcile_gallery(cfg: Config) -> anyhow::Result<()> {
    let gallery = GalleryStore::open(cfg.metadata_path(), cfg.images_dir())
        .await
        .context("failed to open gallery")?;
    let added = gallery.reconcile().await.context("gallery reconciliation failed")?;
    if added == 0 {
        info!("every image already has a gallery record");
    } else {
        info!(added, total = gallery.len().await, "gallery records recovered");
    }
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c   => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; in-flight tasks will be failed on next start");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_serves() {
        let cli = Cli::try_parse_from(["easel-server"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn reconcile_subcommand_parses() {
        let cli = Cli::try_parse_from(["easel-server", "reconcile-gallery"]).unwrap();
        assert!(matches!(cli.command, Some(Command::ReconcileGallery)));
    }
}
