//! Video feed aggregator: binary entrypoint.
//! Loads config, boots tracing + metrics, wires the aggregator behind the Axum router and
//! drains the worker pool on shutdown.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use video_feed_aggregator::api::{self, AppState};
use video_feed_aggregator::config::AppConfig;
use video_feed_aggregator::metrics::Metrics;

#[derive(Parser)]
#[command(name = "video-feed-aggregator", about = "Merged upload feed for a list of channels")]
struct Cli {
    /// Path to a JSON or TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,
}

/// Compact logs by default, JSON when LOG_FORMAT=json. Filter via RUST_LOG.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let mut cfg = AppConfig::load(cli.config.as_deref()).context("loading config")?;
    if let Some(port) = cli.port.filter(|p| *p > 0) {
        cfg.port = u32::from(port);
    }
    info!(channels = cfg.channels.len(), port = cfg.port(), "config loaded");

    let metrics = Metrics::init(cfg.cache_ttl_secs).context("installing metrics recorder")?;
    let aggregator = video_feed_aggregator::build_aggregator(&cfg)?;

    info!("warming up signing keys and session");
    match aggregator.initialize().await {
        Ok(()) => info!("initialized"),
        Err(e) => warn!(error = %e, "initialization failed; retrying on first request"),
    }

    let state = AppState {
        aggregator: aggregator.clone(),
        default_limit: cfg.limit,
        default_ttl_secs: cfg.cache_ttl_secs,
    };
    let app = api::router(state).merge(metrics.router());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.port()));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    aggregator.shutdown().await;
    info!("bye");
    Ok(())
}
