// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregator;
pub mod api;
pub mod cache;
pub mod config;
pub mod metrics;
pub mod models;
pub mod platform;
pub mod worker;

// ---- Re-exports for stable public API ----
pub use crate::aggregator::{AggregateError, AggregatorOptions, VideoAggregator};
pub use crate::api::router;
pub use crate::models::{Item, Source};
pub use crate::platform::{PlatformClient, PlatformError, SourceFeed};
pub use crate::worker::WorkerPool;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::platform::HttpClient;

/// Build the platform client, worker pool and aggregator described by `cfg`.
/// Must run inside a Tokio runtime (the pool's workers are spawned here).
pub fn build_aggregator(cfg: &AppConfig) -> anyhow::Result<Arc<VideoAggregator>> {
    let http = HttpClient::new(cfg.platform.timeout(), cfg.platform.retry_policy())?;
    let client = PlatformClient::new(http, cfg.platform.endpoints.clone());
    let pool = Arc::new(WorkerPool::new(cfg.workers));
    let options = AggregatorOptions {
        fetch_deadline: cfg.fetch_deadline(),
    };
    Ok(Arc::new(VideoAggregator::new(
        Arc::new(client),
        pool,
        cfg.channels.clone(),
        options,
    )))
}
