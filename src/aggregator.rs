//! # Video aggregator
//!
//! Answers "latest uploads across all channels" and "latest uploads of one channel".
//!
//! Each channel resolves the same way: a fresh cache entry wins; otherwise the feed is
//! called; when that fails the previous entry (however old) is served instead. The
//! all-channels path fans the per-channel work out to the worker pool and merges the
//! batches newest first.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::AggregationCache;
use crate::models::{apply_limit, sort_newest_first, Item, Source};
use crate::platform::{PlatformError, SourceFeed};
use crate::worker::{PoolError, Task, WorkerPool};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AggregatorOptions {
    /// Upper bound on a single channel fetch, on top of the HTTP timeout and retries.
    pub fetch_deadline: Option<Duration>,
}

/// How one channel was answered.
#[derive(Debug)]
enum Outcome {
    Fresh(Vec<Item>),
    Fetched(Vec<Item>),
    Stale(Vec<Item>, PlatformError),
    Failed(PlatformError),
}

impl Outcome {
    /// Items to emit (possibly none) and the error worth reporting, if any.
    fn split(self) -> (Vec<Item>, Option<PlatformError>) {
        match self {
            Outcome::Fresh(items) | Outcome::Fetched(items) => (items, None),
            Outcome::Stale(items, err) => (items, Some(err)),
            Outcome::Failed(err) => (Vec::new(), Some(err)),
        }
    }
}

struct Shared {
    feed: Arc<dyn SourceFeed>,
    cache: AggregationCache,
    options: AggregatorOptions,
}

impl Shared {
    async fn resolve(&self, source: &Source, limit: usize, ttl: Duration) -> Outcome {
        let id = source.external_id.as_str();
        let cached = self.cache.get(id);
        if let Some(entry) = cached.as_ref().filter(|e| e.is_fresh(ttl)) {
            counter!("feed_cache_hits_total").increment(1);
            debug!(source = source.label(), "fresh cache hit");
            return Outcome::Fresh(entry.items.clone());
        }
        counter!("feed_cache_misses_total").increment(1);

        match self.fetch(source, limit).await {
            Ok(items) => {
                self.cache.put(id, items.clone());
                info!(source = source.label(), mid = id, count = items.len(), "channel refreshed");
                Outcome::Fetched(items)
            }
            Err(err) => {
                counter!("feed_fetch_errors_total", "kind" => err.kind()).increment(1);
                match cached {
                    Some(entry) => {
                        counter!("feed_stale_served_total").increment(1);
                        info!(
                            source = source.label(),
                            age_secs = entry.age().as_secs(),
                            "fetch failed, serving stale cache"
                        );
                        Outcome::Stale(entry.items, err)
                    }
                    None => Outcome::Failed(err),
                }
            }
        }
    }

    async fn fetch(&self, source: &Source, limit: usize) -> Result<Vec<Item>, PlatformError> {
        let call = self
            .feed
            .fetch_source_items(&source.external_id, limit, source.name_override());
        match self.options.fetch_deadline {
            Some(deadline) => tokio::time::timeout(deadline, call)
                .await
                .map_err(|_| PlatformError::DeadlineExceeded(deadline))?,
            None => call.await,
        }
    }
}

/// One channel of a fan-out. Always emits exactly one batch (possibly empty); dropping
/// the task unsent closes its sink just the same.
struct FetchTask {
    shared: Arc<Shared>,
    source: Source,
    limit: usize,
    ttl: Duration,
    sink: mpsc::Sender<Vec<Item>>,
}

#[async_trait]
impl Task for FetchTask {
    async fn execute(&self) -> anyhow::Result<()> {
        let (batch, err) = self
            .shared
            .resolve(&self.source, self.limit, self.ttl)
            .await
            .split();
        // A closed sink means the gatherer went away; nothing left to deliver to.
        let _ = self.sink.send(batch).await;
        match err {
            Some(e) => Err(anyhow::Error::new(e).context(format!(
                "fetching {} ({})",
                self.source.label(),
                self.source.external_id
            ))),
            None => Ok(()),
        }
    }

    fn label(&self) -> String {
        format!("fetch:{}", self.source.external_id)
    }
}

pub struct VideoAggregator {
    shared: Arc<Shared>,
    pool: Arc<WorkerPool>,
    sources: Arc<[Source]>,
}

impl VideoAggregator {
    /// Starts `pool` if it isn't running yet, so this must be called inside a Tokio runtime.
    pub fn new(
        feed: Arc<dyn SourceFeed>,
        pool: Arc<WorkerPool>,
        sources: Vec<Source>,
        options: AggregatorOptions,
    ) -> Self {
        pool.start();
        gauge!("feed_sources_configured").set(sources.len() as f64);
        Self {
            shared: Arc::new(Shared {
                feed,
                cache: AggregationCache::new(),
                options,
            }),
            pool,
            sources: sources.into(),
        }
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn cache(&self) -> &AggregationCache {
        &self.shared.cache
    }

    /// Warm credentials up front. Failure is not fatal; the first real fetch retries.
    pub async fn initialize(&self) -> Result<(), AggregateError> {
        self.shared.feed.initialize().await?;
        Ok(())
    }

    /// Drain the worker pool.
    pub async fn shutdown(&self) {
        self.pool.stop().await;
    }

    /// Newest `limit` items (0 = all) across every configured channel.
    ///
    /// Single-channel failures never fail the whole call: the channel contributes its stale
    /// cache or nothing. If nothing at all could be gathered the result is empty, not an
    /// error. The only error is a pool that has already been shut down.
    pub async fn fetch_all(&self, limit: usize, ttl_secs: u64) -> Result<Vec<Item>, AggregateError> {
        if self.sources.is_empty() {
            return Ok(Vec::new());
        }
        let ttl = Duration::from_secs(ttl_secs);
        let (tx, mut rx) = mpsc::channel::<Vec<Item>>(self.sources.len());

        // Scatter. Each submit runs on its own task so a full queue only parks that one.
        let submissions: Vec<_> = self
            .sources
            .iter()
            .map(|source| {
                let task = FetchTask {
                    shared: Arc::clone(&self.shared),
                    source: source.clone(),
                    limit,
                    ttl,
                    sink: tx.clone(),
                };
                let pool = Arc::clone(&self.pool);
                tokio::spawn(async move { pool.submit(task).await })
            })
            .collect();
        drop(tx);

        // Phase 1: every submission has been accepted or turned away.
        let mut accepted = 0usize;
        for handle in submissions {
            match handle.await {
                Ok(Ok(())) => accepted += 1,
                Ok(Err(e)) => debug!(error = %e, "fetch task rejected"),
                Err(e) => warn!(error = %e, "fetch task submission aborted"),
            }
        }
        if accepted == 0 {
            return Err(PoolError::Closed.into());
        }

        // Phase 2: every accepted task has emitted and dropped its sink.
        let mut merged = Vec::new();
        while let Some(batch) = rx.recv().await {
            merged.extend(batch);
        }

        sort_newest_first(&mut merged);
        apply_limit(&mut merged, limit);
        debug!(sources = self.sources.len(), returned = merged.len(), "aggregate built");
        Ok(merged)
    }

    /// Newest `limit` items (0 = all) of one channel, resolved inline without the pool.
    ///
    /// Unlike [`fetch_all`](Self::fetch_all), a failed fetch with no cached fallback is
    /// returned as an error.
    pub async fn fetch_one(
        &self,
        source_id: &str,
        limit: usize,
        ttl_secs: u64,
    ) -> Result<Vec<Item>, AggregateError> {
        let source = self
            .sources
            .iter()
            .find(|s| s.external_id == source_id)
            .cloned()
            .unwrap_or_else(|| Source::new(source_id));

        let (mut items, err) = match self
            .shared
            .resolve(&source, limit, Duration::from_secs(ttl_secs))
            .await
        {
            Outcome::Failed(err) => {
                warn!(mid = source_id, error = %err, "channel fetch failed, no cache to fall back on");
                return Err(err.into());
            }
            other => other.split(),
        };
        if let Some(err) = err {
            warn!(mid = source_id, error = %err, "channel fetch failed");
        }
        sort_newest_first(&mut items);
        apply_limit(&mut items, limit);
        Ok(items)
    }
}
