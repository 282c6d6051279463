use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and describe the feed series.
    pub fn init(default_ttl_secs: u64) -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        describe();
        gauge!("feed_default_cache_ttl_secs").set(default_ttl_secs as f64);
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    describe_counter!("feed_cache_hits_total", "Channel lookups answered from fresh cache.");
    describe_counter!("feed_cache_misses_total", "Channel lookups that needed a fetch.");
    describe_counter!(
        "feed_fetch_errors_total",
        "Channel fetches that failed, by error kind."
    );
    describe_counter!(
        "feed_stale_served_total",
        "Failed fetches answered with an expired cache entry."
    );
    describe_counter!("signing_key_refresh_total", "Signing key fetches.");
    describe_counter!("worker_task_failures_total", "Pool tasks that errored or panicked.");
    describe_histogram!("feed_fetch_ms", "Upload-list request time in milliseconds.");
    describe_gauge!("feed_sources_configured", "Channels in the configuration.");
    describe_gauge!("feed_default_cache_ttl_secs", "Default cache TTL.");
}
