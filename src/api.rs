use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::aggregator::VideoAggregator;
use crate::models::Source;

const WIDGET_TITLE: &str = "Bilibili";
const WIDGET_TITLE_URL: &str = "https://www.bilibili.com";

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<VideoAggregator>,
    pub default_limit: usize,
    pub default_ttl_secs: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/videos", get(videos))
        .route("/sources", get(sources))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Positive integer override; anything unparsable keeps the default.
fn positive(q: &HashMap<String, String>, key: &str, default: usize) -> usize {
    q.get(key)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn ttl(q: &HashMap<String, String>, default: u64) -> u64 {
    q.get("cache")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

async fn videos(State(state): State<AppState>, Query(q): Query<HashMap<String, String>>) -> Response {
    let limit = positive(&q, "limit", state.default_limit);
    let ttl_secs = ttl(&q, state.default_ttl_secs);

    let result = match q.get("mid").map(|m| m.trim()).filter(|m| !m.is_empty()) {
        Some(mid) => state.aggregator.fetch_one(mid, limit, ttl_secs).await,
        None => state.aggregator.fetch_all(limit, ttl_secs).await,
    };

    match result {
        Ok(items) => {
            let headers = [
                (
                    HeaderName::from_static("widget-title"),
                    HeaderValue::from_static(WIDGET_TITLE),
                ),
                (
                    HeaderName::from_static("widget-title-url"),
                    HeaderValue::from_static(WIDGET_TITLE_URL),
                ),
            ];
            (headers, Json(items)).into_response()
        }
        Err(e) => {
            error!(error = %e, "fetching videos failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(serde::Serialize)]
struct SourcesOut {
    channels: Vec<Source>,
    default_limit: usize,
    default_cache_ttl_secs: u64,
}

async fn sources(State(state): State<AppState>) -> Json<SourcesOut> {
    Json(SourcesOut {
        channels: state.aggregator.sources().to_vec(),
        default_limit: state.default_limit,
        default_cache_ttl_secs: state.default_ttl_secs,
    })
}
