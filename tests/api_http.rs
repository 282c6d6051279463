// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /videos (merged feed, widget headers, limit override, single channel, errors)
// - GET /sources

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::DateTime;
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use video_feed_aggregator::api::{self, AppState};
use video_feed_aggregator::platform::{PlatformError, Result as PlatformResult};
use video_feed_aggregator::{AggregatorOptions, Item, Source, SourceFeed, VideoAggregator, WorkerPool};

const BODY_LIMIT: usize = 1024 * 1024;

/// Channel "1" has three uploads, "2" has two, anything else is rejected upstream.
struct StaticFeed;

#[async_trait]
impl SourceFeed for StaticFeed {
    async fn fetch_source_items(
        &self,
        source_id: &str,
        _limit: usize,
        name_override: &str,
    ) -> PlatformResult<Vec<Item>> {
        let stamps: &[i64] = match source_id {
            "1" => &[1_700_000_030, 1_700_000_010, 1_700_000_000],
            "2" => &[1_700_000_020, 1_700_000_005],
            _ => {
                return Err(PlatformError::Api {
                    code: -404,
                    message: "no such channel".into(),
                })
            }
        };
        Ok(stamps
            .iter()
            .map(|ts| Item {
                title: format!("upload {ts}"),
                thumbnail_url: format!("https://i0.test/{ts}.jpg"),
                url: format!("https://www.bilibili.com/video/BV{ts}"),
                author: if name_override.is_empty() {
                    format!("author {source_id}")
                } else {
                    name_override.to_string()
                },
                author_url: format!("https://space.bilibili.com/{source_id}"),
                posted_at: DateTime::from_timestamp(*ts, 0).unwrap(),
                duration: "01:00".into(),
                play_count: 3,
                external_id: format!("BV{ts}"),
            })
            .collect())
    }
}

/// Build the same Router the binary uses, over the static feed.
fn test_router() -> Router {
    let aggregator = VideoAggregator::new(
        Arc::new(StaticFeed),
        Arc::new(WorkerPool::new(2)),
        vec![Source::new("1").with_name("One"), Source::new("2")],
        AggregatorOptions::default(),
    );
    api::router(AppState {
        aggregator: Arc::new(aggregator),
        default_limit: 4,
        default_ttl_secs: 300,
    })
}

async fn get(app: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, headers, bytes)
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let (status, _, body) = get(test_router(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).expect("utf8").trim(), "OK");
}

#[tokio::test]
async fn api_videos_merges_channels_with_default_limit() {
    let (status, headers, body) = get(test_router(), "/videos").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["widget-title"], "Bilibili");
    assert_eq!(headers["widget-title-url"], "https://www.bilibili.com");

    let v: Json = serde_json::from_slice(&body).expect("json array");
    let arr = v.as_array().expect("array");
    assert_eq!(arr.len(), 4, "default limit");
    let bvids: Vec<&str> = arr.iter().map(|i| i["bvid"].as_str().unwrap()).collect();
    assert_eq!(bvids, ["BV1700000030", "BV1700000020", "BV1700000010", "BV1700000005"]);
    assert_eq!(arr[0]["author"], "One");
    assert_eq!(arr[1]["author"], "author 2");
    assert!(arr[0]["time_posted"].is_string());
    assert_eq!(arr[0]["play_count"], 3);
}

#[tokio::test]
async fn api_videos_honors_limit_and_ignores_garbage() {
    let (_, _, body) = get(test_router(), "/videos?limit=2&cache=0").await;
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v.as_array().unwrap().len(), 2);

    let (status, _, body) = get(test_router(), "/videos?limit=nope").await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v.as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn api_videos_single_channel() {
    let (status, _, body) = get(test_router(), "/videos?mid=1&limit=10").await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    let arr = v.as_array().unwrap();
    assert_eq!(arr.len(), 3);
    assert!(arr.iter().all(|i| i["author"] == "One"));
}

#[tokio::test]
async fn api_videos_single_channel_failure_is_500() {
    let (status, _, body) = get(test_router(), "/videos?mid=999").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert!(v["error"].as_str().unwrap().contains("-404"));
}

#[tokio::test]
async fn api_sources_lists_configuration() {
    let (status, _, body) = get(test_router(), "/sources").await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["default_limit"], 4);
    assert_eq!(v["default_cache_ttl_secs"], 300);
    assert_eq!(v["channels"][0]["mid"], "1");
    assert_eq!(v["channels"][0]["name"], "One");
    assert!(v["channels"][1].get("name").is_none());
}
