// tests/signing.rs
//
// Key lifecycle of SigningKeyManager against an in-memory key source.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use video_feed_aggregator::platform::signing::{SIGNATURE_KEY, TIMESTAMP_KEY};
use video_feed_aggregator::platform::{KeySource, KeyUrls, Params, PlatformError, SigningKeyManager};

const IMG_URL: &str = "https://i0.hdslb.test/bfs/wbi/7cd084941338484aae1ad9425b84077c.png";
const SUB_URL: &str = "https://i0.hdslb.test/bfs/wbi/4932caff0ff746eab6f01bf08b70ac45.png";

struct CountingKeys {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingKeys {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }
}

#[async_trait]
impl KeySource for CountingKeys {
    async fn fetch_key_urls(&self) -> video_feed_aggregator::platform::Result<KeyUrls> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(KeyUrls {
            img_url: IMG_URL.into(),
            sub_url: SUB_URL.into(),
        })
    }
}

struct Unreachable;

#[async_trait]
impl KeySource for Unreachable {
    async fn fetch_key_urls(&self) -> video_feed_aggregator::platform::Result<KeyUrls> {
        Err(PlatformError::Signing("nav unreachable".into()))
    }
}

fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn concurrent_callers_share_one_key_fetch() {
    let source = CountingKeys::new(Duration::from_millis(50));
    let manager = Arc::new(SigningKeyManager::new(source.clone()));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let m = manager.clone();
            tokio::spawn(async move { m.ensure_fresh().await })
        })
        .collect();
    for h in handles {
        h.await.expect("join").expect("ensure_fresh");
    }

    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    let keys = manager.keys().await.expect("keys loaded");
    assert_eq!(keys.img_key, "7cd084941338484aae1ad9425b84077c");
    assert_eq!(keys.mixin_key, "ea1db124af3c7062474693fa704f4ff8");
}

#[tokio::test]
async fn expired_keys_are_refetched() {
    let source = CountingKeys::new(Duration::ZERO);
    let manager = SigningKeyManager::new(source.clone()).with_max_age(Duration::ZERO);
    manager.ensure_fresh().await.unwrap();
    manager.ensure_fresh().await.unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn same_second_signs_identically() {
    let manager = SigningKeyManager::new(CountingKeys::new(Duration::ZERO));
    let p = params(&[("mid", "946974"), ("ps", "25")]);
    let a = manager.sign_at(&p, 1_702_204_169).await.unwrap();
    let b = manager.sign_at(&p, 1_702_204_169).await.unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn known_vector_through_manager() {
    let manager = SigningKeyManager::new(CountingKeys::new(Duration::ZERO));
    let p = params(&[("foo", "114"), ("bar", "514"), ("zab", "1919810")]);
    let signed = manager.sign_at(&p, 1_702_204_169).await.unwrap();
    assert_eq!(signed[SIGNATURE_KEY], "8f6f2b5b3d485fe1886cec6a0be8c5d4");
    assert_eq!(signed[TIMESTAMP_KEY], "1702204169");
}

#[tokio::test]
async fn different_seconds_change_only_timestamp_and_signature() {
    let manager = SigningKeyManager::new(CountingKeys::new(Duration::ZERO));
    let p = params(&[("mid", "946974"), ("order", "pubdate")]);
    let mut a = manager.sign_at(&p, 1_700_000_000).await.unwrap();
    let mut b = manager.sign_at(&p, 1_700_000_001).await.unwrap();

    assert_ne!(a[SIGNATURE_KEY], b[SIGNATURE_KEY]);
    assert_ne!(a[TIMESTAMP_KEY], b[TIMESTAMP_KEY]);
    for m in [&mut a, &mut b] {
        m.remove(SIGNATURE_KEY);
        m.remove(TIMESTAMP_KEY);
    }
    assert_eq!(a, b);
    assert_eq!(a, p);
}

#[tokio::test]
async fn key_failure_surfaces_as_signing_error() {
    let manager = SigningKeyManager::new(Arc::new(Unreachable));
    let err = manager.sign(&Params::new()).await.unwrap_err();
    assert_eq!(err.kind(), "signing");
    assert!(manager.keys().await.is_none());
}

#[tokio::test]
async fn timestamp_is_taken_after_a_slow_key_refresh() {
    let manager = SigningKeyManager::new(CountingKeys::new(Duration::from_millis(1_100)));
    let before = chrono::Utc::now().timestamp();
    let signed = manager.sign(&params(&[("mid", "1")])).await.unwrap();
    let wts: i64 = signed[TIMESTAMP_KEY].parse().unwrap();
    assert!(wts > before, "wts {wts} should postdate the refresh (started at {before})");
}
