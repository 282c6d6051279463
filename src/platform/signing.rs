//! # Request signing
//!
//! The platform's list endpoints require two extra query fields: a unix timestamp (`wts`)
//! and an MD5 signature (`w_rid`) over the sorted, form-encoded query plus a "mixin key".
//!
//! The mixin key is derived from two key fragments the platform publishes as image file
//! names on its nav endpoint; the fragments rotate, so keys are refetched once they are
//! older than [`KEY_MAX_AGE`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use md5::{Digest, Md5};
use metrics::counter;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::form_urlencoded;

use super::error::{PlatformError, Result};
use super::http::HttpClient;

/// Request parameters, ordered by key (the signature covers the sorted query).
pub type Params = BTreeMap<String, String>;

pub const TIMESTAMP_KEY: &str = "wts";
pub const SIGNATURE_KEY: &str = "w_rid";
pub const KEY_MAX_AGE: Duration = Duration::from_secs(3600);

/// Characters the platform drops before hashing.
const FILTERED_CHARS: [char; 5] = ['!', '\'', '(', ')', '*'];

const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// The two image URLs whose file stems are the key fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUrls {
    pub img_url: String,
    pub sub_url: String,
}

/// Where key URLs come from. Production reads the nav endpoint; tests substitute their own.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch_key_urls(&self) -> Result<KeyUrls>;
}

#[derive(Debug, Clone)]
pub struct SigningKeys {
    pub img_key: String,
    pub sub_key: String,
    pub mixin_key: String,
    pub last_refreshed: Instant,
}

impl SigningKeys {
    pub fn from_urls(urls: &KeyUrls) -> Result<Self> {
        let img_key = key_fragment(&urls.img_url);
        let sub_key = key_fragment(&urls.sub_url);
        if img_key.is_empty() || sub_key.is_empty() {
            return Err(PlatformError::Signing(
                "img_url or sub_url has no key fragment".into(),
            ));
        }
        let mixin_key = mixin_key(&img_key, &sub_key)?;
        Ok(Self {
            img_key,
            sub_key,
            mixin_key,
            last_refreshed: Instant::now(),
        })
    }

    fn is_fresh(&self, max_age: Duration) -> bool {
        self.last_refreshed.elapsed() < max_age
    }
}

/// File stem of the last path segment: `https://i0.test/bfs/wbi/7cd08494.png` → `7cd08494`.
pub fn key_fragment(url: &str) -> String {
    let name = url.rsplit('/').next().unwrap_or_default();
    let stem = match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    };
    stem.to_string()
}

/// Permute the concatenated fragments through the fixed table and keep 32 bytes.
pub fn mixin_key(img_key: &str, sub_key: &str) -> Result<String> {
    let raw = format!("{img_key}{sub_key}");
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(32);
    for &idx in MIXIN_KEY_ENC_TAB.iter().take(32) {
        let b = bytes.get(idx).copied().ok_or_else(|| {
            PlatformError::Signing(format!(
                "key fragments too short ({} bytes) for mixin table",
                bytes.len()
            ))
        })?;
        out.push(char::from(b));
    }
    Ok(out)
}

/// Sorted `application/x-www-form-urlencoded` query. Spaces become `+`, `*` stays
/// literal (and is later filtered out), `~` is percent-encoded.
pub fn encode_params(params: &Params) -> String {
    let mut ser = form_urlencoded::Serializer::new(String::new());
    for (k, v) in params {
        ser.append_pair(k, v);
    }
    ser.finish()
}

/// Drop the filtered characters from the *encoded* query, then parse it back.
fn strip_filtered(params: &Params) -> Params {
    let encoded = encode_params(params);
    let filtered: String = encoded
        .chars()
        .filter(|c| !FILTERED_CHARS.contains(c))
        .collect();
    form_urlencoded::parse(filtered.as_bytes())
        .into_owned()
        .collect()
}

/// Pure signing step: copy, stamp, filter, hash.
pub fn sign_with_key(params: &Params, mixin_key: &str, unix_ts: i64) -> Params {
    let mut signed = params.clone();
    signed.insert(TIMESTAMP_KEY.to_string(), unix_ts.to_string());
    let mut signed = strip_filtered(&signed);

    let query = encode_params(&signed);
    let digest = Md5::digest(format!("{query}{mixin_key}").as_bytes());
    signed.insert(SIGNATURE_KEY.to_string(), format!("{digest:x}"));
    signed
}

/// Owns the current keys and signs requests with them.
pub struct SigningKeyManager {
    source: Arc<dyn KeySource>,
    keys: RwLock<Option<SigningKeys>>,
    max_age: Duration,
}

impl SigningKeyManager {
    pub fn new(source: Arc<dyn KeySource>) -> Self {
        Self {
            source,
            keys: RwLock::new(None),
            max_age: KEY_MAX_AGE,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Refresh when keys are missing or stale. Concurrent callers share one fetch: the
    /// write lock is held across it and freshness is re-checked once acquired.
    pub async fn ensure_fresh(&self) -> Result<()> {
        if self.fresh_under(&*self.keys.read().await) {
            return Ok(());
        }
        let mut guard = self.keys.write().await;
        if self.fresh_under(&guard) {
            return Ok(());
        }
        *guard = Some(self.load().await?);
        Ok(())
    }

    /// Unconditional refetch.
    pub async fn refresh(&self) -> Result<()> {
        let mut guard = self.keys.write().await;
        *guard = Some(self.load().await?);
        Ok(())
    }

    /// Sign with the current time, read once the keys are known to be fresh.
    pub async fn sign(&self, params: &Params) -> Result<Params> {
        self.ensure_fresh().await?;
        let now = chrono::Utc::now().timestamp();
        self.sign_at(params, now).await
    }

    pub async fn sign_at(&self, params: &Params, unix_ts: i64) -> Result<Params> {
        self.ensure_fresh().await?;
        let mixin = self
            .keys
            .read()
            .await
            .as_ref()
            .map(|k| k.mixin_key.clone())
            .ok_or_else(|| PlatformError::Signing("no signing keys loaded".into()))?;
        Ok(sign_with_key(params, &mixin, unix_ts))
    }

    pub async fn keys(&self) -> Option<SigningKeys> {
        self.keys.read().await.clone()
    }

    fn fresh_under(&self, keys: &Option<SigningKeys>) -> bool {
        keys.as_ref().is_some_and(|k| k.is_fresh(self.max_age))
    }

    async fn load(&self) -> Result<SigningKeys> {
        let urls = self.source.fetch_key_urls().await?;
        let keys = SigningKeys::from_urls(&urls)?;
        counter!("signing_key_refresh_total").increment(1);
        info!(img_key = %keys.img_key, sub_key = %keys.sub_key, "signing keys refreshed");
        Ok(keys)
    }
}

// ---- nav endpoint ----

/// "Not logged in". The nav endpoint still returns the key images with this code.
const CODE_NOT_LOGGED_IN: i64 = -101;

#[derive(Debug, Deserialize)]
struct NavResponse {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<NavData>,
}

#[derive(Debug, Deserialize)]
struct NavData {
    wbi_img: WbiImg,
}

#[derive(Debug, Deserialize)]
struct WbiImg {
    #[serde(default)]
    img_url: String,
    #[serde(default)]
    sub_url: String,
}

/// Reads key URLs from the platform's nav endpoint.
pub struct NavKeySource {
    http: HttpClient,
    nav_url: String,
    referer: String,
}

impl NavKeySource {
    pub fn new(http: HttpClient, api_base: &str, www_base: &str) -> Self {
        Self {
            http,
            nav_url: format!("{}/x/web-interface/nav", api_base.trim_end_matches('/')),
            referer: format!("{}/", www_base.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl KeySource for NavKeySource {
    async fn fetch_key_urls(&self) -> Result<KeyUrls> {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.referer) {
            headers.insert(REFERER, v);
        }
        let resp = self
            .http
            .get(&self.nav_url, headers)
            .await
            .map_err(|e| PlatformError::Signing(format!("nav unreachable: {e}")))?;
        if !resp.status.is_success() {
            return Err(PlatformError::Signing(format!("nav HTTP {}", resp.status)));
        }

        let nav: NavResponse = resp
            .json()
            .map_err(|e| PlatformError::Signing(format!("nav body: {e}")))?;
        if nav.code != 0 && nav.code != CODE_NOT_LOGGED_IN {
            return Err(PlatformError::Signing(format!(
                "nav code {}: {}",
                nav.code, nav.message
            )));
        }
        let img = nav
            .data
            .map(|d| d.wbi_img)
            .ok_or_else(|| PlatformError::Signing("nav response without data".into()))?;
        if img.img_url.is_empty() || img.sub_url.is_empty() {
            return Err(PlatformError::Signing("img_url or sub_url is empty".into()));
        }
        debug!(img_url = %img.img_url, sub_url = %img.sub_url, "nav key urls");
        Ok(KeyUrls {
            img_url: img.img_url,
            sub_url: img.sub_url,
        })
    }
}
