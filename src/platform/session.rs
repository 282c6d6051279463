// src/platform/session.rs
//! Session identifiers: the two fingerprint cookies, fetched once per process, and the
//! per-channel `w_webid`, scraped lazily from the channel's profile page.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER};
use serde::Deserialize;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

use super::error::{PlatformError, Result};
use super::http::HttpClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub buvid3: String,
    pub buvid4: String,
}

impl SessionTokens {
    pub fn cookie_header(&self) -> String {
        format!("buvid3={}; buvid4={}", self.buvid3, self.buvid4)
    }
}

/// Pulls the opaque per-channel id out of a profile page.
pub trait WebIdExtractor: Send + Sync {
    fn extract(&self, page: &str) -> Option<String>;
}

/// Matches `"access_id": "<value>"` in the page's embedded render data.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessIdExtractor;

static ACCESS_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""access_id"\s*:\s*"([^"]+)""#).expect("access_id regex"));

impl WebIdExtractor for AccessIdExtractor {
    fn extract(&self, page: &str) -> Option<String> {
        ACCESS_ID_RE
            .captures(page)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

#[derive(Debug, Deserialize)]
struct SpiResponse {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<SpiData>,
}

#[derive(Debug, Deserialize)]
struct SpiData {
    #[serde(default)]
    b_3: String,
    #[serde(default)]
    b_4: String,
}

pub struct Session {
    http: HttpClient,
    spi_url: String,
    www_referer: String,
    space_base: String,
    tokens: RwLock<Option<SessionTokens>>,
    /// One cell per channel; concurrent lookups for the same channel share a scrape and a
    /// failed scrape leaves the cell empty.
    web_ids: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
    extractor: Arc<dyn WebIdExtractor>,
}

impl Session {
    pub fn new(http: HttpClient, api_base: &str, www_base: &str, space_base: &str) -> Self {
        Self {
            http,
            spi_url: format!("{}/x/frontend/finger/spi", api_base.trim_end_matches('/')),
            www_referer: format!("{}/", www_base.trim_end_matches('/')),
            space_base: space_base.trim_end_matches('/').to_string(),
            tokens: RwLock::new(None),
            web_ids: Mutex::new(HashMap::new()),
            extractor: Arc::new(AccessIdExtractor),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn WebIdExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Fingerprint cookies, fetched on first use. A failed fetch is not remembered.
    pub async fn ensure_tokens(&self) -> Result<SessionTokens> {
        if let Some(t) = self.tokens.read().await.as_ref() {
            return Ok(t.clone());
        }
        let mut guard = self.tokens.write().await;
        if let Some(t) = guard.as_ref() {
            return Ok(t.clone());
        }
        let fresh = self.fetch_tokens().await?;
        info!("session cookies acquired");
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    async fn fetch_tokens(&self) -> Result<SessionTokens> {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.www_referer) {
            headers.insert(REFERER, v);
        }
        let resp = self
            .http
            .get(&self.spi_url, headers)
            .await
            .map_err(|e| PlatformError::Session(e.to_string()))?;
        if !resp.status.is_success() {
            return Err(PlatformError::Session(format!("spi HTTP {}", resp.status)));
        }
        let spi: SpiResponse = resp
            .json()
            .map_err(|e| PlatformError::Session(format!("spi body: {e}")))?;
        if spi.code != 0 {
            return Err(PlatformError::Session(format!(
                "spi code {}: {}",
                spi.code, spi.message
            )));
        }
        match spi.data {
            Some(d) if !d.b_3.is_empty() => Ok(SessionTokens {
                buvid3: d.b_3,
                buvid4: d.b_4,
            }),
            _ => Err(PlatformError::Session("spi returned no buvid3".into())),
        }
    }

    /// Cached `w_webid` for `mid`, scraping the profile page on a miss. `None` on any
    /// failure; only successful extractions are cached.
    pub async fn web_id(&self, mid: &str) -> Option<String> {
        let cell = self
            .web_ids
            .lock()
            .expect("web id map poisoned")
            .entry(mid.to_string())
            .or_default()
            .clone();
        cell.get_or_try_init(|| async { self.scrape_web_id(mid).await.ok_or(()) })
            .await
            .ok()
            .cloned()
    }

    async fn scrape_web_id(&self, mid: &str) -> Option<String> {
        let url = format!("{}/{mid}/dynamic", self.space_base);
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html"));
        let page = match self.http.get(&url, headers).await {
            Ok(resp) if resp.status.is_success() => resp.body,
            Ok(resp) => {
                debug!(mid, status = %resp.status, "profile page not available");
                return None;
            }
            Err(e) => {
                debug!(mid, error = %e, "profile page fetch failed");
                return None;
            }
        };
        let id = self.extractor.extract(&page);
        if id.is_none() {
            debug!(mid, "no web id on profile page");
        }
        id
    }

    pub fn cached_web_ids(&self) -> usize {
        self.web_ids
            .lock()
            .expect("web id map poisoned")
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_access_id_with_loose_spacing() {
        let page = r#"<script>window.__RENDER_DATA__={"access_id" :  "abc.123-XYZ","x":1}</script>"#;
        assert_eq!(AccessIdExtractor.extract(page).as_deref(), Some("abc.123-XYZ"));
    }

    #[test]
    fn missing_access_id_yields_none() {
        assert_eq!(AccessIdExtractor.extract("<html>nothing</html>"), None);
        assert_eq!(AccessIdExtractor.extract(r#""access_id":"""#), None);
    }

    #[test]
    fn cookie_header_carries_both_tokens() {
        let t = SessionTokens {
            buvid3: "A".into(),
            buvid4: "B".into(),
        };
        assert_eq!(t.cookie_header(), "buvid3=A; buvid4=B");
    }
}
