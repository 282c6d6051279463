// src/platform/client.rs
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::DateTime;
use metrics::histogram;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, ORIGIN, REFERER};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use super::error::{PlatformError, Result, TransportError};
use super::http::HttpClient;
use super::session::Session;
use super::signing::{encode_params, NavKeySource, Params, SigningKeyManager};
use super::{PlatformEndpoints, SourceFeed};
use crate::models::{apply_limit, Item};

/// Largest page the search endpoint serves.
pub const MAX_PAGE_SIZE: usize = 50;

const DECOY_ALPHABET: &[u8] = b"ABCDEFGHIJK";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<SearchData>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchData {
    #[serde(default, deserialize_with = "null_as_default")]
    list: SearchList,
    #[serde(default, deserialize_with = "null_as_default")]
    page: PageInfo,
}

#[derive(Debug, Default, Deserialize)]
struct SearchList {
    /// `null` for channels without uploads.
    #[serde(default, deserialize_with = "null_as_default")]
    vlist: Vec<RawVideo>,
}

#[derive(Debug, Default, Deserialize)]
struct PageInfo {
    #[serde(default)]
    count: i64,
}

#[derive(Debug, Deserialize)]
struct RawVideo {
    #[serde(default)]
    bvid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    pic: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    length: String,
    #[serde(default, deserialize_with = "lenient_count")]
    play: i64,
}

fn null_as_default<'de, D, T>(de: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

/// Hidden play counts come back as `"--"`.
fn lenient_count<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<i64, D::Error> {
    let v = serde_json::Value::deserialize(de)?;
    Ok(match v {
        serde_json::Value::Number(n) => n.as_i64().unwrap_or_default(),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    })
}

/// Two random letters, as the platform's own web client sends.
fn decoy_chars() -> String {
    let mut rng = rand::rng();
    (0..2)
        .map(|_| char::from(DECOY_ALPHABET[rng.random_range(0..DECOY_ALPHABET.len())]))
        .collect()
}

/// Fixed-shape browser fingerprint fields the search endpoint expects.
pub fn decoy_params() -> Params {
    let mut p = Params::new();
    p.insert("dm_img_list".into(), "[]".into());
    p.insert("dm_img_str".into(), decoy_chars());
    p.insert("dm_cover_img_str".into(), decoy_chars());
    p.insert(
        "dm_img_inter".into(),
        r#"{"ds":[],"wh":[0,0,0],"of":[0,0,0]}"#.into(),
    );
    p
}

fn header(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| PlatformError::InvalidSource(format!("not usable in a header: {value:?}")))
}

/// Authenticated access to a channel's upload list.
pub struct PlatformClient {
    http: HttpClient,
    signer: Arc<SigningKeyManager>,
    session: Session,
    endpoints: PlatformEndpoints,
}

impl PlatformClient {
    /// Wire the production key source and session against `endpoints`.
    pub fn new(http: HttpClient, endpoints: PlatformEndpoints) -> Self {
        let keys = NavKeySource::new(http.clone(), &endpoints.api_base, &endpoints.www_base);
        let signer = Arc::new(SigningKeyManager::new(Arc::new(keys)));
        let session = Session::new(
            http.clone(),
            &endpoints.api_base,
            &endpoints.www_base,
            &endpoints.space_base,
        );
        Self::with_parts(http, endpoints, signer, session)
    }

    pub fn with_parts(
        http: HttpClient,
        endpoints: PlatformEndpoints,
        signer: Arc<SigningKeyManager>,
        session: Session,
    ) -> Self {
        Self {
            http,
            signer,
            session,
            endpoints: endpoints.normalized(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Eagerly load signing keys and session cookies.
    pub async fn initialize(&self) -> Result<()> {
        self.signer.refresh().await?;
        self.session.ensure_tokens().await?;
        Ok(())
    }

    /// Most recent uploads of `mid`, newest first as the platform orders them, at most
    /// `limit` (0 = one full page). A non-empty `name_override` replaces the author.
    pub async fn fetch_source_items(
        &self,
        mid: &str,
        limit: usize,
        name_override: &str,
    ) -> Result<Vec<Item>> {
        if mid.is_empty() || !mid.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PlatformError::InvalidSource(format!("bad channel id {mid:?}")));
        }
        let tokens = self.session.ensure_tokens().await?;

        let mut params = Params::new();
        params.insert("mid".into(), mid.into());
        params.insert("order".into(), "pubdate".into());
        params.insert("pn".into(), "1".into());
        let page_size = if limit == 0 {
            MAX_PAGE_SIZE
        } else {
            limit.min(MAX_PAGE_SIZE)
        };
        params.insert("ps".into(), page_size.to_string());
        params.insert("jsonp".into(), "jsonp".into());
        params.extend(decoy_params());
        if let Some(web_id) = self.session.web_id(mid).await {
            params.insert("w_webid".into(), web_id);
        }

        let signed = self.signer.sign(&params).await?;
        let url = format!(
            "{}/x/space/wbi/arc/search?{}",
            self.endpoints.api_base,
            encode_params(&signed)
        );

        let mut headers = HeaderMap::new();
        headers.insert(REFERER, header(&self.endpoints.author_url(mid))?);
        headers.insert(ORIGIN, header(&self.endpoints.space_base)?);
        let cookie = HeaderValue::from_str(&tokens.cookie_header())
            .map_err(|_| PlatformError::Session("session cookie is not a valid header".into()))?;
        headers.insert(COOKIE, cookie);

        let t0 = Instant::now();
        let resp = self.http.get(&url, headers).await?;
        histogram!("feed_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let parsed: std::result::Result<SearchResponse, _> = resp.json();
        let body = match parsed {
            Ok(b) => b,
            Err(e) if resp.status.is_success() => return Err(e.into()),
            Err(_) => {
                return Err(TransportError {
                    url,
                    attempts: resp.attempts,
                    reason: format!("HTTP {}", resp.status),
                }
                .into())
            }
        };
        if body.code != 0 {
            return Err(PlatformError::Api {
                code: body.code,
                message: body.message,
            });
        }

        let data = body.data.unwrap_or_default();
        let mut items: Vec<Item> = data
            .list
            .vlist
            .into_iter()
            .map(|v| self.to_item(mid, v, name_override))
            .collect();
        apply_limit(&mut items, limit);
        debug!(mid, returned = items.len(), total = data.page.count, "channel uploads fetched");
        Ok(items)
    }

    fn to_item(&self, mid: &str, v: RawVideo, name_override: &str) -> Item {
        let author = if name_override.is_empty() {
            v.author
        } else {
            name_override.to_string()
        };
        Item {
            title: v.title,
            thumbnail_url: v.pic,
            url: self.endpoints.video_url(&v.bvid),
            author,
            author_url: self.endpoints.author_url(mid),
            posted_at: DateTime::from_timestamp(v.created, 0).unwrap_or_default(),
            duration: v.length,
            play_count: v.play,
            external_id: v.bvid,
        }
    }
}

#[async_trait]
impl SourceFeed for PlatformClient {
    async fn initialize(&self) -> Result<()> {
        PlatformClient::initialize(self).await
    }

    async fn fetch_source_items(
        &self,
        source_id: &str,
        limit: usize,
        name_override: &str,
    ) -> Result<Vec<Item>> {
        PlatformClient::fetch_source_items(self, source_id, limit, name_override).await
    }
}
