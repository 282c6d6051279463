// src/platform/mod.rs
pub mod client;
pub mod error;
pub mod http;
pub mod session;
pub mod signing;

pub use client::PlatformClient;
pub use error::{PlatformError, Result, TransportError};
pub use http::{HttpClient, RetryPolicy};
pub use signing::{KeySource, KeyUrls, Params, SigningKeyManager};

use serde::{Deserialize, Serialize};

use crate::models::Item;

/// Hosts of the platform. Overridable so tests can point the client at a local fake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformEndpoints {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_space_base")]
    pub space_base: String,
    #[serde(default = "default_www_base")]
    pub www_base: String,
}

fn default_api_base() -> String {
    "https://api.bilibili.com".into()
}
fn default_space_base() -> String {
    "https://space.bilibili.com".into()
}
fn default_www_base() -> String {
    "https://www.bilibili.com".into()
}

impl Default for PlatformEndpoints {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            space_base: default_space_base(),
            www_base: default_www_base(),
        }
    }
}

impl PlatformEndpoints {
    /// Every endpoint on one host (local fakes).
    pub fn single_host(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            api_base: base.clone(),
            space_base: base.clone(),
            www_base: base,
        }
    }

    /// Strip trailing slashes so paths can be appended with `format!`.
    pub fn normalized(mut self) -> Self {
        for s in [&mut self.api_base, &mut self.space_base, &mut self.www_base] {
            let trimmed = s.trim_end_matches('/').len();
            s.truncate(trimmed);
        }
        self
    }

    pub fn author_url(&self, mid: &str) -> String {
        format!("{}/{mid}", self.space_base)
    }

    pub fn video_url(&self, bvid: &str) -> String {
        format!("{}/video/{bvid}", self.www_base)
    }
}

/// One channel's recent uploads. Implemented by [`PlatformClient`]; the aggregator only
/// sees this trait.
#[async_trait::async_trait]
pub trait SourceFeed: Send + Sync {
    /// Warm up credentials. Default: nothing to do.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_source_items(
        &self,
        source_id: &str,
        limit: usize,
        name_override: &str,
    ) -> Result<Vec<Item>>;
}
