// src/config/app.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::Source;
use crate::platform::{PlatformEndpoints, RetryPolicy};
use crate::worker::DEFAULT_WORKERS;

pub const ENV_CONFIG_PATH: &str = "CONFIG_PATH";

pub const DEFAULT_PORT: u16 = 8082;
/// Port used when the configured one is out of range.
pub const FALLBACK_PORT: u16 = 8080;
pub const DEFAULT_LIMIT: usize = 25;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

fn default_timeout_secs() -> u64 {
    30
}
fn default_retry_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(flatten)]
    pub endpoints: PlatformEndpoints,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            endpoints: PlatformEndpoints::default(),
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl PlatformConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_attempts(self.retry_attempts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub port: u32,
    pub channels: Vec<Source>,
    /// Default number of items per response.
    pub limit: usize,
    /// Default cache freshness window.
    pub cache_ttl_secs: u64,
    pub workers: usize,
    /// Optional bound on one channel fetch; 0 or absent disables it.
    pub fetch_deadline_secs: Option<u64>,
    pub platform: PlatformConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: u32::from(DEFAULT_PORT),
            channels: Vec::new(),
            limit: DEFAULT_LIMIT,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            workers: DEFAULT_WORKERS,
            fetch_deadline_secs: None,
            platform: PlatformConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from an explicit path. `.toml` is parsed as TOML, anything else as JSON.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse(&content, &ext)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg.validate())
    }

    /// Resolution order:
    /// 1) `explicit` (e.g. `--config`)
    /// 2) $CONFIG_PATH
    /// 3) config/config.json, config/config.toml
    /// 4) config/config.json next to the executable
    ///
    /// 1) and 2) must exist; if none of the fallbacks exist, defaults are used.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        match fallback_path() {
            Some(p) => Self::load_from(&p),
            None => Ok(Self::default().validate()),
        }
    }

    /// Coerce out-of-range values to defaults and tidy the channel list.
    pub fn validate(mut self) -> Self {
        if self.port == 0 || self.port > u32::from(u16::MAX) {
            self.port = u32::from(FALLBACK_PORT);
        }
        if self.limit == 0 {
            self.limit = DEFAULT_LIMIT;
        }
        if self.workers == 0 {
            self.workers = DEFAULT_WORKERS;
        }
        self.channels = self
            .channels
            .into_iter()
            .filter_map(|mut s| {
                s.external_id = s.external_id.trim().to_string();
                if s.external_id.is_empty() {
                    return None;
                }
                s.display_name_override = s
                    .display_name_override
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty());
                Some(s)
            })
            .collect();
        self
    }

    pub fn port(&self) -> u16 {
        u16::try_from(self.port).unwrap_or(FALLBACK_PORT)
    }

    pub fn fetch_deadline(&self) -> Option<Duration> {
        self.fetch_deadline_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

fn fallback_path() -> Option<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("config/config.json"),
        PathBuf::from("config/config.toml"),
    ];
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(dir.join("config").join("config.json"));
    }
    candidates.into_iter().find(|p| p.exists())
}

fn parse(s: &str, ext: &str) -> Result<AppConfig> {
    if ext == "toml" {
        return toml::from_str(s).map_err(Into::into);
    }
    serde_json::from_str(s).map_err(Into::into)
}
