//! # Models
//! Feed items and configured sources shared by the platform client, cache and aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One upload from a source channel. Built once from a platform record, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub title: String,
    pub thumbnail_url: String,
    /// Canonical watch-page URL.
    pub url: String,
    pub author: String,
    pub author_url: String,
    #[serde(rename = "time_posted")]
    pub posted_at: DateTime<Utc>,
    /// Display string as sent by the platform, e.g. "12:34".
    pub duration: String,
    pub play_count: i64,
    /// Platform-assigned id of the upload (BV id).
    #[serde(rename = "bvid")]
    pub external_id: String,
}

/// A channel whose uploads are aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "mid")]
    pub external_id: String,
    /// Replaces the platform's author name (co-authored uploads report the lead author).
    #[serde(rename = "name", default, skip_serializing_if = "Option::is_none")]
    pub display_name_override: Option<String>,
}

impl Source {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            display_name_override: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name_override = Some(name.into());
        self
    }

    /// Override as passed to the platform client; empty means "keep the platform's author".
    pub fn name_override(&self) -> &str {
        self.display_name_override.as_deref().unwrap_or_default()
    }

    /// Name used in logs: the override if set, otherwise the id.
    pub fn label(&self) -> &str {
        match self.display_name_override.as_deref() {
            Some(n) if !n.is_empty() => n,
            _ => &self.external_id,
        }
    }
}

/// Stable sort, newest first. Items posted at the same instant keep their relative order.
pub fn sort_newest_first(items: &mut [Item]) {
    items.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
}

/// Truncate to `limit` items; `0` means unlimited.
pub fn apply_limit(items: &mut Vec<Item>, limit: usize) {
    if limit > 0 {
        items.truncate(limit);
    }
}

#[cfg(test)]
pub(crate) fn item_at(id: &str, ts: i64) -> Item {
    Item {
        title: format!("video {id}"),
        thumbnail_url: format!("https://img.test/{id}.jpg"),
        url: format!("https://www.test/video/{id}"),
        author: "tester".into(),
        author_url: "https://space.test/1".into(),
        posted_at: DateTime::from_timestamp(ts, 0).unwrap_or_default(),
        duration: "01:00".into(),
        play_count: 1,
        external_id: id.into(),
    }
}
