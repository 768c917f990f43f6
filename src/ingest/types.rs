// src/ingest/types.rs
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default per-source timebox.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(8);

/// Popularity as reported by the upstream feed, before any scaling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric", content = "value", rename_all = "snake_case")]
pub enum Popularity {
    /// Community votes (forums, aggregators).
    Upvotes(u64),
    /// View or play counts (video, sports highlights).
    Views(u64),
    /// Source already reports a 0–100 score.
    Score(f32),
    /// No metric; popularity is inferred from how recent the item is.
    Recency,
}

/// Unranked topic as fetched from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub source: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Tags supplied by the source, if any.
    #[serde(default)]
    pub keywords: Vec<String>,
    pub published_at: DateTime<Utc>,
    pub popularity: Popularity,
    /// Comments/shares/replies; absent when the source does not report it.
    #[serde(default)]
    pub interactions: Option<u64>,
}

impl RawCandidate {
    pub fn new(source: impl Into<String>, title: impl Into<String>, popularity: Popularity) -> Self {
        Self {
            source: source.into(),
            title: title.into(),
            description: String::new(),
            url: None,
            keywords: Vec::new(),
            published_at: Utc::now(),
            popularity,
            interactions: None,
        }
    }

    pub fn with_description(mut self, d: impl Into<String>) -> Self {
        self.description = d.into();
        self
    }

    pub fn with_keywords<I, S>(mut self, kws: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = kws.into_iter().map(Into::into).collect();
        self
    }

    pub fn published(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = at;
        self
    }

    pub fn with_interactions(mut self, n: u64) -> Self {
        self.interactions = Some(n);
        self
    }
}

/// Anything that can surface trend candidates. Each source is timeboxed
/// independently by the caller.
#[async_trait::async_trait]
pub trait TrendSource: Send + Sync {
    async fn fetch_candidates(&self) -> Result<Vec<RawCandidate>>;
    fn name(&self) -> &str;
    fn timeout(&self) -> Duration {
        DEFAULT_SOURCE_TIMEOUT
    }
}
