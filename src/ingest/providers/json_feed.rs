use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};

use crate::ingest::types::{Popularity, RawCandidate, TrendSource, DEFAULT_SOURCE_TIMEOUT};

/// Which field of a JSON item carries popularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopularityField {
    #[default]
    Upvotes,
    Views,
    Score,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Document {
    Items { items: Vec<Item> },
    Bare(Vec<Item>),
}

#[derive(Debug, Deserialize)]
struct Item {
    title: String,
    #[serde(default, alias = "summary")]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, alias = "score", alias = "points")]
    upvotes: Option<f64>,
    #[serde(default)]
    views: Option<u64>,
    #[serde(default, alias = "num_comments")]
    comments: Option<u64>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

/// JSON endpoint returning `[{title, upvotes|views, ...}]` or `{items: [...]}`.
pub struct JsonFeedSource {
    name: String,
    mode: Mode,
    field: PopularityField,
    timeout: Duration,
    max_items: usize,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl JsonFeedSource {
    pub fn from_fixture_str(name: impl Into<String>, s: &str, field: PopularityField) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Fixture(s.to_string()),
            field,
            timeout: DEFAULT_SOURCE_TIMEOUT,
            max_items: 50,
        }
    }

    pub fn from_url(
        name: impl Into<String>,
        url: impl Into<String>,
        field: PopularityField,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Http {
                url: url.into(),
                client,
            },
            field,
            timeout: DEFAULT_SOURCE_TIMEOUT,
            max_items: 50,
        }
    }

    pub fn with_timeout(mut self, t: Duration) -> Self {
        self.timeout = t;
        self
    }

    pub fn with_max_items(mut self, n: usize) -> Self {
        self.max_items = n.max(1);
        self
    }

    fn popularity(&self, it: &Item) -> Popularity {
        match self.field {
            PopularityField::Upvotes => it
                .upvotes
                .map(|v| Popularity::Upvotes(v.max(0.0) as u64))
                .unwrap_or(Popularity::Recency),
            PopularityField::Views => it
                .views
                .map(Popularity::Views)
                .unwrap_or(Popularity::Recency),
            PopularityField::Score => it
                .upvotes
                .map(|v| Popularity::Score(v as f32))
                .unwrap_or(Popularity::Recency),
        }
    }

    fn parse_items_from_str(&self, s: &str) -> Result<Vec<RawCandidate>> {
        let t0 = std::time::Instant::now();
        let doc: Document = serde_json::from_str(s)
            .with_context(|| format!("parsing json feed from {}", self.name))?;
        let items = match doc {
            Document::Items { items } => items,
            Document::Bare(items) => items,
        };

        let out: Vec<RawCandidate> = items
            .into_iter()
            .take(self.max_items)
            .filter(|it| !it.title.trim().is_empty())
            .map(|it| {
                let mut c = RawCandidate::new(self.name.clone(), it.title.clone(), self.popularity(&it))
                    .with_keywords(it.tags)
                    .with_description(it.description.unwrap_or_default());
                c.url = it.url;
                c.interactions = it.comments;
                if let Some(at) = it.published_at {
                    c = c.published(at);
                }
                c
            })
            .collect();

        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_items_parsed_total", "source" => "json").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl TrendSource for JsonFeedSource {
    async fn fetch_candidates(&self) -> Result<Vec<RawCandidate>> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http { url, client } => {
                let body = client
                    .get(url.as_str())
                    .send()
                    .await
                    .with_context(|| format!("{} http get()", self.name))?
                    .error_for_status()
                    .with_context(|| format!("{} http status", self.name))?
                    .text()
                    .await
                    .with_context(|| format!("{} http .text()", self.name))?;
                self.parse_items_from_str(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
