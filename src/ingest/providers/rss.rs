use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::ingest::types::{Popularity, RawCandidate, TrendSource, DEFAULT_SOURCE_TIMEOUT};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "category", default)]
    category: Vec<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let dt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    DateTime::from_timestamp(dt.unix_timestamp(), 0)
}

/// RSS 2.0 feed. Items carry no popularity metric, so they rank on recency.
pub struct RssSource {
    name: String,
    mode: Mode,
    timeout: Duration,
    max_items: usize,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl RssSource {
    pub fn from_fixture_str(name: impl Into<String>, s: &str) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Fixture(s.to_string()),
            timeout: DEFAULT_SOURCE_TIMEOUT,
            max_items: 50,
        }
    }

    pub fn from_url(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Http {
                url: url.into(),
                client,
            },
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

    fn parse_items_from_str(&self, s: &str) -> Result<Vec<RawCandidate>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean)
            .with_context(|| format!("parsing rss xml from {}", self.name))?;

        let mut out = Vec::with_capacity(rss.channel.item.len().min(self.max_items));
        for it in rss.channel.item.into_iter().take(self.max_items) {
            let Some(title) = it.title.filter(|t| !t.trim().is_empty()) else {
                continue;
            };
            let mut c = RawCandidate::new(self.name.clone(), title, Popularity::Recency)
                .with_description(it.description.unwrap_or_default())
                .with_keywords(it.category);
            c.url = it.link;
            // Undated items count as just published.
            if let Some(at) = it.pub_date.as_deref().and_then(parse_rfc2822) {
                c = c.published(at);
            }
            out.push(c);
        }

        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_items_parsed_total", "source" => "rss").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl TrendSource for RssSource {
    async fn fetch_candidates(&self) -> Result<Vec<RawCandidate>> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http { url, client } => {
                let resp = client
                    .get(url.as_str())
                    .send()
                    .await
                    .with_context(|| format!("{} http get()", self.name))?
                    .error_for_status()
                    .with_context(|| format!("{} http status", self.name))?;
                let body = resp
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

/// quick-xml knows only the five XML entities; feeds happily embed HTML ones.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
