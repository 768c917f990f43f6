// src/ingest/config.rs
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::providers::{JsonFeedSource, PopularityField, RssSource};
use crate::ingest::types::TrendSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Json,
}

/// One `[[sources]]` entry. Exactly one of `url` / `fixture` must be set;
/// fixtures are read once at startup (offline runs, tests).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub fixture: Option<PathBuf>,
    /// JSON feeds only.
    #[serde(default)]
    pub popularity: PopularityField,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timeout_secs() -> u64 {
    8
}
fn default_max_items() -> usize {
    50
}
fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("source name must not be empty");
        }
        match (&self.url, &self.fixture) {
            (Some(_), Some(_)) => bail!("source `{}` sets both url and fixture", self.name),
            (None, None) => bail!("source `{}` needs a url or a fixture", self.name),
            _ => {}
        }
        if self.timeout_secs == 0 || self.timeout_secs > 120 {
            bail!("source `{}`: timeout_secs must be within 1..=120", self.name);
        }
        Ok(())
    }
}

/// Shared HTTP client for feed sources.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("trend-content-pipeline/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(4))
        .build()
        .context("building feed http client")
}

/// Build every enabled source. Names must be unique.
pub fn build_sources(configs: &[SourceConfig]) -> Result<Vec<Arc<dyn TrendSource>>> {
    let mut seen = BTreeSet::new();
    let mut client: Option<reqwest::Client> = None;
    let mut out: Vec<Arc<dyn TrendSource>> = Vec::new();

    for cfg in configs.iter().filter(|c| c.enabled) {
        cfg.validate()?;
        if !seen.insert(cfg.name.trim().to_string()) {
            return Err(anyhow!("duplicate source name `{}`", cfg.name));
        }
        let timeout = Duration::from_secs(cfg.timeout_secs);

        let src: Arc<dyn TrendSource> = match (&cfg.fixture, &cfg.url) {
            (Some(path), _) => {
                let body = fs::read_to_string(path)
                    .with_context(|| format!("reading fixture {}", path.display()))?;
                match cfg.kind {
                    SourceKind::Rss => Arc::new(
                        RssSource::from_fixture_str(cfg.name.clone(), &body)
                            .with_timeout(timeout)
                            .with_max_items(cfg.max_items),
                    ),
                    SourceKind::Json => Arc::new(
                        JsonFeedSource::from_fixture_str(cfg.name.clone(), &body, cfg.popularity)
                            .with_timeout(timeout)
                            .with_max_items(cfg.max_items),
                    ),
                }
            }
            (None, Some(url)) => {
                let c = match &client {
                    Some(c) => c.clone(),
                    None => {
                        let c = http_client()?;
                        client = Some(c.clone());
                        c
                    }
                };
                match cfg.kind {
                    SourceKind::Rss => Arc::new(
                        RssSource::from_url(cfg.name.clone(), url.clone(), c)
                            .with_timeout(timeout)
                            .with_max_items(cfg.max_items),
                    ),
                    SourceKind::Json => Arc::new(
                        JsonFeedSource::from_url(cfg.name.clone(), url.clone(), cfg.popularity, c)
                            .with_timeout(timeout)
                            .with_max_items(cfg.max_items),
                    ),
                }
            }
            (None, None) => bail!("source `{}` needs a url or a fixture", cfg.name),
        };
        tracing::info!(target: "ingest", source = %cfg.name, kind = ?cfg.kind, "trend source configured");
        out.push(src);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_cfg(name: &str, path: PathBuf) -> SourceConfig {
        SourceConfig {
            name: name.into(),
            kind: SourceKind::Json,
            url: None,
            fixture: Some(path),
            popularity: PopularityField::Upvotes,
            timeout_secs: 5,
            max_items: 10,
            enabled: true,
        }
    }

    #[test]
    fn toml_entry_takes_defaults() {
        #[derive(Deserialize)]
        struct Doc {
            sources: Vec<SourceConfig>,
        }
        let doc: Doc = toml::from_str(
            r#"
            [[sources]]
            name = "forum"
            kind = "json"
            url = "https://example.com/top.json"
            popularity = "upvotes"
            "#,
        )
        .unwrap();
        let s = &doc.sources[0];
        assert_eq!(s.timeout_secs, 8);
        assert_eq!(s.max_items, 50);
        assert!(s.enabled);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn rejects_ambiguous_and_duplicate_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("feed.json");
        fs::write(&p, r#"[{"title": "A", "upvotes": 3}]"#).unwrap();

        let mut both = fixture_cfg("x", p.clone());
        both.url = Some("https://example.com".into());
        assert!(both.validate().is_err());

        let dup = vec![fixture_cfg("x", p.clone()), fixture_cfg("x", p.clone())];
        assert!(build_sources(&dup).is_err());

        let mut off = fixture_cfg("y", p.clone());
        off.enabled = false;
        let built = build_sources(&[fixture_cfg("x", p), off]).unwrap();
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].name(), "x");
    }
}
