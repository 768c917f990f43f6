//! Trend ranking engine.
//!
//! Fans out to every registered source, scores and dedups what comes back,
//! and keeps the ranked list in a TTL cache under a single fixed key. The
//! suitability denylist applies only when a trend is picked for generation;
//! `/trends` still shows everything that ranked.

pub mod keywords;
pub mod scoring;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};

use crate::cache::TtlCache;
use crate::error::PipelineError;
use crate::ingest::{self, types::TrendSource};
use crate::model::TrendCandidate;
use crate::trends::keywords::content_tokens;

pub const RANKED_KEY: &str = "trends:ranked";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendSettings {
    /// How many ranked candidates to keep.
    pub limit: usize,
    pub max_concurrent_fetches: usize,
    /// Sensitive keywords that make a topic ineligible for generation.
    pub denylist: Vec<String>,
}

impl Default for TrendSettings {
    fn default() -> Self {
        Self {
            limit: 20,
            max_concurrent_fetches: 4,
            denylist: [
                "tragedy", "death", "dies", "killed", "shooting", "war", "suicide", "disaster",
                "terror", "terrorist", "abuse", "crash", "funeral", "massacre",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

pub struct TrendEngine {
    sources: RwLock<Vec<Arc<dyn TrendSource>>>,
    settings: RwLock<TrendSettings>,
    refresh_ttl: RwLock<Duration>,
    cache: TtlCache<Arc<Vec<TrendCandidate>>>,
}

impl TrendEngine {
    /// `refresh_ttl` should match the trend-refresh interval.
    pub fn new(
        sources: Vec<Arc<dyn TrendSource>>,
        settings: TrendSettings,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            sources: RwLock::new(sources),
            settings: RwLock::new(settings),
            refresh_ttl: RwLock::new(refresh_ttl),
            cache: TtlCache::new("trends"),
        }
    }

    pub fn add_source(&self, src: Arc<dyn TrendSource>) {
        write(&self.sources).push(src);
        self.cache.invalidate_all(Some(RANKED_KEY));
    }

    pub fn source_count(&self) -> usize {
        read(&self.sources).len()
    }

    pub fn settings(&self) -> TrendSettings {
        read(&self.settings).clone()
    }

    pub fn set_refresh_ttl(&self, ttl: Duration) {
        *write(&self.refresh_ttl) = ttl;
    }

    pub fn cache(&self) -> &TtlCache<Arc<Vec<TrendCandidate>>> {
        &self.cache
    }

    /// Last ranked list, without touching sources.
    pub fn cached(&self) -> Option<Arc<Vec<TrendCandidate>>> {
        self.cache.get(RANKED_KEY)
    }

    /// Ranked list from cache, computing it once if missing or expired.
    pub async fn ranked(&self) -> Result<Arc<Vec<TrendCandidate>>, PipelineError> {
        let sources = read(&self.sources).clone();
        let settings = self.settings();
        let ttl = *read(&self.refresh_ttl);
        self.cache
            .get_or_compute(RANKED_KEY, ttl, move || compute_ranked(sources, settings))
            .await
    }

    /// Drop the cached list and rank afresh.
    pub async fn refresh(&self) -> Result<Vec<TrendCandidate>, PipelineError> {
        self.cache.invalidate_all(Some(RANKED_KEY));
        let ranked = self.ranked().await?;
        Ok(ranked.as_ref().clone())
    }

    pub fn is_topic_suitable(&self, c: &TrendCandidate) -> bool {
        let settings = read(&self.settings);
        is_suitable(c, &settings.denylist)
    }

    /// Highest-ranked candidate that passes the suitability filter.
    pub async fn select_for_generation(&self) -> Result<TrendCandidate, PipelineError> {
        let ranked = self.ranked().await?;
        let picked = ranked.iter().find(|c| self.is_topic_suitable(c)).cloned();
        match picked {
            Some(c) => Ok(c),
            None => {
                counter!("trends_no_suitable_total").increment(1);
                Err(PipelineError::NoSuitableTrend {
                    candidates: ranked.len(),
                })
            }
        }
    }
}

fn is_suitable(c: &TrendCandidate, denylist: &[String]) -> bool {
    let topic_tokens = content_tokens(&c.topic);
    !c.keywords
        .iter()
        .chain(topic_tokens.iter())
        .any(|w| denylist.iter().any(|d| d.eq_ignore_ascii_case(w)))
}

async fn compute_ranked(
    sources: Vec<Arc<dyn TrendSource>>,
    settings: TrendSettings,
) -> Result<Arc<Vec<TrendCandidate>>, PipelineError> {
    let report = ingest::fetch_all(&sources, settings.max_concurrent_fetches).await;
    if report.all_failed() {
        let reason = report
            .failures
            .iter()
            .map(|f| format!("{}: {}", f.source, f.error))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(PipelineError::unavailable("trend-sources", reason));
    }

    let now = Utc::now();
    let normalized: Vec<TrendCandidate> = report
        .batches
        .iter()
        .flat_map(|b| b.items.iter().map(move |raw| scoring::normalize(raw, b.discovered_at, now)))
        .collect();
    let raw_count = normalized.len();
    let ranked = scoring::rank(normalized, settings.limit);

    gauge!("trends_ranked").set(ranked.len() as f64);
    tracing::info!(
        target: "trends",
        sources = sources.len(),
        failed = report.failures.len(),
        raw = raw_count,
        ranked = ranked.len(),
        top = ranked.first().map(|c| c.topic.as_str()).unwrap_or("-"),
        "trends ranked"
    );
    Ok(Arc::new(ranked))
}

fn read<T>(l: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}
