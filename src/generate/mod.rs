//! Content generation pipeline.
//!
//! `generate` never fails: any adapter error, timeout or empty answer falls
//! back to a templated post marked `fallback = true`. Posts are cached per
//! `(trend id, style)`; hashtags and variations are cached per content.

pub mod adapter;
pub mod prompts;
pub mod quality;

use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::{fingerprint, TtlCache};
use crate::error::{timeboxed, PipelineError};
use crate::generate::adapter::{
    sanitize_output, CompletionParams, CompletionTask, DynTextGenerator,
};
use crate::model::{GeneratedPost, PostStyle, TrendCandidate};

pub const MAX_HASHTAGS: usize = 8;
pub const MAX_VARIATIONS: usize = 3;
/// Normalized Levenshtein similarity at or above which two texts count as the same.
pub const NEAR_DUPLICATE_SIMILARITY: f64 = 0.9;
const MAX_POST_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Pin one style; otherwise cycles rotate through all four.
    pub style: Option<PostStyle>,
    pub cache_ttl_secs: u64,
    pub variations: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            style: None,
            cache_ttl_secs: 30 * 60,
            variations: true,
            temperature: 0.7,
            max_tokens: 220,
        }
    }
}

pub struct ContentGenerator {
    adapter: DynTextGenerator,
    settings: RwLock<GenerationSettings>,
    posts: TtlCache<String>,
    hashtags: TtlCache<Vec<String>>,
    variations: TtlCache<Vec<String>>,
}

impl ContentGenerator {
    pub fn new(adapter: DynTextGenerator, settings: GenerationSettings) -> Self {
        Self {
            adapter,
            settings: RwLock::new(settings),
            posts: TtlCache::new("posts"),
            hashtags: TtlCache::new("hashtags"),
            variations: TtlCache::new("variations"),
        }
    }

    pub fn adapter_name(&self) -> &'static str {
        self.adapter.name()
    }

    pub fn settings(&self) -> GenerationSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Style for the n-th cycle.
    pub fn style_for_cycle(&self, n: u64) -> PostStyle {
        self.settings().style.unwrap_or_else(|| PostStyle::rotate(n))
    }

    /// Evict expired entries from all three caches.
    pub fn sweep_caches(&self) -> usize {
        self.posts.sweep() + self.hashtags.sweep() + self.variations.sweep()
    }

    pub async fn generate(&self, trend: &TrendCandidate, style: PostStyle) -> GeneratedPost {
        let t0 = Instant::now();
        let settings = self.settings();
        let ttl = Duration::from_secs(settings.cache_ttl_secs.max(1));

        let post_key = fingerprint("post", &[&trend.id, style.as_str()]);
        let params = CompletionParams {
            task: CompletionTask::Post,
            system: prompts::post_system(style),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        };
        let generated = self
            .complete_cached(&self.posts, &post_key, ttl, prompts::post_prompt(trend, style), params, |raw| {
                let s = sanitize_output(raw, MAX_POST_CHARS);
                if s.is_empty() {
                    Err("empty completion".to_string())
                } else {
                    Ok(s)
                }
            })
            .await;

        let (content, fallback) = match generated {
            Ok(c) => (c, false),
            Err(e) => {
                counter!("generate_fallback_total", "adapter" => self.adapter.name()).increment(1);
                tracing::warn!(target: "generate", trend = %trend.id, style = style.as_str(), error = %e, "generation failed, using template");
                (prompts::stub_post(trend, style), true)
            }
        };

        let hashtags = if fallback {
            keyword_hashtags(trend)
        } else {
            self.hashtags_for(trend, &content, ttl, &settings).await
        };

        let variations = if fallback || !settings.variations {
            Vec::new()
        } else {
            self.variations_for(trend, &content, ttl, &settings).await
        };

        let quality_score = quality::quality_score(&content, &hashtags);
        let insights = quality::insights(trend, quality_score);
        let latency = t0.elapsed();
        histogram!("generate_latency_ms").record(latency.as_secs_f64() * 1_000.0);

        GeneratedPost {
            id: Uuid::new_v4().to_string(),
            trend_id: trend.id.clone(),
            trend_topic: trend.topic.clone(),
            content,
            style,
            hashtags,
            variations,
            insights,
            generation_latency_ms: latency.as_millis() as u64,
            quality_score,
            fallback,
            created_at: Utc::now(),
        }
    }

    async fn hashtags_for(
        &self,
        trend: &TrendCandidate,
        content: &str,
        ttl: Duration,
        settings: &GenerationSettings,
    ) -> Vec<String> {
        let key = fingerprint("tags", &[content]);
        let params = CompletionParams {
            task: CompletionTask::Hashtags,
            system: prompts::post_system(PostStyle::Informative),
            temperature: 0.3,
            max_tokens: settings.max_tokens.min(80),
        };
        let out = self
            .complete_cached(&self.hashtags, &key, ttl, prompts::hashtags_prompt(trend, content), params, |raw| {
                let tags = parse_hashtags(raw);
                if tags.is_empty() {
                    Err("no hashtags in completion".to_string())
                } else {
                    Ok(tags)
                }
            })
            .await;
        match out {
            Ok(tags) => tags,
            Err(e) => {
                tracing::debug!(target: "generate", trend = %trend.id, error = %e, "hashtags from keywords");
                keyword_hashtags(trend)
            }
        }
    }

    async fn variations_for(
        &self,
        trend: &TrendCandidate,
        content: &str,
        ttl: Duration,
        settings: &GenerationSettings,
    ) -> Vec<String> {
        let key = fingerprint("vars", &[content]);
        let params = CompletionParams {
            task: CompletionTask::Variations,
            system: prompts::post_system(PostStyle::Creative),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        };
        let owned = content.to_string();
        let out = self
            .complete_cached(
                &self.variations,
                &key,
                ttl,
                prompts::variations_prompt(trend, content, MAX_VARIATIONS),
                params,
                move |raw| Ok(parse_variations(raw, &owned)),
            )
            .await;
        out.unwrap_or_else(|e| {
            tracing::debug!(target: "generate", trend = %trend.id, error = %e, "variations skipped");
            Vec::new()
        })
    }

    /// One timeboxed adapter call behind `cache`, with `parse` applied before
    /// the value is stored so unusable answers are not cached.
    async fn complete_cached<V, P>(
        &self,
        cache: &TtlCache<V>,
        key: &str,
        ttl: Duration,
        prompt: String,
        params: CompletionParams,
        parse: P,
    ) -> Result<V, PipelineError>
    where
        V: Clone + Send + Sync + 'static,
        P: FnOnce(&str) -> Result<V, String> + Send + 'static,
    {
        let adapter = self.adapter.clone();
        let cache_key = key.to_string();
        cache
            .get_or_compute(key, ttl, move || async move {
                let name = adapter.name();
                let raw = timeboxed(name, adapter.timeout(), adapter.complete(&prompt, &params)).await?;
                parse(&raw).map_err(|reason| PipelineError::CacheComputeFailed {
                    key: cache_key,
                    reason,
                })
            })
            .await
    }
}

/// `#Tag` tokens, alphanumerics only, unique case-insensitively, at most eight.
pub fn parse_hashtags(raw: &str) -> Vec<String> {
    let candidates = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_start_matches('#'));
    normalize_hashtags(candidates)
}

fn normalize_hashtags<'a, I: IntoIterator<Item = &'a str>>(words: I) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for w in words {
        let body: String = w.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect();
        if body.is_empty() || body.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if seen.insert(body.to_lowercase()) {
            out.push(format!("#{body}"));
        }
        if out.len() == MAX_HASHTAGS {
            break;
        }
    }
    out
}

pub fn keyword_hashtags(trend: &TrendCandidate) -> Vec<String> {
    let words = trend
        .keywords
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(trend.category.as_str()));
    normalize_hashtags(words)
}

/// One variation per line, list markers stripped, near-duplicates of the
/// original and of each other removed, at most three.
pub fn parse_variations(raw: &str, original: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in raw.lines() {
        let stripped = line
            .trim()
            .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*'))
            .trim();
        let v = sanitize_output(stripped, MAX_POST_CHARS);
        if v.is_empty() || is_near_duplicate(&v, original) {
            continue;
        }
        if out.iter().any(|kept| is_near_duplicate(kept, &v)) {
            continue;
        }
        out.push(v);
        if out.len() == MAX_VARIATIONS {
            break;
        }
    }
    out
}

pub fn is_near_duplicate(a: &str, b: &str) -> bool {
    strsim::normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase()) >= NEAR_DUPLICATE_SIMILARITY
}
