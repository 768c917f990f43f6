//! Popularity transforms, normalization, dedup and ordering.
//!
//! All functions here are pure; the engine feeds them a clock reading so the
//! ordering is reproducible for a fixed input set.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::cache::fingerprint;
use crate::ingest::types::{Popularity, RawCandidate};
use crate::model::TrendCandidate;
use crate::trends::keywords::{categorize, dedup_key, extract_keywords};

pub const RECENCY_BONUS: f32 = 5.0;
const RECENCY_WINDOW_HOURS: f32 = 24.0;
const DESCRIPTION_MAX_CHARS: usize = 280;

/// Map a source metric into 0–100. Monotonic in the metric.
pub fn popularity_score(p: Popularity, published_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    let raw = match p {
        // 100k votes saturate.
        Popularity::Upvotes(n) => 20.0 * (1.0 + n as f64).log10() as f32,
        // 10M views saturate.
        Popularity::Views(n) => 100.0 * (1.0 + n as f64).log10() as f32 / 7.0,
        Popularity::Score(s) => s,
        Popularity::Recency => {
            let age_h = age_hours(published_at, now);
            90.0 * (1.0 - age_h / RECENCY_WINDOW_HOURS).max(0.0)
        }
    };
    clamp_score(raw)
}

/// Small additive bonus for items published within the last hour.
pub fn recency_bonus(published_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    if age_hours(published_at, now) < 1.0 {
        RECENCY_BONUS
    } else {
        0.0
    }
}

/// Interactions on a log scale (10k saturate); otherwise a share of the trend score.
pub fn engagement_score(interactions: Option<u64>, trend_score: f32) -> f32 {
    match interactions {
        Some(n) => clamp_score(25.0 * (1.0 + n as f64).log10() as f32),
        None => clamp_score(trend_score * 0.6),
    }
}

fn age_hours(published_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    let age = now.signed_duration_since(published_at);
    // Future-dated items count as brand new.
    age.max(ChronoDuration::zero()).num_seconds() as f32 / 3600.0
}

fn clamp_score(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 100.0)
    }
}

pub fn trend_id(source: &str, topic: &str) -> String {
    fingerprint("trend", &[source, &topic.to_lowercase()])
}

/// Turn one raw item into a scored, categorized candidate.
pub fn normalize(raw: &RawCandidate, discovered_at: DateTime<Utc>, now: DateTime<Utc>) -> TrendCandidate {
    let keywords = extract_keywords(&raw.keywords, &raw.title, &raw.description);
    let category = categorize(&keywords);
    let base = popularity_score(raw.popularity, raw.published_at, now);
    let trend_score = clamp_score(base + recency_bonus(raw.published_at, now));
    let description: String = raw.description.chars().take(DESCRIPTION_MAX_CHARS).collect();

    TrendCandidate {
        id: trend_id(&raw.source, &raw.title),
        topic: raw.title.clone(),
        description,
        source: raw.source.clone(),
        url: raw.url.clone(),
        keywords,
        category,
        trend_score,
        engagement_score: engagement_score(raw.interactions, trend_score),
        published_at: raw.published_at,
        discovered_at,
    }
}

/// Ranking order: score desc, discovered desc, then topic and id ascending so
/// the order is total.
pub fn rank_order(a: &TrendCandidate, b: &TrendCandidate) -> Ordering {
    b.trend_score
        .total_cmp(&a.trend_score)
        .then_with(|| b.discovered_at.cmp(&a.discovered_at))
        .then_with(|| a.topic.cmp(&b.topic))
        .then_with(|| a.id.cmp(&b.id))
}

/// Collapse candidates sharing a keyword set, keeping the best-ranked one.
pub fn dedup(cands: Vec<TrendCandidate>) -> Vec<TrendCandidate> {
    let mut best: HashMap<String, TrendCandidate> = HashMap::with_capacity(cands.len());
    for c in cands {
        let key = dedup_key(&c.keywords, &c.topic);
        match best.get(&key) {
            Some(kept) if rank_order(kept, &c) != Ordering::Greater => {}
            _ => {
                best.insert(key, c);
            }
        }
    }
    best.into_values().collect()
}

/// Dedup, sort, truncate.
pub fn rank(cands: Vec<TrendCandidate>, limit: usize) -> Vec<TrendCandidate> {
    let mut out = dedup(cands);
    out.sort_by(rank_order);
    out.truncate(limit);
    out
}
