//! Quality heuristics and derived insights.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Category, PostInsights, TrendCandidate};

pub const TARGET_MIN_CHARS: usize = 80;
pub const TARGET_MAX_CHARS: usize = 280;

const W_HASHTAGS: f32 = 0.3;
const W_LENGTH: f32 = 0.4;
const W_CLEAN: f32 = 0.3;

/// Boilerplate and artifacts that make a post look machine-made or broken.
static FLAGGED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(as an ai\b|language model|lorem ipsum|\{\{|\}\}|\[insert|click here|buy now|100% guaranteed|https?://\S+)",
    )
    .expect("flagged pattern regex")
});

pub fn has_flagged_pattern(content: &str) -> bool {
    FLAGGED.is_match(content)
}

/// Weighted sum of three checks, clamped to `[0, 1]`:
/// hashtags present, length inside the target band (half credit within 50%
/// of the band edges), no flagged patterns.
pub fn quality_score(content: &str, hashtags: &[String]) -> f32 {
    let mut score = 0.0;
    if !hashtags.is_empty() {
        score += W_HASHTAGS;
    }

    let n = content.chars().count();
    if (TARGET_MIN_CHARS..=TARGET_MAX_CHARS).contains(&n) {
        score += W_LENGTH;
    } else if (TARGET_MIN_CHARS / 2..=TARGET_MAX_CHARS + TARGET_MAX_CHARS / 2).contains(&n) {
        score += W_LENGTH / 2.0;
    }

    if !content.trim().is_empty() && !has_flagged_pattern(content) {
        score += W_CLEAN;
    }
    score.clamp(0.0, 1.0)
}

fn audience(category: Category) -> &'static str {
    match category {
        Category::Technology => "tech enthusiasts and early adopters",
        Category::Health => "health-conscious readers",
        Category::Business => "professionals and founders",
        Category::Science => "science-curious readers",
        Category::Environment => "climate-aware readers",
        Category::Finance => "investors and market watchers",
        Category::Sports => "sports fans",
        Category::Entertainment => "pop culture followers",
        Category::General => "general audience",
    }
}

fn best_hour_utc(category: Category) -> u8 {
    match category {
        Category::Business | Category::Finance => 13,
        Category::Health => 12,
        Category::Environment => 14,
        Category::Technology => 15,
        Category::Science => 16,
        Category::General => 17,
        Category::Sports => 19,
        Category::Entertainment => 20,
    }
}

pub fn insights(trend: &TrendCandidate, quality: f32) -> PostInsights {
    let reach = (0.6 * trend.trend_score + 0.4 * trend.engagement_score) / 100.0;
    let predicted = reach * (0.5 + 0.5 * quality.clamp(0.0, 1.0));
    PostInsights {
        predicted_engagement: predicted.clamp(0.0, 1.0),
        audience: audience(trend.category).to_string(),
        best_posting_hour_utc: best_hour_utc(trend.category),
    }
}
