//! Local heuristic scoring.
//!
//! Each signal is a case-insensitive pattern with a weight in one category.
//! Hits in a category combine as a noisy-or: `1 - Π(1 - w)` over every match,
//! so repeated threats climb towards 1 without exceeding it. Positive
//! language then lowers the interpersonal categories, and shouting (mostly
//! capitals) raises every category that already has a signal.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{CategoryScores, ModerationCategory};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionBands {
    pub block: f32,
    pub flag: f32,
    pub review: f32,
}

impl Default for DecisionBands {
    fn default() -> Self {
        Self {
            block: 0.9,
            flag: 0.8,
            review: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRule {
    pub category: ModerationCategory,
    pub pattern: String,
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositiveLanguage {
    pub pattern: String,
    pub offset_per_hit: f32,
    pub max_offset: f32,
}

impl Default for PositiveLanguage {
    fn default() -> Self {
        Self {
            pattern: r"(?i)\b(love|thanks|thank you|great|awesome|congrats|congratulations|amazing|wonderful|support|kind|proud)\b".into(),
            offset_per_hit: 0.1,
            max_offset: 0.3,
        }
    }
}

/// Everything tunable about moderation; `config/moderation.json` has this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationTuning {
    /// Per-category threshold for "flagged"; missing keys use the built-ins.
    pub thresholds: BTreeMap<ModerationCategory, f32>,
    pub bands: DecisionBands,
    pub signals: Vec<SignalRule>,
    pub positive: PositiveLanguage,
    pub shouting_boost: f32,
}

/// Built-in per-category thresholds; spam and toxic are the most sensitive.
pub fn default_threshold(c: ModerationCategory) -> f32 {
    match c {
        ModerationCategory::Spam => 0.5,
        ModerationCategory::Toxic => 0.6,
        ModerationCategory::Harassment | ModerationCategory::Hate | ModerationCategory::Violence => 0.7,
        ModerationCategory::Sexual => 0.75,
        ModerationCategory::SelfHarm => 0.8,
        ModerationCategory::SexualMinors => 0.85,
    }
}

impl Default for ModerationTuning {
    fn default() -> Self {
        Self {
            thresholds: ModerationCategory::ALL
                .iter()
                .map(|c| (*c, default_threshold(*c)))
                .collect(),
            bands: DecisionBands::default(),
            signals: default_signals(),
            positive: PositiveLanguage::default(),
            shouting_boost: 0.1,
        }
    }
}

fn rule(category: ModerationCategory, pattern: &str, weight: f32) -> SignalRule {
    SignalRule {
        category,
        pattern: pattern.to_string(),
        weight,
    }
}

pub fn default_signals() -> Vec<SignalRule> {
    use ModerationCategory::*;
    vec![
        rule(Harassment, r"\b(hate|kill|destroy|hurt)\s+(you|u|him|her|them)\b", 0.65),
        rule(Harassment, r"\b(idiot|stupid|loser|moron|pathetic|worthless)\b", 0.35),
        rule(Harassment, r"\b(shut up|nobody likes you|you suck)\b", 0.4),
        rule(Hate, r"\b(subhuman|vermin|go back to your country)\b", 0.6),
        rule(Hate, r"\b(all|those)\s+\w+\s+(are|should be)\s+(animals|vermin|exterminated)\b", 0.8),
        rule(Violence, r"\b(die|kill|murder|shoot|stab)\b", 0.5),
        rule(Violence, r"\b(i will|i'll|gonna)\s+(kill|hurt|shoot|stab)\b", 0.7),
        rule(Sexual, r"\b(nsfw|nudes?|porn|xxx|explicit content)\b", 0.5),
        rule(
            SexualMinors,
            r"\b(underage|minors?|child|children|kids?)\b.{0,30}\b(nudes?|sexual|explicit|porn)\b",
            0.9,
        ),
        rule(SelfHarm, r"\b(kill myself|suicide|self[- ]harm|cut myself|end my life)\b", 0.7),
        rule(
            Spam,
            r"\b(buy now|click here|limited offer|free money|act now|dm me|follow for follow|guaranteed returns)\b",
            0.4,
        ),
        rule(Spam, r"https?://\S+", 0.2),
        rule(Spam, r"(!{3,}|\${2,})", 0.2),
        rule(Toxic, r"\b(hate|damn|crap|trash|garbage|sucks|wtf|stfu)\b", 0.3),
        rule(Toxic, r"\b(fuck\w*|shit\w*|bitch\w*)\b", 0.5),
    ]
}

/// Tuning with its patterns compiled.
#[derive(Debug)]
pub struct CompiledTuning {
    pub tuning: ModerationTuning,
    rules: Vec<(ModerationCategory, Regex, f32)>,
    positive: Regex,
}

impl CompiledTuning {
    pub fn compile(tuning: ModerationTuning) -> Result<Self> {
        let rules = tuning
            .signals
            .iter()
            .map(|r| {
                let re = Regex::new(&format!("(?i){}", r.pattern))
                    .with_context(|| format!("signal pattern for {}", r.category.as_str()))?;
                Ok((r.category, re, r.weight.clamp(0.0, 1.0)))
            })
            .collect::<Result<Vec<_>>>()?;
        let positive = Regex::new(&tuning.positive.pattern).context("positive language pattern")?;
        Ok(Self {
            tuning,
            rules,
            positive,
        })
    }

    pub fn threshold(&self, c: ModerationCategory) -> f32 {
        self.tuning
            .thresholds
            .get(&c)
            .copied()
            .unwrap_or_else(|| default_threshold(c))
    }

    /// Heuristic score for every category (all eight keys present).
    pub fn score(&self, text: &str) -> CategoryScores {
        let mut keep: BTreeMap<ModerationCategory, f32> =
            ModerationCategory::ALL.iter().map(|c| (*c, 1.0)).collect();

        for (cat, re, w) in &self.rules {
            let hits = re.find_iter(text).count();
            if hits == 0 {
                continue;
            }
            if let Some(k) = keep.get_mut(cat) {
                *k *= (1.0 - w).powi(hits as i32);
            }
        }

        let positive_hits = self.positive.find_iter(text).count() as f32;
        let offset = (positive_hits * self.tuning.positive.offset_per_hit)
            .min(self.tuning.positive.max_offset)
            .max(0.0);
        let boost = if is_shouting(text) {
            self.tuning.shouting_boost.max(0.0)
        } else {
            0.0
        };

        keep.into_iter()
            .map(|(cat, k)| {
                let mut s = 1.0 - k;
                if s > 0.0 && offset > 0.0 && is_interpersonal(cat) {
                    s -= offset;
                }
                if s > 0.0 {
                    s += boost;
                }
                (cat, s.clamp(0.0, 1.0))
            })
            .collect()
    }
}

fn is_interpersonal(c: ModerationCategory) -> bool {
    matches!(
        c,
        ModerationCategory::Harassment | ModerationCategory::Hate | ModerationCategory::Toxic
    )
}

/// At least eight letters and 70% of them uppercase.
pub fn is_shouting(text: &str) -> bool {
    let (letters, upper) = text
        .chars()
        .filter(|c| c.is_alphabetic())
        .fold((0usize, 0usize), |(l, u), c| (l + 1, u + usize::from(c.is_uppercase())));
    letters >= 8 && upper * 10 >= letters * 7
}
