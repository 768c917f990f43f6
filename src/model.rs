//! model.rs — records that flow between the ranking engine, the generator,
//! the moderation gate and the scheduler.
//!
//! Everything here is plain data: created once by the owning stage, never
//! mutated afterwards, cloned out to readers.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic category assigned from the keyword table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Technology,
    Health,
    Business,
    Science,
    Environment,
    Finance,
    Sports,
    Entertainment,
    General,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technology => "Technology",
            Self::Health => "Health",
            Self::Business => "Business",
            Self::Science => "Science",
            Self::Environment => "Environment",
            Self::Finance => "Finance",
            Self::Sports => "Sports",
            Self::Entertainment => "Entertainment",
            Self::General => "General",
        }
    }
}

/// A ranked trend candidate. Scores are clamped to `[0, 100]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendCandidate {
    pub id: String,
    pub topic: String,
    pub description: String,
    /// Name of the feed the candidate came from.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// At most five, stop-words and duplicates removed.
    pub keywords: Vec<String>,
    pub category: Category,
    pub trend_score: f32,
    pub engagement_score: f32,
    pub published_at: DateTime<Utc>,
    pub discovered_at: DateTime<Utc>,
}

/// Voice of a generated post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStyle {
    Informative,
    Casual,
    Professional,
    Creative,
}

impl PostStyle {
    pub const ALL: [PostStyle; 4] = [
        PostStyle::Informative,
        PostStyle::Casual,
        PostStyle::Professional,
        PostStyle::Creative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Informative => "informative",
            Self::Casual => "casual",
            Self::Professional => "professional",
            Self::Creative => "creative",
        }
    }

    /// Round-robin pick used when no style is pinned in config.
    pub fn rotate(n: u64) -> Self {
        Self::ALL[(n % Self::ALL.len() as u64) as usize]
    }
}

impl std::str::FromStr for PostStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "informative" => Ok(Self::Informative),
            "casual" => Ok(Self::Casual),
            "professional" => Ok(Self::Professional),
            "creative" => Ok(Self::Creative),
            other => Err(format!("unknown post style `{other}`")),
        }
    }
}

/// Derived hints attached to every post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostInsights {
    /// 0.0–1.0
    pub predicted_engagement: f32,
    pub audience: String,
    pub best_posting_hour_utc: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedPost {
    pub id: String,
    /// Reference only; the ranking engine owns the candidate.
    pub trend_id: String,
    pub trend_topic: String,
    pub content: String,
    pub style: PostStyle,
    /// Unique, at most eight.
    pub hashtags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variations: Vec<String>,
    pub insights: PostInsights,
    pub generation_latency_ms: u64,
    /// 0.0–1.0
    pub quality_score: f32,
    /// True when the templated stub replaced the generative adapter.
    #[serde(default)]
    pub fallback: bool,
    pub created_at: DateTime<Utc>,
}

/// Policy categories scored by the moderation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModerationCategory {
    Harassment,
    Hate,
    Violence,
    Sexual,
    SexualMinors,
    SelfHarm,
    Spam,
    Toxic,
}

impl ModerationCategory {
    pub const ALL: [ModerationCategory; 8] = [
        ModerationCategory::Harassment,
        ModerationCategory::Hate,
        ModerationCategory::Violence,
        ModerationCategory::Sexual,
        ModerationCategory::SexualMinors,
        ModerationCategory::SelfHarm,
        ModerationCategory::Spam,
        ModerationCategory::Toxic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Harassment => "harassment",
            Self::Hate => "hate",
            Self::Violence => "violence",
            Self::Sexual => "sexual",
            Self::SexualMinors => "sexual-minors",
            Self::SelfHarm => "self-harm",
            Self::Spam => "spam",
            Self::Toxic => "toxic",
        }
    }
}

pub type CategoryScores = BTreeMap<ModerationCategory, f32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Approve,
    Flag,
    Review,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Decision record for one piece of content. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    pub category_scores: CategoryScores,
    pub flagged_categories: BTreeSet<ModerationCategory>,
    pub action: ModerationAction,
    pub severity: Severity,
    pub reasons: Vec<String>,
    pub max_score: f32,
    /// The external classifier failed and only local heuristics were used.
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub reputation_adjusted: bool,
}

impl ModerationVerdict {
    pub fn is_blocked(&self) -> bool {
        self.action == ModerationAction::Block
    }
}

/// What kicked a cycle off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Timer,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    Posted,
    Blocked,
    SkippedNoTrends,
    SkippedLowQuality,
    Error,
}

/// Counters a single cycle contributes; applied only when the cycle completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsDelta {
    pub trends_detected: u64,
    pub posts_generated: u64,
    pub moderation_checks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerRun {
    pub cycle_id: u64,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stats_delta: StatsDelta,
}

/// Monotonic running totals owned by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub trends_detected: u64,
    pub posts_generated: u64,
    pub moderation_checks: u64,
    pub cycles_completed: u64,
    pub posts_blocked: u64,
    pub cycle_errors: u64,
}

impl SchedulerStats {
    /// Fold a finished run into the totals.
    pub fn record(&mut self, run: &SchedulerRun) {
        let d = run.stats_delta;
        self.trends_detected = self.trends_detected.saturating_add(d.trends_detected);
        self.posts_generated = self.posts_generated.saturating_add(d.posts_generated);
        self.moderation_checks = self.moderation_checks.saturating_add(d.moderation_checks);
        match run.outcome {
            RunOutcome::Error => self.cycle_errors += 1,
            RunOutcome::Blocked => {
                self.posts_blocked += 1;
                self.cycles_completed += 1;
            }
            _ => self.cycles_completed += 1,
        }
    }
}

/// A published post together with the verdict that let it through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub post: GeneratedPost,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<ModerationVerdict>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(outcome: RunOutcome, delta: StatsDelta) -> SchedulerRun {
        let now = Utc::now();
        SchedulerRun {
            cycle_id: 1,
            trigger: Trigger::Timer,
            started_at: now,
            finished_at: now,
            outcome,
            post_id: None,
            error: None,
            stats_delta: delta,
        }
    }

    #[test]
    fn wire_names_are_stable() {
        assert_eq!(serde_json::to_value(PostStyle::Casual).unwrap(), json!("casual"));
        assert_eq!(
            serde_json::to_value(ModerationCategory::SelfHarm).unwrap(),
            json!("self-harm")
        );
        assert_eq!(
            serde_json::to_value(RunOutcome::SkippedNoTrends).unwrap(),
            json!("skipped-no-trends")
        );
        assert_eq!(serde_json::to_value(ModerationAction::Block).unwrap(), json!("block"));
    }

    #[test]
    fn style_parses_case_insensitively_and_rotates() {
        assert_eq!("Creative".parse::<PostStyle>(), Ok(PostStyle::Creative));
        assert!("loud".parse::<PostStyle>().is_err());
        assert_eq!(PostStyle::rotate(0), PostStyle::Informative);
        assert_eq!(PostStyle::rotate(5), PostStyle::Casual);
    }

    #[test]
    fn stats_fold_outcomes() {
        let mut s = SchedulerStats::default();
        s.record(&run(
            RunOutcome::Posted,
            StatsDelta {
                trends_detected: 3,
                posts_generated: 1,
                moderation_checks: 1,
            },
        ));
        s.record(&run(
            RunOutcome::Blocked,
            StatsDelta {
                trends_detected: 3,
                posts_generated: 0,
                moderation_checks: 1,
            },
        ));
        s.record(&run(RunOutcome::Error, StatsDelta::default()));

        assert_eq!(s.trends_detected, 6);
        assert_eq!(s.posts_generated, 1);
        assert_eq!(s.moderation_checks, 2);
        assert_eq!(s.cycles_completed, 2);
        assert_eq!(s.posts_blocked, 1);
        assert_eq!(s.cycle_errors, 1);
    }
}
