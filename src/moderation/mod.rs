//! # Moderation gate
//!
//! Scores text in eight policy categories from two sources, an optional
//! external classifier (cached per exact text) and local heuristics, and
//! keeps the higher score per category. The decision bands are in
//! [`policy::decide`].
//!
//! A classifier failure degrades to heuristics only (`degraded = true`)
//! unless `fail_closed` is set, in which case the failure is returned.

pub mod adapter;
pub mod policy;
pub mod signals;
pub mod tuning;

use std::path::PathBuf;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::cache::{fingerprint, TtlCache};
use crate::error::{timeboxed, PipelineError};
use crate::model::{CategoryScores, GeneratedPost, ModerationAction, ModerationVerdict};
use crate::moderation::adapter::DynClassifier;
use crate::moderation::tuning::HotReloadTuning;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationSettings {
    /// Return classifier failures instead of degrading.
    pub fail_closed: bool,
    pub tuning_path: Option<PathBuf>,
    pub cache_ttl_secs: u64,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            fail_closed: false,
            tuning_path: Some(PathBuf::from(tuning::DEFAULT_TUNING_PATH)),
            cache_ttl_secs: 60 * 60,
        }
    }
}

pub struct ModerationGate {
    classifier: Option<DynClassifier>,
    tuning: HotReloadTuning,
    fail_closed: bool,
    ttl: Duration,
    cache: TtlCache<CategoryScores>,
}

impl ModerationGate {
    pub fn new(
        classifier: Option<DynClassifier>,
        tuning: HotReloadTuning,
        settings: &ModerationSettings,
    ) -> Self {
        Self {
            classifier,
            tuning,
            fail_closed: settings.fail_closed,
            ttl: Duration::from_secs(settings.cache_ttl_secs.max(1)),
            cache: TtlCache::new("moderation"),
        }
    }

    /// Heuristics only, built-in tuning.
    pub fn heuristic_only() -> anyhow::Result<Self> {
        Ok(Self::new(
            None,
            HotReloadTuning::new(None)?,
            &ModerationSettings::default(),
        ))
    }

    pub fn classifier_name(&self) -> Option<&'static str> {
        self.classifier.as_ref().map(|c| c.name())
    }

    pub fn sweep_cache(&self) -> usize {
        self.cache.sweep()
    }

    pub async fn evaluate(&self, text: &str) -> Result<ModerationVerdict, PipelineError> {
        self.evaluate_inner(text, None).await
    }

    /// Same as [`evaluate`](Self::evaluate); `reputation` (0–100) widens or
    /// narrows the review band by up to 50%.
    pub async fn evaluate_with_reputation(
        &self,
        text: &str,
        reputation: f32,
    ) -> Result<ModerationVerdict, PipelineError> {
        self.evaluate_inner(text, Some(reputation)).await
    }

    /// Content and hashtags are screened together.
    pub async fn evaluate_post(&self, post: &GeneratedPost) -> Result<ModerationVerdict, PipelineError> {
        let text = if post.hashtags.is_empty() {
            post.content.clone()
        } else {
            format!("{}\n{}", post.content, post.hashtags.join(" "))
        };
        let mut verdict = self.evaluate_inner(&text, None).await?;
        verdict.post_id = Some(post.id.clone());
        Ok(verdict)
    }

    async fn evaluate_inner(
        &self,
        text: &str,
        reputation: Option<f32>,
    ) -> Result<ModerationVerdict, PipelineError> {
        let tuning = self.tuning.current();
        let mut scores = tuning.score(text);

        let mut degraded = false;
        if let Some(classifier) = &self.classifier {
            match self.classify_cached(classifier, text).await {
                Ok(external) => {
                    for (cat, s) in external {
                        let e = scores.entry(cat).or_insert(0.0);
                        if s > *e {
                            *e = s;
                        }
                    }
                }
                Err(e) => {
                    counter!("moderation_adapter_failures_total").increment(1);
                    if self.fail_closed {
                        tracing::error!(target: "moderation", error = %e, "classifier failed, failing closed");
                        return Err(e);
                    }
                    tracing::warn!(target: "moderation", error = %e, "classifier failed, heuristics only");
                    degraded = true;
                }
            }
        }

        let review = match reputation {
            Some(rep) => policy::reputation_review_threshold(tuning.tuning.bands.review, rep),
            None => tuning.tuning.bands.review,
        };
        let d = policy::decide(&scores, &tuning, review);

        let action_label = match d.action {
            ModerationAction::Approve => "approve",
            ModerationAction::Flag => "flag",
            ModerationAction::Review => "review",
            ModerationAction::Block => "block",
        };
        counter!("moderation_actions_total", "action" => action_label).increment(1);
        tracing::debug!(
            target: "moderation",
            action = action_label,
            max_score = d.max_score,
            flagged = ?d.flagged,
            degraded,
            "verdict"
        );

        let mut reasons = d.reasons;
        if degraded {
            reasons.push("external classifier unavailable; heuristics only".into());
        }

        Ok(ModerationVerdict {
            post_id: None,
            category_scores: scores,
            flagged_categories: d.flagged,
            action: d.action,
            severity: d.severity,
            reasons,
            max_score: d.max_score,
            degraded,
            reputation_adjusted: reputation.is_some(),
        })
    }

    async fn classify_cached(
        &self,
        classifier: &DynClassifier,
        text: &str,
    ) -> Result<CategoryScores, PipelineError> {
        let key = fingerprint("moderation", &[text]);
        let c = classifier.clone();
        let owned = text.to_string();
        self.cache
            .get_or_compute(&key, self.ttl, move || async move {
                timeboxed(c.name(), c.timeout(), c.classify(&owned)).await
            })
            .await
    }
}
