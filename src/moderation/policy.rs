//! Decision policy: category scores -> action + severity.

use std::collections::BTreeSet;

use crate::model::{CategoryScores, ModerationAction, ModerationCategory, Severity};
use crate::moderation::signals::CompiledTuning;

/// Reputation in `[0, 100]` scales the review band by up to ±50%; 50 is neutral.
pub fn reputation_review_threshold(base_review: f32, reputation: f32) -> f32 {
    let rep = if reputation.is_nan() {
        50.0
    } else {
        reputation.clamp(0.0, 100.0)
    };
    base_review * (1.0 + 0.5 * (rep - 50.0) / 50.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: ModerationAction,
    pub severity: Severity,
    pub flagged: BTreeSet<ModerationCategory>,
    pub reasons: Vec<String>,
    pub max_score: f32,
}

/// Apply the decision bands. `review_threshold` is normally
/// `tuning.bands.review`; reputation-adjusted callers pass their own.
pub fn decide(scores: &CategoryScores, tuning: &CompiledTuning, review_threshold: f32) -> Decision {
    let bands = tuning.tuning.bands;
    let mut flagged = BTreeSet::new();
    let mut reasons = Vec::new();
    let mut max_score = 0.0f32;
    let mut max_cat: Option<ModerationCategory> = None;

    for (cat, score) in scores {
        if *score > max_score {
            max_score = *score;
            max_cat = Some(*cat);
        }
        let threshold = tuning.threshold(*cat);
        if *score >= threshold {
            flagged.insert(*cat);
            reasons.push(format!(
                "{} score {:.2} >= threshold {:.2}",
                cat.as_str(),
                score,
                threshold
            ));
        }
    }

    let top = max_cat.map(|c| c.as_str()).unwrap_or("none");
    let (action, severity) = if max_score >= bands.block {
        reasons.push(format!("{top} at {max_score:.2} reached block band {:.2}", bands.block));
        (ModerationAction::Block, Severity::High)
    } else if max_score >= bands.flag {
        reasons.push(format!("{top} at {max_score:.2} reached flag band {:.2}", bands.flag));
        (ModerationAction::Flag, Severity::Medium)
    } else if max_score >= review_threshold {
        reasons.push(format!(
            "{top} at {max_score:.2} reached review band {review_threshold:.2}"
        ));
        (ModerationAction::Review, Severity::Medium)
    } else if !flagged.is_empty() {
        (ModerationAction::Flag, Severity::Low)
    } else {
        (ModerationAction::Approve, Severity::Low)
    };

    Decision {
        action,
        severity,
        flagged,
        reasons,
        max_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::signals::ModerationTuning;

    fn tuning() -> CompiledTuning {
        CompiledTuning::compile(ModerationTuning::default()).unwrap()
    }

    fn one(cat: ModerationCategory, v: f32) -> CategoryScores {
        ModerationCategory::ALL
            .iter()
            .map(|c| (*c, if *c == cat { v } else { 0.0 }))
            .collect()
    }

    #[test]
    fn block_boundary_is_inclusive() {
        let t = tuning();
        let at = decide(&one(ModerationCategory::Hate, 0.90), &t, 0.7);
        assert_eq!(at.action, ModerationAction::Block);
        assert_eq!(at.severity, Severity::High);

        let below = decide(&one(ModerationCategory::Hate, 0.899999), &t, 0.7);
        assert_ne!(below.action, ModerationAction::Block);
        assert_eq!(below.action, ModerationAction::Flag);
        assert_eq!(below.severity, Severity::Medium);
    }

    #[test]
    fn bands_and_low_flag() {
        let t = tuning();
        assert_eq!(
            decide(&one(ModerationCategory::Violence, 0.75), &t, 0.7).action,
            ModerationAction::Review
        );
        // Spam threshold 0.5 reached, but under every band.
        let low = decide(&one(ModerationCategory::Spam, 0.55), &t, 0.7);
        assert_eq!((low.action, low.severity), (ModerationAction::Flag, Severity::Low));
        assert!(low.flagged.contains(&ModerationCategory::Spam));
        // Present but under its own threshold.
        assert_eq!(
            decide(&one(ModerationCategory::Spam, 0.3), &t, 0.7).action,
            ModerationAction::Approve
        );
    }

    #[test]
    fn reputation_moves_review_band() {
        assert!((reputation_review_threshold(0.7, 50.0) - 0.7).abs() < 1e-6);
        assert!((reputation_review_threshold(0.7, 100.0) - 1.05).abs() < 1e-6);
        assert!((reputation_review_threshold(0.7, 0.0) - 0.35).abs() < 1e-6);
        assert!((reputation_review_threshold(0.7, 250.0) - 1.05).abs() < 1e-6);

        let t = tuning();
        let scores = one(ModerationCategory::Toxic, 0.5);
        assert_eq!(
            decide(&scores, &t, reputation_review_threshold(0.7, 0.0)).action,
            ModerationAction::Review
        );
        assert_eq!(
            decide(&scores, &t, reputation_review_threshold(0.7, 100.0)).action,
            ModerationAction::Approve
        );
    }
}
