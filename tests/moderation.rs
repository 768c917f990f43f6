// tests/moderation.rs
mod common;

use std::sync::Arc;

use common::FixedClassifier;
use trend_content_pipeline::model::{CategoryScores, ModerationAction, ModerationCategory, Severity};
use trend_content_pipeline::moderation::adapter::DynClassifier;
use trend_content_pipeline::moderation::tuning::HotReloadTuning;
use trend_content_pipeline::moderation::{ModerationGate, ModerationSettings};

fn gate_with_external(cat: ModerationCategory, score: f32) -> ModerationGate {
    let scores: CategoryScores = [(cat, score)].into_iter().collect();
    let classifier: DynClassifier = Arc::new(FixedClassifier(scores));
    ModerationGate::new(
        Some(classifier),
        HotReloadTuning::new(None).unwrap(),
        &ModerationSettings {
            tuning_path: None,
            ..ModerationSettings::default()
        },
    )
}

#[tokio::test]
async fn exactly_point_nine_blocks() {
    let gate = gate_with_external(ModerationCategory::Hate, 0.90);
    let v = gate.evaluate("a perfectly ordinary sentence").await.unwrap();
    assert_eq!(v.action, ModerationAction::Block);
    assert_eq!(v.severity, Severity::High);
    assert!(v.is_blocked());
}

#[tokio::test]
async fn just_below_point_nine_does_not_block() {
    let gate = gate_with_external(ModerationCategory::Hate, 0.899999);
    let v = gate.evaluate("a perfectly ordinary sentence").await.unwrap();
    assert_ne!(v.action, ModerationAction::Block);
    assert_eq!(v.action, ModerationAction::Flag);
    assert_eq!(v.severity, Severity::Medium);
}

#[tokio::test]
async fn review_band_and_low_flag() {
    let review = gate_with_external(ModerationCategory::Violence, 0.75)
        .evaluate("neutral")
        .await
        .unwrap();
    assert_eq!(review.action, ModerationAction::Review);
    assert_eq!(review.severity, Severity::Medium);

    // Spam threshold (0.5) reached, but below every decision band.
    let low = gate_with_external(ModerationCategory::Spam, 0.55)
        .evaluate("neutral")
        .await
        .unwrap();
    assert_eq!(low.action, ModerationAction::Flag);
    assert_eq!(low.severity, Severity::Low);
    assert!(low.flagged_categories.contains(&ModerationCategory::Spam));

    let clean = gate_with_external(ModerationCategory::Spam, 0.1)
        .evaluate("neutral")
        .await
        .unwrap();
    assert_eq!(clean.action, ModerationAction::Approve);
}

#[tokio::test]
async fn shouted_threat_is_blocked() {
    let gate = ModerationGate::heuristic_only().unwrap();
    let v = gate.evaluate("I HATE YOU DIE DIE DIE").await.unwrap();
    assert_eq!(v.action, ModerationAction::Block);
    assert!(v.flagged_categories.contains(&ModerationCategory::Harassment));
    assert!(v.flagged_categories.contains(&ModerationCategory::Violence));
    assert!(!v.reasons.is_empty());
}

#[tokio::test]
async fn reputation_moves_the_review_band() {
    let gate = gate_with_external(ModerationCategory::Harassment, 0.6);

    let neutral = gate.evaluate("neutral").await.unwrap();
    assert_eq!(neutral.action, ModerationAction::Approve);
    assert!(!neutral.reputation_adjusted);

    // Reputation 0 halves the review band to 0.35.
    let strict = gate.evaluate_with_reputation("neutral", 0.0).await.unwrap();
    assert_eq!(strict.action, ModerationAction::Review);
    assert!(strict.reputation_adjusted);

    // Reputation 100 raises it to 1.05; block still applies at 0.9.
    let lenient = gate_with_external(ModerationCategory::Harassment, 0.95)
        .evaluate_with_reputation("neutral", 100.0)
        .await
        .unwrap();
    assert_eq!(lenient.action, ModerationAction::Block);
}

#[tokio::test]
async fn positive_language_lowers_interpersonal_scores() {
    let gate = ModerationGate::heuristic_only().unwrap();
    let harsh = gate.evaluate("you are an idiot").await.unwrap();
    let softened = gate
        .evaluate("you are an idiot, but thanks, I love the support")
        .await
        .unwrap();
    let h = harsh.category_scores.get(&ModerationCategory::Harassment).copied().unwrap_or(0.0);
    let s = softened.category_scores.get(&ModerationCategory::Harassment).copied().unwrap_or(0.0);
    assert!(h > 0.0);
    assert!(s < h);
}
