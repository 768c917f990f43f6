// tests/scheduler.rs
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use common::{DownClassifier, Pipeline, SlowGenerator};
use trend_content_pipeline::events::{Event, EventKind};
use trend_content_pipeline::generate::adapter::{CompletionParams, TextGenerator};
use trend_content_pipeline::generate::keyword_hashtags;
use trend_content_pipeline::model::{ModerationAction, RunOutcome, Trigger};
use trend_content_pipeline::moderation::ModerationSettings;
use trend_content_pipeline::scheduler::config::MAX_MINUTES;
use trend_content_pipeline::scheduler::{ConfigUpdate, SchedulerConfig, Stage};
use trend_content_pipeline::PipelineError;

#[tokio::test]
async fn one_cycle_posts_the_single_trend() {
    let orch = Pipeline::default().build();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let _sub = orch.bus().subscribe(EventKind::PostGenerated, move |ev| {
        s.lock().push(ev.clone());
        Ok(())
    });

    assert_eq!(orch.stats().posts_generated, 0);
    orch.start().await;
    let run = orch.force_run_now().await.unwrap();
    orch.stop().await;

    assert_eq!(run.outcome, RunOutcome::Posted);
    assert_eq!(run.trigger, Trigger::Manual);

    let posts = orch.get_posts(10);
    assert_eq!(posts.len(), 1);
    let trend = orch.trends().cached().unwrap();
    assert_eq!(posts[0].post.trend_id, trend[0].id);
    assert_eq!(posts[0].post.trend_topic, "AI Breakthrough");
    assert_eq!(run.post_id.as_deref(), Some(posts[0].post.id.as_str()));

    let verdict = posts[0].verdict.as_ref().unwrap();
    assert_eq!(verdict.action, ModerationAction::Approve);
    assert!(verdict.flagged_categories.is_empty());

    let stats = orch.stats();
    assert_eq!(stats.posts_generated, 1);
    assert_eq!(stats.moderation_checks, 1);
    assert_eq!(stats.trends_detected, 1);

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    match &seen[0].event {
        Event::PostGenerated(rec) => assert_eq!(rec.post.id, posts[0].post.id),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn failing_moderation_discards_the_cycle() {
    let orch = Pipeline {
        classifier: Some(Arc::new(DownClassifier)),
        moderation: ModerationSettings {
            fail_closed: true,
            tuning_path: None,
            ..ModerationSettings::default()
        },
        ..Pipeline::default()
    }
    .build();

    let completed = Arc::new(AtomicUsize::new(0));
    let c = completed.clone();
    let _sub = orch.bus().subscribe(EventKind::CycleCompleted, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    orch.start().await;
    let run = orch.force_run_now().await.unwrap();
    orch.stop().await;

    assert_eq!(run.outcome, RunOutcome::Error);
    assert!(run.error.as_deref().unwrap().contains("down"));
    assert_eq!(run.stats_delta, Default::default());

    let stats = orch.stats();
    assert_eq!(stats.posts_generated, 0);
    assert_eq!(stats.moderation_checks, 0);
    assert_eq!(stats.trends_detected, 0);
    assert_eq!(stats.cycle_errors, 1);

    let errors = orch
        .get_runs(10)
        .into_iter()
        .filter(|r| r.outcome == RunOutcome::Error)
        .count();
    assert_eq!(errors, 1);
    assert!(orch.get_posts(10).is_empty());
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(orch.status().stage, Stage::Idle);
}

#[tokio::test]
async fn classifier_outage_degrades_when_fail_open() {
    let orch = Pipeline {
        classifier: Some(Arc::new(DownClassifier)),
        ..Pipeline::default()
    }
    .build();

    orch.start().await;
    let run = orch.force_run_now().await.unwrap();
    orch.stop().await;

    assert_eq!(run.outcome, RunOutcome::Posted);
    let posts = orch.get_posts(1);
    assert!(posts[0].verdict.as_ref().unwrap().degraded);
    assert_eq!(orch.stats().moderation_checks, 1);
}

#[tokio::test(start_paused = true)]
async fn manual_run_during_a_cycle_fails_fast() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orch = Pipeline {
        generator: Arc::new(SlowGenerator {
            delay: Duration::from_secs(2),
            calls: calls.clone(),
        }),
        ..Pipeline::default()
    }
    .build();
    orch.start().await;

    let first = {
        let o = orch.clone();
        tokio::spawn(async move { o.force_run_now().await })
    };
    while !orch.status().cycle_in_flight {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(orch.force_run_now().await.unwrap_err(), PipelineError::CycleInFlight);

    let run = first.await.unwrap().unwrap();
    assert_eq!(run.outcome, RunOutcome::Posted);
    assert_eq!(orch.get_runs(10).len(), 1);
    assert_eq!(run.cycle_id, 1);
    orch.stop().await;
}

/// Answers every prompt with a two-letter reply.
struct Terse;

#[async_trait::async_trait]
impl TextGenerator for Terse {
    async fn complete(&self, _prompt: &str, _params: &CompletionParams) -> anyhow::Result<String> {
        Ok("ok".into())
    }
    fn name(&self) -> &'static str {
        "terse"
    }
}

#[tokio::test]
async fn low_quality_post_is_skipped() {
    let orch = Pipeline {
        generator: Arc::new(Terse),
        scheduler: SchedulerConfig {
            quality_threshold: 0.9,
            ..SchedulerConfig::default()
        },
        ..Pipeline::default()
    }
    .build();

    orch.start().await;
    let run = orch.force_run_now().await.unwrap();
    orch.stop().await;

    assert_eq!(run.outcome, RunOutcome::SkippedLowQuality);
    assert!(orch.get_posts(10).is_empty());
    let stats = orch.stats();
    assert_eq!(stats.posts_generated, 0);
    assert_eq!(stats.trends_detected, 1);
    assert_eq!(stats.cycles_completed, 1);
}

#[tokio::test]
async fn moderation_disabled_posts_without_verdict() {
    let orch = Pipeline {
        scheduler: SchedulerConfig {
            quality_threshold: 0.0,
            moderation_enabled: false,
            ..SchedulerConfig::default()
        },
        ..Pipeline::default()
    }
    .build();

    orch.start().await;
    orch.force_run_now().await.unwrap();
    orch.stop().await;

    let posts = orch.get_posts(10);
    assert_eq!(posts.len(), 1);
    assert!(posts[0].verdict.is_none());
    assert_eq!(orch.stats().moderation_checks, 0);
}

#[tokio::test]
async fn denylisted_topics_skip_the_cycle() {
    use trend_content_pipeline::ingest::types::{Popularity, RawCandidate};
    let orch = Pipeline {
        sources: vec![Arc::new(common::StaticSource {
            name: "news",
            items: vec![RawCandidate::new("news", "Train crash closes line", Popularity::Upvotes(900))],
        })],
        ..Pipeline::default()
    }
    .build();

    orch.start().await;
    let run = orch.force_run_now().await.unwrap();
    orch.stop().await;

    assert_eq!(run.outcome, RunOutcome::SkippedNoTrends);
    assert_eq!(orch.stats().trends_detected, 1);
    assert!(orch
        .status()
        .recent_logs
        .iter()
        .any(|l| l.message.contains("no suitable trend")));
}

#[tokio::test]
async fn cleanup_evicts_posts_past_retention() {
    let orch = Pipeline::default().build();
    orch.start().await;
    orch.force_run_now().await.unwrap();
    std::thread::sleep(Duration::from_millis(5));
    orch.force_run_now().await.unwrap();

    orch.update_config(ConfigUpdate {
        retention_minutes: Some(1),
        ..Default::default()
    })
    .await
    .unwrap();
    orch.stop().await;

    let posts = orch.get_posts(10);
    assert_eq!(posts.len(), 2);
    let (fresh, stale) = (posts[0].post.clone(), posts[1].post.clone());
    assert!(stale.created_at < fresh.created_at);

    // Both still inside the window.
    assert_eq!(orch.cleanup().0, 0);

    // Cutoff lands exactly on the newer post: only the older one goes.
    let (evicted, _) = orch.cleanup_at(fresh.created_at + chrono::Duration::minutes(1));
    assert_eq!(evicted, 1);
    let left = orch.get_posts(10);
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].post.id, fresh.id);
}

#[tokio::test]
async fn retention_is_bounded_and_cleanup_never_overflows() {
    let orch = Pipeline::default().build();
    let err = orch
        .update_config(ConfigUpdate {
            retention_minutes: Some(1_000_000_000_000),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidConfig(_)));

    orch.update_config(ConfigUpdate {
        retention_minutes: Some(MAX_MINUTES),
        ..Default::default()
    })
    .await
    .unwrap();

    orch.start().await;
    orch.force_run_now().await.unwrap();
    orch.stop().await;

    // A window reaching before the earliest representable instant keeps everything.
    let early = chrono::DateTime::<chrono::Utc>::MIN_UTC + chrono::Duration::days(1);
    assert_eq!(orch.cleanup_at(early).0, 0);
    assert_eq!(orch.cleanup().0, 0);
    assert_eq!(orch.get_posts(10).len(), 1);
}

/// Every completion fails.
struct Broken;

#[async_trait::async_trait]
impl TextGenerator for Broken {
    async fn complete(&self, _prompt: &str, _params: &CompletionParams) -> anyhow::Result<String> {
        anyhow::bail!("upstream 500")
    }
    fn name(&self) -> &'static str {
        "broken"
    }
}

fn assert_stub_post(orch: &trend_content_pipeline::Orchestrator, run: &trend_content_pipeline::model::SchedulerRun) {
    assert_eq!(run.outcome, RunOutcome::Posted);
    let posts = orch.get_posts(10);
    assert_eq!(posts.len(), 1);
    let post = &posts[0].post;
    assert!(post.fallback);
    assert!(post.content.contains("AI Breakthrough"));
    let trend = orch.trends().cached().unwrap()[0].clone();
    assert_eq!(post.hashtags, keyword_hashtags(&trend));
    assert!(post.hashtags.iter().any(|t| t.eq_ignore_ascii_case("#ai")));
    assert!(post.variations.is_empty());
    assert_eq!(orch.stats().posts_generated, 1);
}

#[tokio::test]
async fn failing_generator_posts_templated_stub() {
    let orch = Pipeline {
        generator: Arc::new(Broken),
        ..Pipeline::default()
    }
    .build();

    orch.start().await;
    let run = orch.force_run_now().await.unwrap();
    orch.stop().await;

    assert_stub_post(&orch, &run);
}

#[tokio::test(start_paused = true)]
async fn generator_timeout_posts_templated_stub() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orch = Pipeline {
        generator: Arc::new(SlowGenerator {
            delay: Duration::from_secs(3600),
            calls: calls.clone(),
        }),
        ..Pipeline::default()
    }
    .build();

    orch.start().await;
    let run = orch.force_run_now().await.unwrap();
    orch.stop().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_stub_post(&orch, &run);
}
