//! One content cycle: Ranking -> Generating -> Moderating -> Publishing.
//!
//! Stage functions only report what they did; the totals, run log and the
//! `cycle_completed` event are written once, after the stages return. A
//! failure or panic in any stage discards the cycle's counters.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use metrics::{counter, histogram};

use super::{Orchestrator, Stage};
use crate::error::PipelineError;
use crate::events::{Event, ModerationDecision};
use crate::history::{lock_or_recover, LogLevel};
use crate::model::{PostRecord, RunOutcome, SchedulerRun, StatsDelta, Trigger};

struct StageOutput {
    outcome: RunOutcome,
    delta: StatsDelta,
    post_id: Option<String>,
}

impl StageOutput {
    fn skipped(outcome: RunOutcome, delta: StatsDelta) -> Self {
        Self {
            outcome,
            delta,
            post_id: None,
        }
    }
}

fn panic_message(p: &(dyn Any + Send)) -> String {
    if let Some(s) = p.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = p.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Orchestrator {
    /// Run a cycle unless one is already in flight.
    pub(crate) async fn try_run_cycle(&self, trigger: Trigger) -> Result<SchedulerRun, PipelineError> {
        let _cycle = self
            .inner
            .cycle_lock
            .try_lock()
            .map_err(|_| PipelineError::CycleInFlight)?;
        Ok(self.run_cycle(trigger).await)
    }

    fn set_stage(&self, stage: Stage) {
        *lock_or_recover(&self.inner.stage) = stage;
    }

    async fn run_cycle(&self, trigger: Trigger) -> SchedulerRun {
        let cycle_id = self.inner.cycle_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let started_at = Utc::now();
        let t0 = Instant::now();
        tracing::info!(target: "scheduler", cycle_id, ?trigger, "cycle started");

        let result = AssertUnwindSafe(self.stages(cycle_id))
            .catch_unwind()
            .await
            .unwrap_or_else(|p| Err(PipelineError::unavailable("cycle", panic_message(p.as_ref()))));

        let run = match result {
            Ok(out) => SchedulerRun {
                cycle_id,
                trigger,
                started_at,
                finished_at: Utc::now(),
                outcome: out.outcome,
                post_id: out.post_id,
                error: None,
                stats_delta: out.delta,
            },
            Err(e) => {
                self.set_stage(Stage::Errored);
                tracing::error!(target: "scheduler", cycle_id, error = %e, kind = e.kind(), "cycle failed");
                self.log(LogLevel::Error, Some(cycle_id), format!("cycle failed: {e}"));
                SchedulerRun {
                    cycle_id,
                    trigger,
                    started_at,
                    finished_at: Utc::now(),
                    outcome: RunOutcome::Error,
                    post_id: None,
                    error: Some(e.to_string()),
                    stats_delta: StatsDelta::default(),
                }
            }
        };

        lock_or_recover(&self.inner.stats).record(&run);
        self.inner.runs.push(run.clone());
        if run.outcome != RunOutcome::Error {
            self.log(
                LogLevel::Info,
                Some(cycle_id),
                format!("cycle finished: {}", outcome_label(run.outcome)),
            );
        }
        self.set_stage(Stage::Idle);

        counter!("cycles_total", "outcome" => outcome_label(run.outcome)).increment(1);
        histogram!("cycle_duration_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        tracing::info!(
            target: "scheduler",
            cycle_id,
            outcome = outcome_label(run.outcome),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "cycle finished"
        );

        self.inner.bus.publish(Event::CycleCompleted(run.clone()));
        run
    }

    async fn stages(&self, cycle_id: u64) -> Result<StageOutput, PipelineError> {
        let inner = &self.inner;
        let cfg = self.config();
        let mut delta = StatsDelta::default();

        // Ranking
        self.set_stage(Stage::Ranking);
        let ranked = inner.trends.ranked().await?;
        delta.trends_detected = ranked.len() as u64;
        let trend = match ranked.iter().find(|c| inner.trends.is_topic_suitable(c)) {
            Some(t) => t.clone(),
            None => {
                let why = PipelineError::NoSuitableTrend {
                    candidates: ranked.len(),
                };
                counter!("trends_no_suitable_total").increment(1);
                self.log(LogLevel::Info, Some(cycle_id), why.to_string());
                return Ok(StageOutput::skipped(RunOutcome::SkippedNoTrends, delta));
            }
        };

        // Generating
        self.set_stage(Stage::Generating);
        let style = inner.generator.style_for_cycle(cycle_id);
        let post = inner.generator.generate(&trend, style).await;
        if post.quality_score < cfg.quality_threshold {
            self.log(
                LogLevel::Info,
                Some(cycle_id),
                format!(
                    "post for \"{}\" scored {:.2}, below threshold {:.2}",
                    trend.topic, post.quality_score, cfg.quality_threshold
                ),
            );
            return Ok(StageOutput::skipped(RunOutcome::SkippedLowQuality, delta));
        }

        // Moderating
        let verdict = if cfg.moderation_enabled {
            self.set_stage(Stage::Moderating);
            let verdict = inner.moderation.evaluate_post(&post).await?;
            delta.moderation_checks = 1;
            inner.bus.publish(Event::ModerationDecision(ModerationDecision {
                post_id: post.id.clone(),
                trend_id: trend.id.clone(),
                verdict: verdict.clone(),
            }));
            if verdict.is_blocked() {
                let blocked = PipelineError::ModerationBlocked {
                    post_id: post.id.clone(),
                    reasons: verdict.reasons.clone(),
                };
                self.log(
                    LogLevel::Warn,
                    Some(cycle_id),
                    format!("{blocked}: {}", verdict.reasons.join("; ")),
                );
                return Ok(StageOutput {
                    outcome: RunOutcome::Blocked,
                    delta,
                    post_id: Some(post.id),
                });
            }
            Some(verdict)
        } else {
            None
        };

        // Publishing
        self.set_stage(Stage::Publishing);
        let post_id = post.id.clone();
        let record = PostRecord { post, verdict };
        inner.posts.push(record.clone());
        delta.posts_generated = 1;
        inner.bus.publish(Event::PostGenerated(record));
        self.log(
            LogLevel::Info,
            Some(cycle_id),
            format!("posted {post_id} for \"{}\" ({})", trend.topic, style.as_str()),
        );

        Ok(StageOutput {
            outcome: RunOutcome::Posted,
            delta,
            post_id: Some(post_id),
        })
    }
}

fn outcome_label(o: RunOutcome) -> &'static str {
    match o {
        RunOutcome::Posted => "posted",
        RunOutcome::Blocked => "blocked",
        RunOutcome::SkippedNoTrends => "skipped-no-trends",
        RunOutcome::SkippedLowQuality => "skipped-low-quality",
        RunOutcome::Error => "error",
    }
}
