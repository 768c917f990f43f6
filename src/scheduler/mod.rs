//! # Orchestrator
//!
//! Owns the pipeline stages, the run statistics and the rolling logs, and
//! drives them from three independent timers:
//!
//! - content: one Ranking -> Generating -> Moderating -> Publishing cycle
//! - trends: refresh the ranked list and announce it on the bus
//! - cleanup: evict posts past the retention window and sweep caches
//!
//! Cycles never overlap. A timer that fires while a cycle is running skips
//! its tick; [`Orchestrator::force_run_now`] fails fast with
//! [`PipelineError::CycleInFlight`]. Stats change only when a cycle
//! completes, so a failed cycle leaves them untouched.

pub mod config;
mod cycle;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::events::{DeliveryReport, Event, EventBus, Interaction, TrendSummary, TrendsUpdated};
use crate::generate::adapter::build_generator;
use crate::generate::ContentGenerator;
use crate::history::{lock_or_recover, BoundedLog, LogEntry, LogLevel};
use crate::model::{PostRecord, SchedulerRun, SchedulerStats, Trigger};
use crate::ingest::config::build_sources;
use crate::moderation::adapter::build_classifier;
use crate::moderation::tuning::HotReloadTuning;
use crate::moderation::ModerationGate;
use crate::trends::TrendEngine;

pub use self::config::{ConfigUpdate, SchedulerConfig};

/// Where the current cycle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Idle,
    Ranking,
    Generating,
    Moderating,
    Publishing,
    Errored,
}

/// Read-only snapshot for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub stage: Stage,
    pub cycle_in_flight: bool,
    pub stats: SchedulerStats,
    pub recent_logs: Vec<LogEntry>,
    pub recent_runs: Vec<SchedulerRun>,
    pub config: SchedulerConfig,
    pub started_at: Option<DateTime<Utc>>,
    pub last_trend_refresh: Option<DateTime<Utc>>,
    pub posts_stored: usize,
    pub sources: usize,
    pub generator: &'static str,
    pub classifier: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Content,
    Trends,
    Cleanup,
}

impl TimerKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Trends => "trends",
            Self::Cleanup => "cleanup",
        }
    }
}

struct Timers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

pub(crate) struct Inner {
    pub(crate) trends: Arc<TrendEngine>,
    pub(crate) generator: Arc<ContentGenerator>,
    pub(crate) moderation: Arc<ModerationGate>,
    pub(crate) bus: EventBus,
    pub(crate) config: RwLock<SchedulerConfig>,
    running: AtomicBool,
    timers: tokio::sync::Mutex<Option<Timers>>,
    pub(crate) cycle_lock: tokio::sync::Mutex<()>,
    pub(crate) stage: Mutex<Stage>,
    pub(crate) cycle_seq: AtomicU64,
    pub(crate) stats: Mutex<SchedulerStats>,
    pub(crate) runs: BoundedLog<SchedulerRun>,
    pub(crate) posts: BoundedLog<PostRecord>,
    pub(crate) logs: BoundedLog<LogEntry>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    last_trend_refresh: Mutex<Option<DateTime<Utc>>>,
}

/// Cheap to clone; clones drive the same pipeline.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        trends: Arc<TrendEngine>,
        generator: Arc<ContentGenerator>,
        moderation: Arc<ModerationGate>,
        bus: EventBus,
        config: SchedulerConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        trends.set_refresh_ttl(config.trends_interval());
        Ok(Self {
            inner: Arc::new(Inner {
                trends,
                generator,
                moderation,
                bus,
                runs: BoundedLog::with_capacity(config.run_log_capacity),
                posts: BoundedLog::with_capacity(config.post_log_capacity),
                logs: BoundedLog::with_capacity(config.message_log_capacity),
                config: RwLock::new(config),
                running: AtomicBool::new(false),
                timers: tokio::sync::Mutex::new(None),
                cycle_lock: tokio::sync::Mutex::new(()),
                stage: Mutex::new(Stage::Idle),
                cycle_seq: AtomicU64::new(0),
                stats: Mutex::new(SchedulerStats::default()),
                started_at: Mutex::new(None),
                last_trend_refresh: Mutex::new(None),
            }),
        })
    }

    /// Wire sources, adapters and the gate from loaded configuration.
    pub fn from_config(cfg: &PipelineConfig) -> anyhow::Result<Self> {
        let sources = build_sources(&cfg.sources)?;
        let trends = Arc::new(TrendEngine::new(
            sources,
            cfg.trends.clone(),
            cfg.scheduler.trends_interval(),
        ));
        let generator = Arc::new(ContentGenerator::new(
            build_generator(&cfg.ai)?,
            cfg.generation.clone(),
        ));
        let tuning = HotReloadTuning::new(cfg.moderation.tuning_path.as_deref())?;
        let moderation = Arc::new(ModerationGate::new(
            build_classifier(&cfg.ai)?,
            tuning,
            &cfg.moderation,
        ));
        tracing::info!(
            target: "scheduler",
            sources = trends.source_count(),
            generator = generator.adapter_name(),
            classifier = moderation.classifier_name().unwrap_or("none"),
            "pipeline wired"
        );
        Ok(Self::new(
            trends,
            generator,
            moderation,
            EventBus::new(),
            cfg.scheduler.clone(),
        )?)
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn trends(&self) -> &TrendEngine {
        &self.inner.trends
    }

    pub fn moderation(&self) -> &ModerationGate {
        &self.inner.moderation
    }

    pub fn config(&self) -> SchedulerConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start the three timers. Returns `false` if already running.
    pub async fn start(&self) -> bool {
        let mut timers = self.inner.timers.lock().await;
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        *timers = Some(self.spawn_timers());
        *lock_or_recover(&self.inner.started_at) = Some(Utc::now());
        self.log(LogLevel::Info, None, "scheduler started");
        tracing::info!(target: "scheduler", "scheduler started");
        true
    }

    /// Cancel pending timers and wait for them to exit. A cycle already in
    /// progress runs to completion first. Idempotent.
    pub async fn stop(&self) -> bool {
        let mut timers = self.inner.timers.lock().await;
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Some(t) = timers.take() {
            shutdown_timers(t).await;
        }
        self.log(LogLevel::Info, None, "scheduler stopped");
        tracing::info!(target: "scheduler", "scheduler stopped");
        true
    }

    fn spawn_timers(&self) -> Timers {
        let cfg = self.config();
        let (tx, rx) = watch::channel(false);
        let plan = [
            (TimerKind::Trends, cfg.trends_interval(), true),
            (TimerKind::Content, cfg.content_interval(), false),
            (TimerKind::Cleanup, cfg.cleanup_interval(), false),
        ];
        let handles = plan
            .into_iter()
            .map(|(kind, period, immediate)| {
                tokio::spawn(timer_loop(
                    Arc::downgrade(&self.inner),
                    kind,
                    period,
                    immediate,
                    rx.clone(),
                ))
            })
            .collect();
        Timers {
            shutdown: tx,
            handles,
        }
    }

    /// Manual out-of-band cycle.
    pub async fn force_run_now(&self) -> Result<SchedulerRun, PipelineError> {
        if !self.is_running() {
            return Err(PipelineError::NotRunning);
        }
        self.try_run_cycle(Trigger::Manual).await
    }

    /// Refresh the ranked list and announce it. Not a cycle; stats untouched.
    pub async fn refresh_trends(&self) -> Result<usize, PipelineError> {
        match self.inner.trends.refresh().await {
            Ok(ranked) => {
                *lock_or_recover(&self.inner.last_trend_refresh) = Some(Utc::now());
                let count = ranked.len();
                self.inner.bus.publish(Event::TrendsUpdated(TrendsUpdated {
                    count,
                    top: ranked.iter().take(5).map(TrendSummary::from).collect(),
                }));
                self.log(LogLevel::Info, None, format!("trends refreshed: {count} ranked"));
                Ok(count)
            }
            Err(e) => {
                tracing::warn!(target: "scheduler", error = %e, "trend refresh failed");
                self.log(LogLevel::Warn, None, format!("trend refresh failed: {e}"));
                Err(e)
            }
        }
    }

    /// Evict posts past retention and expired cache entries.
    pub fn cleanup(&self) -> (usize, usize) {
        self.cleanup_at(Utc::now())
    }

    /// [`cleanup`](Self::cleanup) with an explicit notion of "now". A
    /// retention window reaching before the representable range keeps every
    /// post.
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> (usize, usize) {
        let retention = self.config().retention();
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|r| now.checked_sub_signed(r));
        let evicted = match cutoff {
            Some(cutoff) => self.inner.posts.retain(|r| r.post.created_at >= cutoff),
            None => 0,
        };
        let swept = self.inner.trends.cache().sweep()
            + self.inner.generator.sweep_caches()
            + self.inner.moderation.sweep_cache();
        if evicted > 0 || swept > 0 {
            self.log(
                LogLevel::Info,
                None,
                format!("cleanup: {evicted} posts evicted, {swept} cache entries swept"),
            );
        }
        tracing::debug!(target: "scheduler", evicted, swept, "cleanup done");
        (evicted, swept)
    }

    pub fn status(&self) -> SchedulerStatus {
        let inner = &self.inner;
        SchedulerStatus {
            is_running: self.is_running(),
            stage: *lock_or_recover(&inner.stage),
            cycle_in_flight: inner.cycle_lock.try_lock().is_err(),
            stats: *lock_or_recover(&inner.stats),
            recent_logs: inner.logs.newest_first(20),
            recent_runs: inner.runs.newest_first(10),
            config: self.config(),
            started_at: *lock_or_recover(&inner.started_at),
            last_trend_refresh: *lock_or_recover(&inner.last_trend_refresh),
            posts_stored: inner.posts.len(),
            sources: inner.trends.source_count(),
            generator: inner.generator.adapter_name(),
            classifier: inner.moderation.classifier_name(),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        *lock_or_recover(&self.inner.stats)
    }

    /// Newest first.
    pub fn get_posts(&self, limit: usize) -> Vec<PostRecord> {
        self.inner.posts.newest_first(limit)
    }

    /// Newest first.
    pub fn get_runs(&self, limit: usize) -> Vec<SchedulerRun> {
        self.inner.runs.newest_first(limit)
    }

    /// Validate and apply; timers restart when a period changed.
    pub async fn update_config(&self, update: ConfigUpdate) -> Result<SchedulerConfig, PipelineError> {
        let mut timers = self.inner.timers.lock().await;
        let current = self.config();
        let next = update.apply(&current);
        next.validate()?;

        *self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next.clone();
        self.inner.posts.set_capacity(next.post_log_capacity);
        self.inner.trends.set_refresh_ttl(next.trends_interval());

        if next.timers_differ(&current) && self.is_running() {
            if let Some(t) = timers.take() {
                shutdown_timers(t).await;
            }
            *timers = Some(self.spawn_timers());
        }
        self.log(LogLevel::Info, None, "configuration updated");
        tracing::info!(target: "scheduler", config = ?next, "configuration updated");
        Ok(next)
    }

    /// Relay engagement on a post to live subscribers.
    pub fn record_interaction(&self, interaction: Interaction) -> DeliveryReport {
        counter!("interactions_total").increment(1);
        self.inner.bus.publish(Event::LiveInteraction(interaction))
    }

    pub(crate) fn log(&self, level: LogLevel, cycle_id: Option<u64>, message: impl Into<String>) {
        self.inner.logs.push(LogEntry::new(level, cycle_id, message));
    }

    async fn on_tick(&self, kind: TimerKind) {
        match kind {
            TimerKind::Content => match self.try_run_cycle(Trigger::Timer).await {
                Ok(_) => {}
                Err(PipelineError::CycleInFlight) => {
                    counter!("cycles_skipped_total").increment(1);
                    tracing::debug!(target: "scheduler", "content tick skipped, cycle in flight");
                }
                Err(e) => tracing::warn!(target: "scheduler", error = %e, "content tick failed"),
            },
            TimerKind::Trends => {
                let _ = self.refresh_trends().await;
            }
            TimerKind::Cleanup => {
                self.cleanup();
            }
        }
    }
}

async fn shutdown_timers(t: Timers) {
    let _ = t.shutdown.send(true);
    for h in t.handles {
        if let Err(e) = h.await {
            tracing::error!(target: "scheduler", error = %e, "timer task ended abnormally");
        }
    }
}

async fn timer_loop(
    inner: Weak<Inner>,
    kind: TimerKind,
    period: Duration,
    immediate: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut iv = tokio::time::interval(period);
    iv.set_missed_tick_behavior(MissedTickBehavior::Skip);
    if !immediate {
        // First tick completes at once; wait a full period instead.
        iv.tick().await;
    }
    tracing::debug!(target: "scheduler", timer = kind.as_str(), period_s = period.as_secs(), "timer armed");

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = iv.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                Orchestrator { inner }.on_tick(kind).await;
            }
        }
    }
    tracing::debug!(target: "scheduler", timer = kind.as_str(), "timer stopped");
}
