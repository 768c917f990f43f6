// tests/common/mod.rs
// Deterministic fakes and a small builder shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use trend_content_pipeline::events::EventBus;
use trend_content_pipeline::generate::adapter::{
    CompletionParams, DynTextGenerator, MockGenerator, TextGenerator,
};
use trend_content_pipeline::generate::{ContentGenerator, GenerationSettings};
use trend_content_pipeline::ingest::types::{Popularity, RawCandidate, TrendSource};
use trend_content_pipeline::model::CategoryScores;
use trend_content_pipeline::moderation::adapter::{DynClassifier, ModerationClassifier};
use trend_content_pipeline::moderation::tuning::HotReloadTuning;
use trend_content_pipeline::moderation::{ModerationGate, ModerationSettings};
use trend_content_pipeline::scheduler::{Orchestrator, SchedulerConfig};
use trend_content_pipeline::trends::{TrendEngine, TrendSettings};

/// Returns a fixed list of candidates.
pub struct StaticSource {
    pub name: &'static str,
    pub items: Vec<RawCandidate>,
}

#[async_trait]
impl TrendSource for StaticSource {
    async fn fetch_candidates(&self) -> anyhow::Result<Vec<RawCandidate>> {
        Ok(self.items.clone())
    }
    fn name(&self) -> &str {
        self.name
    }
}

/// `{topic: "AI Breakthrough", trendScore: 95, keywords: [ai, healthcare]}`.
pub fn ai_breakthrough() -> Arc<dyn TrendSource> {
    Arc::new(StaticSource {
        name: "fixture",
        items: vec![RawCandidate::new("fixture", "AI Breakthrough", Popularity::Score(95.0))
            .with_keywords(["ai", "healthcare"])
            .published(Utc::now() - chrono::Duration::hours(2))],
    })
}

/// Mock output after a delay; counts calls.
pub struct SlowGenerator {
    pub delay: Duration,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl TextGenerator for SlowGenerator {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        MockGenerator.complete(prompt, params).await
    }
    fn name(&self) -> &'static str {
        "slow"
    }
}

/// Always errors.
pub struct DownClassifier;

#[async_trait]
impl ModerationClassifier for DownClassifier {
    async fn classify(&self, _text: &str) -> anyhow::Result<CategoryScores> {
        anyhow::bail!("moderation upstream returned 503")
    }
    fn name(&self) -> &'static str {
        "down"
    }
}

/// Returns the same scores for every text.
pub struct FixedClassifier(pub CategoryScores);

#[async_trait]
impl ModerationClassifier for FixedClassifier {
    async fn classify(&self, _text: &str) -> anyhow::Result<CategoryScores> {
        Ok(self.0.clone())
    }
    fn name(&self) -> &'static str {
        "fixed"
    }
}

pub struct Pipeline {
    pub sources: Vec<Arc<dyn TrendSource>>,
    pub generator: DynTextGenerator,
    pub classifier: Option<DynClassifier>,
    pub moderation: ModerationSettings,
    pub scheduler: SchedulerConfig,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            sources: vec![ai_breakthrough()],
            generator: Arc::new(MockGenerator),
            classifier: None,
            moderation: ModerationSettings {
                tuning_path: None,
                ..ModerationSettings::default()
            },
            scheduler: SchedulerConfig {
                quality_threshold: 0.0,
                moderation_enabled: true,
                ..SchedulerConfig::default()
            },
        }
    }
}

impl Pipeline {
    pub fn build(self) -> Orchestrator {
        let trends = Arc::new(TrendEngine::new(
            self.sources,
            TrendSettings::default(),
            self.scheduler.trends_interval(),
        ));
        let generator = Arc::new(ContentGenerator::new(
            self.generator,
            GenerationSettings::default(),
        ));
        let moderation = Arc::new(ModerationGate::new(
            self.classifier,
            HotReloadTuning::new(None).unwrap(),
            &self.moderation,
        ));
        Orchestrator::new(trends, generator, moderation, EventBus::new(), self.scheduler).unwrap()
    }
}
