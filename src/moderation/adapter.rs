//! External moderation classifier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ai::AiConfig;
use crate::model::{CategoryScores, ModerationCategory};

#[async_trait]
pub trait ModerationClassifier: Send + Sync {
    /// Scores in `[0, 1]` for whichever categories the provider knows.
    async fn classify(&self, text: &str) -> Result<CategoryScores>;
    fn name(&self) -> &'static str;
    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
}

pub type DynClassifier = Arc<dyn ModerationClassifier>;

/// `None` means heuristics only.
pub fn build_classifier(config: &AiConfig) -> Result<Option<DynClassifier>> {
    if AiConfig::test_mode() {
        return Ok(Some(Arc::new(MockClassifier)));
    }
    if !config.enabled {
        return Ok(None);
    }
    match config.provider.as_str() {
        "openai" => Ok(Some(Arc::new(OpenAiModerator::new(config)?))),
        "mock" => Ok(Some(Arc::new(MockClassifier))),
        _ => Ok(None),
    }
}

/// OpenAI moderation endpoint.
pub struct OpenAiModerator {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    timeout: Duration,
}

impl OpenAiModerator {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("trend-content-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(config.timeout())
            .build()
            .context("building moderation http client")?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.moderation_model.clone(),
            endpoint: format!("{}/moderations", config.base_url),
            timeout: config.timeout(),
        })
    }
}

/// Provider category names -> ours. Sub-categories fold into their parent.
fn map_provider_category(name: &str) -> Option<ModerationCategory> {
    Some(match name {
        "harassment" | "harassment/threatening" => ModerationCategory::Harassment,
        "hate" | "hate/threatening" => ModerationCategory::Hate,
        "violence" | "violence/graphic" => ModerationCategory::Violence,
        "sexual" => ModerationCategory::Sexual,
        "sexual/minors" => ModerationCategory::SexualMinors,
        "self-harm" | "self-harm/intent" | "self-harm/instructions" => ModerationCategory::SelfHarm,
        _ => return None,
    })
}

pub fn fold_provider_scores(raw: &HashMap<String, f32>) -> CategoryScores {
    let mut out = CategoryScores::new();
    for (name, score) in raw {
        if let Some(cat) = map_provider_category(name) {
            let s = score.clamp(0.0, 1.0);
            let e = out.entry(cat).or_insert(0.0);
            if s > *e {
                *e = s;
            }
        }
    }
    out
}

#[async_trait]
impl ModerationClassifier for OpenAiModerator {
    async fn classify(&self, text: &str) -> Result<CategoryScores> {
        if self.api_key.is_empty() {
            bail!("openai api key is empty");
        }

        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            input: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            results: Vec<ResultItem>,
        }
        #[derive(Deserialize)]
        struct ResultItem {
            category_scores: HashMap<String, f32>,
        }

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&Req {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .context("openai moderation request")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("openai moderation returned {status}");
        }
        let body: Resp = resp.json().await.context("decoding openai moderation")?;
        let first = body
            .results
            .into_iter()
            .next()
            .context("openai moderation returned no results")?;
        Ok(fold_provider_scores(&first.category_scores))
    }

    fn name(&self) -> &'static str {
        "openai-moderation"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Reports nothing; verdicts come from heuristics alone.
pub struct MockClassifier;

#[async_trait]
impl ModerationClassifier for MockClassifier {
    async fn classify(&self, _text: &str) -> Result<CategoryScores> {
        Ok(CategoryScores::new())
    }
    fn name(&self) -> &'static str {
        "mock-moderation"
    }
}
