//! Generative-text adapter: provider trait + OpenAI, mock and disabled clients.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ai::AiConfig;

/// What a completion is for. Providers may ignore it; the mock keys off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionTask {
    Post,
    Hashtags,
    Variations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionParams {
    pub task: CompletionTask,
    pub system: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String>;
    /// Provider name for logs and metrics.
    fn name(&self) -> &'static str;
    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
}

pub type DynTextGenerator = Arc<dyn TextGenerator>;

/// Factory: build a generator according to config and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns the deterministic mock.
/// * Else if `config.enabled==false`, returns a disabled client (every post
///   falls back to the template).
/// * Else builds the configured provider.
pub fn build_generator(config: &AiConfig) -> Result<DynTextGenerator> {
    if AiConfig::test_mode() {
        return Ok(Arc::new(MockGenerator));
    }
    if !config.enabled {
        return Ok(Arc::new(DisabledGenerator));
    }
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        "mock" => Ok(Arc::new(MockGenerator)),
        other => Err(anyhow!("unsupported text provider `{other}`")),
    }
}

/// OpenAI Chat Completions client.
pub struct OpenAiGenerator {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("trend-content-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(config.timeout())
            .build()
            .context("building openai http client")?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", config.base_url),
            timeout: config.timeout(),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String> {
        if self.api_key.is_empty() {
            bail!("openai api key is empty");
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &params.system,
                },
                Msg {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("openai completion request")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("openai completion returned {status}");
        }
        let body: Resp = resp.json().await.context("decoding openai completion")?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            bail!("openai completion was empty");
        }
        Ok(content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Fails every call; generation falls back to the template.
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    async fn complete(&self, _prompt: &str, _params: &CompletionParams) -> Result<String> {
        bail!("text generation is disabled")
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Deterministic output derived from the prompt, for tests and local runs.
pub struct MockGenerator;

impl MockGenerator {
    fn field<'a>(prompt: &'a str, label: &str) -> &'a str {
        prompt
            .lines()
            .find_map(|l| l.strip_prefix(label))
            .map(str::trim)
            .unwrap_or("")
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String> {
        let out = match params.task {
            CompletionTask::Post => {
                let topic = Self::field(prompt, "Topic:");
                format!(
                    "{topic} is picking up speed today. Here is a quick look at what changed, \
                     who it affects and what to watch next."
                )
            }
            CompletionTask::Hashtags => {
                let kws = Self::field(prompt, "Keywords:");
                let mut tags: Vec<String> = kws
                    .split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(|k| format!("#{k}"))
                    .collect();
                tags.push("#Trending".into());
                tags.join(" ")
            }
            CompletionTask::Variations => {
                let topic = Self::field(prompt, "Topic:");
                format!(
                    "1. Everyone is talking about {topic}. Here is the short version.\n\
                     2. Quick take on {topic}: what it means for you this week.\n\
                     3. {topic}, explained in under a minute."
                )
            }
        };
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Single line, no control characters, at most `max_chars`.
pub fn sanitize_output(input: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_chars));
    let mut prev_space = false;
    let mut count = 0usize;
    for ch in input.chars() {
        let c = if ch.is_whitespace() || ch.is_control() {
            ' '
        } else {
            ch
        };
        if c == ' ' {
            if !prev_space && !out.is_empty() {
                out.push(' ');
                count += 1;
            }
            prev_space = true;
        } else {
            out.push(c);
            count += 1;
            prev_space = false;
        }
        if count >= max_chars {
            break;
        }
    }
    out.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}
