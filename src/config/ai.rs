// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::env;

fn default_provider() -> String {
    "openai".into()
}
fn default_api_key() -> String {
    "ENV".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_moderation_model() -> String {
    "omni-moderation-latest".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_timeout_secs() -> u64 {
    10
}

/// Generative and moderation adapter settings (`[ai]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    /// "openai" | "mock" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// "ENV" means: read from OPENAI_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_moderation_model")]
    pub moderation_model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-call timebox for both adapters.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            api_key: default_api_key(),
            model: default_model(),
            moderation_model: default_moderation_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AiConfig {
    /// Normalize provider and resolve the "ENV" key placeholder.
    pub fn resolve(mut self) -> anyhow::Result<Self> {
        self.provider = self.provider.trim().to_lowercase();
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }

        if self.enabled && self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = match self.provider.as_str() {
                "openai" => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                "mock" => String::new(),
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }
        Ok(self)
    }

    /// `AI_TEST_MODE=mock` forces deterministic adapters regardless of config.
    pub fn test_mode() -> bool {
        env::var("AI_TEST_MODE").map(|v| v == "mock").unwrap_or(false)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}
