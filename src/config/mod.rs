// src/config/mod.rs
pub mod ai;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::ai::AiConfig;
use crate::generate::GenerationSettings;
use crate::ingest::config::SourceConfig;
use crate::moderation::ModerationSettings;
use crate::notify::NotifySettings;
use crate::scheduler::SchedulerConfig;
use crate::trends::TrendSettings;

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

/// Whole-service configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub scheduler: SchedulerConfig,
    pub trends: TrendSettings,
    pub generation: GenerationSettings,
    pub moderation: ModerationSettings,
    pub ai: AiConfig,
    pub notify: NotifySettings,
    pub sources: Vec<SourceConfig>,
}

impl PipelineConfig {
    /// `PIPELINE_CONFIG_PATH`, else `config/pipeline.toml`, else defaults.
    /// Env overrides apply in every case.
    pub fn load() -> Result<Self> {
        let explicit = env::var("PIPELINE_CONFIG_PATH").ok().map(PathBuf::from);
        let cfg = match explicit {
            Some(p) => Self::load_from_file(&p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load_from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => {
                tracing::info!("no pipeline config file, using defaults");
                Self::default()
            }
        };
        cfg.finish()
    }

    /// TOML, or JSON when the extension is `.json`. No env overrides.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let cfg: Self = if is_json {
            serde_json::from_str(&data)
                .with_context(|| format!("parsing JSON config {}", path.display()))?
        } else {
            toml::from_str(&data).with_context(|| format!("parsing TOML config {}", path.display()))?
        };
        tracing::info!(
            path = %path.display(),
            sources = cfg.sources.len(),
            "pipeline config loaded"
        );
        Ok(cfg)
    }

    fn finish(mut self) -> Result<Self> {
        self.apply_env_overrides()?;
        self.ai = self.ai.resolve()?;
        self.scheduler.validate()?;
        for s in &self.sources {
            s.validate()?;
        }
        Ok(self)
    }

    /// `PIPELINE_CONTENT_INTERVAL_MINUTES`, `PIPELINE_QUALITY_THRESHOLD`,
    /// `PIPELINE_MODERATION_ENABLED`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_var("PIPELINE_CONTENT_INTERVAL_MINUTES") {
            self.scheduler.content_interval_minutes = v
                .parse()
                .with_context(|| format!("PIPELINE_CONTENT_INTERVAL_MINUTES={v}"))?;
        }
        if let Some(v) = env_var("PIPELINE_QUALITY_THRESHOLD") {
            self.scheduler.quality_threshold = v
                .parse()
                .with_context(|| format!("PIPELINE_QUALITY_THRESHOLD={v}"))?;
        }
        if let Some(v) = env_var("PIPELINE_MODERATION_ENABLED") {
            self.scheduler.moderation_enabled = parse_bool(&v)
                .with_context(|| format!("PIPELINE_MODERATION_ENABLED={v}"))?;
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_bool(s: &str) -> Result<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("not a boolean: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::config::SourceKind;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for k in [
            "PIPELINE_CONFIG_PATH",
            "PIPELINE_CONTENT_INTERVAL_MINUTES",
            "PIPELINE_QUALITY_THRESHOLD",
            "PIPELINE_MODERATION_ENABLED",
            "AI_TEST_MODE",
        ] {
            env::remove_var(k);
        }
    }

    #[test]
    fn toml_sections_are_optional() {
        let cfg: PipelineConfig = toml::from_str(
            r#"
            [scheduler]
            content_interval_minutes = 2

            [[sources]]
            name = "tech"
            kind = "rss"
            url = "https://example.com/feed.xml"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.scheduler.content_interval_minutes, 2);
        assert_eq!(cfg.scheduler.trends_interval_minutes, 15);
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].kind, SourceKind::Rss);
        assert!(!cfg.ai.enabled);
    }

    #[test]
    #[serial]
    fn json_file_and_env_overrides() {
        clear_env();
        let mut f = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            f,
            r#"{{"scheduler": {{"quality_threshold": 0.3, "moderation_enabled": true}}}}"#
        )
        .unwrap();

        env::set_var("PIPELINE_CONFIG_PATH", f.path());
        env::set_var("PIPELINE_QUALITY_THRESHOLD", "0.0");
        env::set_var("PIPELINE_MODERATION_ENABLED", "off");
        let cfg = PipelineConfig::load().unwrap();
        clear_env();

        assert_eq!(cfg.scheduler.quality_threshold, 0.0);
        assert!(!cfg.scheduler.moderation_enabled);
    }

    #[test]
    #[serial]
    fn invalid_override_is_rejected() {
        clear_env();
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(f, "[scheduler]\ncontent_interval_minutes = 5").unwrap();
        env::set_var("PIPELINE_CONFIG_PATH", f.path());

        env::set_var("PIPELINE_CONTENT_INTERVAL_MINUTES", "0");
        assert!(PipelineConfig::load().is_err());

        env::set_var("PIPELINE_CONTENT_INTERVAL_MINUTES", "soon");
        assert!(PipelineConfig::load().is_err());
        clear_env();
    }
}
