use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Operator-tunable scheduler settings (`[scheduler]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub content_interval_minutes: u64,
    pub trends_interval_minutes: u64,
    pub cleanup_interval_minutes: u64,
    pub moderation_enabled: bool,
    /// Posts scoring below this end the cycle as `skipped-low-quality`.
    pub quality_threshold: f32,
    /// Posts older than this are evicted by the cleanup trigger.
    pub retention_minutes: u64,
    pub post_log_capacity: usize,
    pub run_log_capacity: usize,
    pub message_log_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            content_interval_minutes: 5,
            trends_interval_minutes: 15,
            cleanup_interval_minutes: 60,
            moderation_enabled: true,
            quality_threshold: 0.5,
            retention_minutes: 24 * 60,
            post_log_capacity: 200,
            run_log_capacity: 200,
            message_log_capacity: 500,
        }
    }
}

/// Upper bound for every period and the retention window: one year.
pub const MAX_MINUTES: u64 = 365 * 24 * 60;

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}

impl SchedulerConfig {
    pub fn content_interval(&self) -> Duration {
        minutes(self.content_interval_minutes)
    }

    pub fn trends_interval(&self) -> Duration {
        minutes(self.trends_interval_minutes)
    }

    pub fn cleanup_interval(&self) -> Duration {
        minutes(self.cleanup_interval_minutes)
    }

    pub fn retention(&self) -> Duration {
        minutes(self.retention_minutes)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let intervals = [
            ("content_interval_minutes", self.content_interval_minutes),
            ("trends_interval_minutes", self.trends_interval_minutes),
            ("cleanup_interval_minutes", self.cleanup_interval_minutes),
            ("retention_minutes", self.retention_minutes),
        ];
        for (name, v) in intervals {
            if v == 0 || v > MAX_MINUTES {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be within 1..={MAX_MINUTES}, got {v}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(PipelineError::InvalidConfig(format!(
                "quality_threshold must be within [0, 1], got {}",
                self.quality_threshold
            )));
        }
        let caps = [
            ("post_log_capacity", self.post_log_capacity),
            ("run_log_capacity", self.run_log_capacity),
            ("message_log_capacity", self.message_log_capacity),
        ];
        for (name, v) in caps {
            if v == 0 || v > 10_000 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be within 1..=10000"
                )));
            }
        }
        Ok(())
    }

    /// True when any timer period differs.
    pub fn timers_differ(&self, other: &Self) -> bool {
        self.content_interval_minutes != other.content_interval_minutes
            || self.trends_interval_minutes != other.trends_interval_minutes
            || self.cleanup_interval_minutes != other.cleanup_interval_minutes
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdate {
    pub content_interval_minutes: Option<u64>,
    pub trends_interval_minutes: Option<u64>,
    pub cleanup_interval_minutes: Option<u64>,
    pub moderation_enabled: Option<bool>,
    pub quality_threshold: Option<f32>,
    pub retention_minutes: Option<u64>,
    pub post_log_capacity: Option<usize>,
}

impl ConfigUpdate {
    pub fn apply(&self, base: &SchedulerConfig) -> SchedulerConfig {
        let mut c = base.clone();
        if let Some(v) = self.content_interval_minutes {
            c.content_interval_minutes = v;
        }
        if let Some(v) = self.trends_interval_minutes {
            c.trends_interval_minutes = v;
        }
        if let Some(v) = self.cleanup_interval_minutes {
            c.cleanup_interval_minutes = v;
        }
        if let Some(v) = self.moderation_enabled {
            c.moderation_enabled = v;
        }
        if let Some(v) = self.quality_threshold {
            c.quality_threshold = v;
        }
        if let Some(v) = self.retention_minutes {
            c.retention_minutes = v;
        }
        if let Some(v) = self.post_log_capacity {
            c.post_log_capacity = v;
        }
        c
    }
}
