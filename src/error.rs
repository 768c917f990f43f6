//! Error taxonomy shared by every stage of the pipeline.
//!
//! Adapters (trend sources, generative text, moderation) return `anyhow::Result`
//! like any other provider; the boundary into the pipeline goes through
//! [`timeboxed`], which turns timeouts and failures into typed variants the
//! scheduler can react to.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("adapter `{adapter}` timed out after {timeout_ms} ms")]
    AdapterTimeout { adapter: String, timeout_ms: u64 },

    #[error("adapter `{adapter}` unavailable: {reason}")]
    AdapterUnavailable { adapter: String, reason: String },

    #[error("no suitable trend among {candidates} ranked candidates")]
    NoSuitableTrend { candidates: usize },

    /// Normal terminal outcome of a cycle, never surfaced as a failure.
    #[error("post {post_id} blocked by moderation")]
    ModerationBlocked {
        post_id: String,
        reasons: Vec<String>,
    },

    #[error("cache computation for `{key}` failed: {reason}")]
    CacheComputeFailed { key: String, reason: String },

    #[error("scheduler is not running")]
    NotRunning,

    #[error("a content cycle is already in flight")]
    CycleInFlight,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    pub fn unavailable(adapter: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::AdapterUnavailable {
            adapter: adapter.into(),
            reason: reason.to_string(),
        }
    }

    /// Adapter-level failures are recovered locally with fallbacks.
    pub fn is_adapter_failure(&self) -> bool {
        matches!(
            self,
            Self::AdapterTimeout { .. }
                | Self::AdapterUnavailable { .. }
                | Self::CacheComputeFailed { .. }
        )
    }

    /// Short, stable label for metrics and run logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AdapterTimeout { .. } => "adapter_timeout",
            Self::AdapterUnavailable { .. } => "adapter_unavailable",
            Self::NoSuitableTrend { .. } => "no_suitable_trend",
            Self::ModerationBlocked { .. } => "moderation_blocked",
            Self::CacheComputeFailed { .. } => "cache_compute_failed",
            Self::NotRunning => "not_running",
            Self::CycleInFlight => "cycle_in_flight",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

/// Run one adapter call under a hard timeout.
pub async fn timeboxed<T, F>(adapter: &str, timeout: Duration, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(PipelineError::unavailable(adapter, format!("{e:#}"))),
        Err(_) => Err(PipelineError::AdapterTimeout {
            adapter: adapter.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timeboxed_maps_elapsed_to_timeout() {
        let out: Result<(), _> = timeboxed("slow", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(
            out,
            Err(PipelineError::AdapterTimeout {
                adapter: "slow".into(),
                timeout_ms: 50
            })
        );
    }

    #[tokio::test]
    async fn timeboxed_maps_failure_to_unavailable() {
        let out: Result<u8, _> = timeboxed("broken", Duration::from_secs(1), async {
            Err(anyhow::anyhow!("401 unauthorized"))
        })
        .await;
        let err = out.unwrap_err();
        assert!(err.is_adapter_failure());
        assert_eq!(err.kind(), "adapter_unavailable");
        assert!(err.to_string().contains("401"));
    }
}
