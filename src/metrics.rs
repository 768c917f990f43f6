use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the process-wide Prometheus recorder. Only one per process.
    pub fn install() -> anyhow::Result<Self> {
        // Default buckets; histograms render as summaries.
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_pipeline_metrics();
        gauge!("pipeline_build_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
        Ok(Self { handle })
    }

    /// Recorder that is not installed globally; renders an empty exposition.
    /// For tests and embedders that own their own recorder.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe_pipeline_metrics() {
    describe_counter!("cycles_total", "Content cycles by outcome.");
    describe_counter!("cycles_skipped_total", "Timer ticks skipped because a cycle was in flight.");
    describe_histogram!("cycle_duration_ms", "Wall time of one content cycle.");
    describe_counter!("cache_hits_total", "Cache hits by cache name.");
    describe_counter!("cache_misses_total", "Cache misses that started a computation.");
    describe_counter!(
        "cache_singleflight_joins_total",
        "Callers that joined an in-flight computation."
    );
    describe_counter!("generate_fallback_total", "Posts built from the templated stub.");
    describe_counter!("moderation_actions_total", "Moderation verdicts by action.");
    describe_counter!(
        "moderation_adapter_failures_total",
        "Moderation classifier calls that failed or timed out."
    );
    describe_counter!("trends_no_suitable_total", "Selections with no eligible trend.");
    describe_counter!("bus_events_published_total", "Events published on the bus.");
    describe_counter!("bus_events_dropped_total", "Events dropped on full subscriber channels.");
    describe_counter!("bus_handler_errors_total", "Subscriber handlers that failed or panicked.");
    describe_counter!("notify_sent_total", "Webhook notifications delivered.");
    describe_counter!("notify_failed_total", "Webhook notifications that exhausted retries.");
    describe_counter!("interactions_total", "Live interactions relayed.");
    describe_gauge!("pipeline_build_info", "Build metadata.");
}
