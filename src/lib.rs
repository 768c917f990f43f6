// src/lib.rs
// Public library surface for the service binary and integration tests.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod generate;
pub mod history;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod moderation;
pub mod notify;
pub mod scheduler;
pub mod trends;

use std::sync::Arc;

use axum::Router;

pub use crate::config::PipelineConfig;
pub use crate::error::PipelineError;
pub use crate::events::{BusEvent, Event, EventBus, EventKind};
pub use crate::scheduler::Orchestrator;

use crate::api::AppState;
use crate::metrics::Metrics;
use crate::notify::WebhookRelay;

/// Everything the binary needs to serve.
pub struct App {
    pub router: Router,
    pub orchestrator: Orchestrator,
}

/// Build the orchestrator, attach the webhook relay (if configured) and the
/// HTTP router. Timers are not started.
pub async fn app(cfg: &PipelineConfig, metrics: &Metrics) -> anyhow::Result<App> {
    let orchestrator = Orchestrator::from_config(cfg)?;
    let relay = WebhookRelay::from_settings(&cfg.notify)
        .map(|r| Arc::new(r.spawn(orchestrator.bus())));
    if relay.is_none() {
        tracing::info!(target: "notify", "no webhook configured, relay disabled");
    }
    let router = api::router(
        AppState {
            orchestrator: orchestrator.clone(),
            relay,
        },
        metrics,
    );
    Ok(App {
        router,
        orchestrator,
    })
}
