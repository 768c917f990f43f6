//! Trend content pipeline: binary entrypoint.
//! Loads configuration, wires the orchestrator, starts its timers and serves
//! the control plane over Axum.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trend_content_pipeline::metrics::Metrics;
use trend_content_pipeline::{app, PipelineConfig};

/// `RUST_LOG` filter (default `info`); `PIPELINE_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("PIPELINE_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    // Shuttle may already have installed a subscriber.
    if let Err(e) = res {
        eprintln!("tracing init skipped: {e}");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PipelineConfig::load()?;
    let metrics = Metrics::install()?;
    let app = app(&cfg, &metrics).await?;
    app.orchestrator.start().await;

    Ok(app.router.into())
}
