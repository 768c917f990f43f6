//! HTTP control plane over one [`Orchestrator`].

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::error::PipelineError;
use crate::events::{DeliveryReport, Interaction};
use crate::metrics::Metrics;
use crate::model::{ModerationVerdict, PostRecord, SchedulerRun, TrendCandidate};
use crate::notify::{ConnectionStatus, RelayHandle};
use crate::scheduler::{ConfigUpdate, Orchestrator, SchedulerConfig, SchedulerStatus};

const DEFAULT_POST_LIMIT: usize = 20;
const MAX_POST_LIMIT: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub relay: Option<Arc<RelayHandle>>,
}

pub fn router(state: AppState, metrics: &Metrics) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/posts", get(posts))
        .route("/trends", get(trends))
        .route("/run", post(run_now))
        .route("/config", post(update_config))
        .route("/moderate", post(moderate))
        .route("/interactions", post(interactions))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/notify/status", get(notify_status))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
        .merge(metrics.router())
}

/// `PipelineError` as an HTTP response.
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self.0 {
            PipelineError::CycleInFlight => StatusCode::CONFLICT,
            PipelineError::NotRunning => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            PipelineError::NoSuitableTrend { .. } => StatusCode::NOT_FOUND,
            e if e.is_adapter_failure() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (code, Json(body)).into_response()
    }
}

async fn status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.orchestrator.status())
}

#[derive(Deserialize)]
struct PostsQuery {
    limit: Option<usize>,
}

async fn posts(State(state): State<AppState>, Query(q): Query<PostsQuery>) -> Json<Vec<PostRecord>> {
    let limit = q.limit.unwrap_or(DEFAULT_POST_LIMIT).min(MAX_POST_LIMIT);
    Json(state.orchestrator.get_posts(limit))
}

async fn trends(State(state): State<AppState>) -> Result<Json<Vec<TrendCandidate>>, ApiError> {
    let ranked = state.orchestrator.trends().ranked().await?;
    Ok(Json(ranked.as_ref().clone()))
}

async fn run_now(State(state): State<AppState>) -> Result<Json<SchedulerRun>, ApiError> {
    Ok(Json(state.orchestrator.force_run_now().await?))
}

async fn update_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<SchedulerConfig>, ApiError> {
    Ok(Json(state.orchestrator.update_config(update).await?))
}

#[derive(Deserialize)]
struct ModerateReq {
    text: String,
    #[serde(default)]
    reputation: Option<f32>,
}

async fn moderate(
    State(state): State<AppState>,
    Json(req): Json<ModerateReq>,
) -> Result<Json<ModerationVerdict>, ApiError> {
    let gate = state.orchestrator.moderation();
    let verdict = match req.reputation {
        Some(r) => gate.evaluate_with_reputation(&req.text, r).await?,
        None => gate.evaluate(&req.text).await?,
    };
    Ok(Json(verdict))
}

async fn interactions(
    State(state): State<AppState>,
    Json(i): Json<Interaction>,
) -> (StatusCode, Json<DeliveryReport>) {
    (StatusCode::ACCEPTED, Json(state.orchestrator.record_interaction(i)))
}

#[derive(Serialize)]
struct RunningResp {
    running: bool,
    changed: bool,
}

async fn start(State(state): State<AppState>) -> Json<RunningResp> {
    let changed = state.orchestrator.start().await;
    Json(RunningResp {
        running: true,
        changed,
    })
}

async fn stop(State(state): State<AppState>) -> Json<RunningResp> {
    let changed = state.orchestrator.stop().await;
    Json(RunningResp {
        running: false,
        changed,
    })
}

async fn notify_status(State(state): State<AppState>) -> Result<Json<ConnectionStatus>, StatusCode> {
    state
        .relay
        .as_ref()
        .map(|r| Json(r.connection_status()))
        .ok_or(StatusCode::NOT_FOUND)
}
