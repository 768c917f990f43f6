// tests/api_http.rs
mod common;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{self, Body};
use http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

use common::{Pipeline, SlowGenerator};
use trend_content_pipeline::api::{router, AppState};
use trend_content_pipeline::metrics::Metrics;
use trend_content_pipeline::Orchestrator;

fn app() -> (Router, Orchestrator) {
    let orch = Pipeline::default().build();
    let state = AppState {
        orchestrator: orch.clone(),
        relay: None,
    };
    (router(state, &Metrics::detached()), orch)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let v = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, v)
}

#[tokio::test]
async fn health_and_status() {
    let (app, _orch) = app();
    let resp = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (code, v) = send(&app, "GET", "/status", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(v["is_running"], false);
    assert_eq!(v["stage"], "idle");
    assert_eq!(v["stats"]["posts_generated"], 0);
}

#[tokio::test]
async fn run_requires_start_and_then_posts() {
    let (app, orch) = app();

    let (code, v) = send(&app, "POST", "/run", None).await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(v["error"], "not_running");

    let (code, v) = send(&app, "POST", "/start", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(v["changed"], true);

    let (code, v) = send(&app, "POST", "/run", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(v["outcome"], "posted");

    let (code, v) = send(&app, "GET", "/posts?limit=5", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(v.as_array().unwrap().len(), 1);
    assert_eq!(v[0]["post"]["trend_topic"], "AI Breakthrough");

    let (_, v) = send(&app, "POST", "/stop", None).await;
    assert_eq!(v["running"], false);
    assert!(!orch.is_running());
}

#[tokio::test(start_paused = true)]
async fn run_conflicts_while_cycle_in_flight() {
    let orch = Pipeline {
        generator: Arc::new(SlowGenerator {
            delay: Duration::from_secs(2),
            calls: Arc::new(AtomicUsize::new(0)),
        }),
        ..Pipeline::default()
    }
    .build();
    let app = router(
        AppState {
            orchestrator: orch.clone(),
            relay: None,
        },
        &Metrics::detached(),
    );
    orch.start().await;

    let first = {
        let o = orch.clone();
        tokio::spawn(async move { o.force_run_now().await })
    };
    while !orch.status().cycle_in_flight {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (code, v) = send(&app, "POST", "/run", None).await;
    assert_eq!(code, StatusCode::CONFLICT);
    assert_eq!(v["error"], "cycle_in_flight");

    assert!(first.await.unwrap().is_ok());
    orch.stop().await;
}

#[tokio::test]
async fn config_validation() {
    let (app, _orch) = app();
    let (code, v) = send(&app, "POST", "/config", Some(json!({"quality_threshold": 2.0}))).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(v["error"], "invalid_config");

    let (code, v) = send(
        &app,
        "POST",
        "/config",
        Some(json!({"content_interval_minutes": 2, "moderation_enabled": false})),
    )
    .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(v["content_interval_minutes"], 2);
    assert_eq!(v["moderation_enabled"], false);

    let (code, _) = send(&app, "POST", "/config", Some(json!({"bogus": 1}))).await;
    assert!(code.is_client_error());
}

#[tokio::test]
async fn moderate_and_trends() {
    let (app, _orch) = app();
    let (code, v) = send(&app, "POST", "/moderate", Some(json!({"text": "I HATE YOU DIE DIE DIE"}))).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(v["action"], "block");

    let (code, v) = send(
        &app,
        "POST",
        "/moderate",
        Some(json!({"text": "What a lovely day", "reputation": 80})),
    )
    .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(v["action"], "approve");
    assert_eq!(v["reputation_adjusted"], true);

    let (code, v) = send(&app, "GET", "/trends", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(v[0]["topic"], "AI Breakthrough");
}

#[tokio::test]
async fn interactions_reach_subscribers() {
    let (app, orch) = app();
    let (_sub, mut rx) = orch
        .bus()
        .subscribe_channel(Some(trend_content_pipeline::EventKind::LiveInteraction), 8);

    let (code, v) = send(
        &app,
        "POST",
        "/interactions",
        Some(json!({"post_id": "p1", "kind": "comment", "actor": "sam"})),
    )
    .await;
    assert_eq!(code, StatusCode::ACCEPTED);
    assert_eq!(v["delivered"], 1);
    assert_eq!(rx.try_recv().unwrap().kind(), trend_content_pipeline::EventKind::LiveInteraction);

    let (code, _) = send(&app, "GET", "/notify/status", None).await;
    assert_eq!(code, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_route_is_mounted() {
    let (app, _orch) = app();
    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
