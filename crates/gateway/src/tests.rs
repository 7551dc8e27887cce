//! Router tests against the in-memory stack

use crate::{build_state, create_router, drain_deadline};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use genmedia_arena_common::config::AppConfig;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;
use tracing_subscriber::fmt::MakeWriter;

async fn app() -> Router {
    let state = tokio_test::assert_ok!(build_state(Arc::new(AppConfig::in_memory())).await);
    create_router(state)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_and_ready() {
    let app = app().await;

    let (status, body) = send(&app, Method::GET, "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app, Method::GET, "/v1/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_round_returns_two_public_images() {
    let app = app().await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/arena/round",
        Some(json!({ "prompt": "a tin robot watering plants" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["study"], "live");
    assert_eq!(body["prompt"], "a tin robot watering plants");
    assert_ne!(body["model1"], body["model2"]);

    let images = body["images"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    for image in images {
        assert!(image["uri"].as_str().unwrap().starts_with("gs://arena-local/"));
        assert!(image["url"]
            .as_str()
            .unwrap()
            .starts_with("https://storage.mtls.cloud.google.com/arena-local/"));
    }
}

#[tokio::test]
async fn test_round_without_body_uses_default_study() {
    let app = app().await;

    let (status, body) = send(&app, Method::POST, "/v1/arena/round", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["study"], "live");
    assert_eq!(body["images"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_vote_then_leaderboard_and_history() {
    let app = app().await;

    let vote = json!({
        "prompt": "a tin robot watering plants",
        "model1": "imagen-3.0-generate-002",
        "model2": "gemini2",
        "image1": "gs://arena-local/a.png",
        "image2": "gs://arena-local/b.png",
        "winner": "gemini2"
    });

    let (status, body) = send(&app, Method::POST, "/v1/arena/vote", Some(vote)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ratings"]["gemini2"], 1016.0);
    assert_eq!(body["ratings"]["imagen-3.0-generate-002"], 984.0);

    let (status, body) = send(&app, Method::GET, "/v1/leaderboard?study=live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entries"][0]["model"], "gemini2");
    assert_eq!(body["entries"][0]["rank"], 1);

    let (status, body) = send(&app, Method::GET, "/v1/history?limit=5", None).await;
    assert_eq!(status, StatusCode::OK);
    let votes = body["votes"].as_array().unwrap();
    assert_eq!(votes.len(), 1);
    assert_eq!(
        votes[0]["image1_url"],
        "https://storage.mtls.cloud.google.com/arena-local/a.png"
    );
}

#[tokio::test]
async fn test_vote_for_third_model_is_rejected() {
    let app = app().await;

    let vote = json!({
        "prompt": "a tin robot",
        "model1": "imagen-3.0-generate-002",
        "model2": "gemini2",
        "image1": "gs://arena-local/a.png",
        "image2": "gs://arena-local/b.png",
        "winner": "flux"
    });

    let (status, body) = send(&app, Method::POST, "/v1/arena/vote", Some(vote)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["field"], "winner");
}

#[tokio::test]
async fn test_empty_prompt_fails_validation() {
    let app = app().await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/generate",
        Some(json!({ "prompt": "", "models": ["gemini2"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["field"], "prompt");
}

#[tokio::test]
async fn test_generate_with_unknown_model() {
    let app = app().await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/generate",
        Some(json!({ "prompt": "a cat", "models": ["gemini2", "dall-e"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "UNKNOWN_MODEL");
}

#[tokio::test]
async fn test_generate_with_known_models() {
    let app = app().await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/generate",
        Some(json!({
            "prompt": "a cat",
            "models": ["gemini2", "imagen-3.0-fast-generate-001", "imagegeneration@006"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requested"], 3);
    assert_eq!(body["images"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_unknown_study_is_not_found() {
    let app = app().await;

    let (status, body) = send(&app, Method::GET, "/v1/leaderboard?study=autumn", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "STUDY_NOT_FOUND");
}

#[tokio::test]
async fn test_studies_and_welcome() {
    let app = app().await;

    let (status, body) = send(&app, Method::GET, "/v1/studies", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["studies"][0]["label"], "live");

    let (status, body) = send(&app, Method::GET, "/v1/arena/welcome", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["message"].as_str().unwrap().is_empty());

    let (status, body) = send(&app, Method::GET, "/v1/arena/prompt", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["study"], "live");
}

#[tokio::test]
async fn test_drain_deadline_waits_for_shutdown() {
    let (tx, rx) = tokio::sync::watch::channel(false);
    let idle = tokio::time::timeout(
        Duration::from_millis(50),
        drain_deadline(rx.clone(), Duration::from_millis(1)),
    )
    .await;
    assert!(idle.is_err());

    tx.send(true).unwrap();
    let start = std::time::Instant::now();
    tokio_test::assert_ok!(
        tokio::time::timeout(Duration::from_secs(2), drain_deadline(rx, Duration::from_millis(20))).await
    );
    assert!(start.elapsed() >= Duration::from_millis(20));
}

/// Log sink for asserting on emitted events
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn test_request_span_carries_service_name() {
    let mut config = AppConfig::in_memory();
    config.observability.service_name = "arena-test".to_string();
    let state = tokio_test::assert_ok!(build_state(Arc::new(config)).await);
    let app = create_router(state);

    let logs = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let (status, _) = send(&app, Method::GET, "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(logs.contents().contains("service=arena-test"));
}
