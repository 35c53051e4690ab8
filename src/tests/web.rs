use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::fakes::{FixedTextEncoder, ScriptedSource, StaticLoader};
use super::{orthonormal_corpus, service_with, service_with_loader};
use crate::config::RecommendConfig;
use crate::corpus::FetchError;
use crate::semantic::EncoderRegistry;
use crate::web::{router, SharedState};

fn app_with(source: Arc<ScriptedSource>, registry: EncoderRegistry) -> axum::Router {
    let service = service_with(source, registry, None, RecommendConfig::default());
    router(Arc::new(SharedState::new(
        Arc::new(service),
        Duration::from_secs(1),
    )))
}

fn app() -> axum::Router {
    app_with(
        Arc::new(ScriptedSource::new(vec![Ok(orthonormal_corpus())])),
        EncoderRegistry::with_encoders(
            Some(Arc::new(FixedTextEncoder::new("text", vec![0.0, 1.0, 0.0]))),
            None,
        ),
    )
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_recommend_text() {
    let (status, body) = send(app(), post("/api/recommend", json!({"text": "it compiles"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["random"], false);
    assert_eq!(body["items"][0]["id"], 2);
    assert_eq!(body["items"][0]["category"], "programming");
    assert!(body["items"][0].get("text_embedding").is_none());
}

#[tokio::test]
async fn test_recommend_without_query_is_random() {
    let (status, body) = send(app(), post("/api/recommend", json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["random"], true);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_recommend_nothing_found() {
    let app = app_with(
        Arc::new(ScriptedSource::new(vec![Ok(orthonormal_corpus())])),
        EncoderRegistry::new(),
    );
    let (status, body) = send(app, post("/api/recommend", json!({"text": "compiles"}))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "no matching meme found");
}

#[tokio::test]
async fn test_recommend_bad_inputs() {
    let (status, _) = send(
        app(),
        post("/api/recommend", json!({"text": "x", "image_b64": "%%%"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        app(),
        post("/api/recommend", json!({"text": "x", "weight_text": 2.0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        app(),
        post("/api/recommend", json!({"text": "x", "image_url": "/etc/passwd"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_undecodable_image_is_skipped() {
    let payload = json!({
        "text": "it compiles",
        "image_b64": STANDARD.encode(b"definitely not a png"),
    });
    let (status, body) = send(app(), post("/api/recommend", payload)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"][0]["id"], 2);
}

#[tokio::test]
async fn test_categories() {
    let (status, body) = send(app(), get("/api/categories")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"categories": ["programming", "work"]}));

    let (status, _) = send(app(), get("/api/categories?force=true")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_browse() {
    let (status, body) = send(app(), post("/api/browse", json!({"category": "programming"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 2);

    let (status, _) = send(app(), post("/api/browse", json!({"category": "dogs"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cache_refresh() {
    let (status, body) = send(app(), post("/api/cache/refresh", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"items": 3}));

    let failing = app_with(
        Arc::new(ScriptedSource::new(vec![Err(FetchError::Status(503))])),
        EncoderRegistry::new(),
    );
    let (status, body) = send(failing, post("/api/cache/refresh", json!({}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("503"));
}

#[tokio::test]
async fn test_activate_models() {
    let app = app();

    let (status, body) = send(
        app.clone(),
        post(
            "/api/models/activate",
            json!({"text_model": "multilingual-e5-small", "image_model": "resnet50"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"text_model": "multilingual-e5-small", "image_model": "resnet50"})
    );

    let (status, body) = send(app, get("/api/models")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["image_model"], "resnet50");
}

#[tokio::test]
async fn test_activate_reports_failed_modality() {
    let loader = StaticLoader {
        fail_image: true,
        text_vector: vec![0.0, 1.0, 0.0],
        ..Default::default()
    };
    let service = service_with_loader(
        Arc::new(ScriptedSource::new(vec![Ok(orthonormal_corpus())])),
        EncoderRegistry::new(),
        loader,
        None,
        RecommendConfig::default(),
    );
    let app = router(Arc::new(SharedState::new(
        Arc::new(service),
        Duration::from_secs(1),
    )));

    let (status, body) = send(
        app.clone(),
        post(
            "/api/models/activate",
            json!({"text_model": "multilingual-e5-small", "image_model": "broken-clip"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text_model"], "multilingual-e5-small");
    assert_eq!(body["image_model"], Value::Null);
    assert!(body["image_error"].as_str().unwrap().contains("broken-clip"));
    assert!(body.get("text_error").is_none());

    let (status, body) = send(app, post("/api/recommend", json!({"text": "it compiles"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"][0]["id"], 2);
}
