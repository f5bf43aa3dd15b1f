//! HTTP surface tests against a spawned gateway with a mock backend.

mod common;

use common::{TestApp, VIDEO_OFFER};
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn health_check_reports_counters() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["inference_ready"], true);
    assert_eq!(body["backend"], "mock");
    assert_eq!(body["sessions"]["total_sessions"], 0);
    assert_eq!(body["inference"]["total_requests"], 0);
    assert_eq!(body["inference"]["frames_dropped"], 0);
}

#[tokio::test]
async fn readiness_and_root() {
    let app = TestApp::spawn().await;

    let ready = app.client.get(app.url("/ready")).send().await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);

    let root: Value = app
        .client
        .get(app.url("/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root["status"], "running");
}

#[tokio::test]
async fn uploads_are_forbidden() {
    let app = TestApp::spawn().await;

    for path in ["/upload", "/api/upload", "/api/image/upload", "/api/video/upload"] {
        let response = app
            .client
            .post(app.url(path))
            .body("bytes")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{}", path);
    }
}

#[tokio::test]
async fn token_then_offer_returns_answer() {
    let app = TestApp::spawn().await;

    let token: Value = app
        .client
        .post(app.url("/api/token"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(token["token_type"], "bearer");
    let access_token = token["access_token"].as_str().unwrap();

    let response = app
        .client
        .post(app.url("/api/webrtc/offer"))
        .bearer_auth(access_token)
        .json(&json!({"sdp": VIDEO_OFFER, "type": "offer"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let answer: Value = response.json().await.unwrap();
    assert_eq!(answer["type"], "answer");
    assert!(!answer["sdp"].as_str().unwrap().is_empty());

    let claims = app.state.tokens.verify(access_token).unwrap();
    let session = app.state.registry.get(&claims.session_id).unwrap();
    assert!(session.is_active());
}

#[tokio::test]
async fn offer_requires_credentials() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(app.url("/api/webrtc/offer"))
        .json(&json!({"sdp": VIDEO_OFFER, "type": "offer"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .client
        .post(app.url("/api/webrtc/offer"))
        .bearer_auth("not-a-jwt")
        .json(&json!({"sdp": VIDEO_OFFER, "type": "offer"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_offers_are_rejected() {
    let mut config = common::test_config();
    config.auth.require_auth = false;
    let app = TestApp::spawn_with(
        config,
        std::sync::Arc::new(vision_gateway::services::providers::MockVisionProvider::new()),
    )
    .await;

    let wrong_type = app
        .client
        .post(app.url("/api/webrtc/offer"))
        .json(&json!({"sdp": VIDEO_OFFER, "type": "answer"}))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_type.status(), StatusCode::BAD_REQUEST);

    let empty = app
        .client
        .post(app.url("/api/webrtc/offer"))
        .json(&json!({"sdp": "", "type": "offer"}))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let garbage = app
        .client
        .post(app.url("/api/webrtc/offer"))
        .json(&json!({"sdp": "hello", "type": "offer"}))
        .send()
        .await
        .unwrap();
    assert_eq!(garbage.status(), StatusCode::BAD_GATEWAY);

    assert_eq!(app.state.registry.stats().active_sessions, 0);
}

#[tokio::test]
async fn metrics_endpoint_toggles() {
    let app = TestApp::spawn().await;
    let enabled = app.client.get(app.url("/metrics")).send().await.unwrap();
    assert_eq!(enabled.status(), StatusCode::OK);

    let mut config = common::test_config();
    config.enable_metrics = false;
    let disabled_app = TestApp::spawn_with(
        config,
        std::sync::Arc::new(vision_gateway::services::providers::MockVisionProvider::new()),
    )
    .await;
    let disabled = disabled_app
        .client
        .get(disabled_app.url("/metrics"))
        .send()
        .await
        .unwrap();
    assert_eq!(disabled.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn request_id_is_echoed_or_minted() {
    let app = TestApp::spawn().await;

    let supplied = app
        .client
        .get(app.url("/health"))
        .header("x-request-id", "trace-abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(supplied.headers()["x-request-id"], "trace-abc-123");

    let minted = app.client.get(app.url("/health")).send().await.unwrap();
    let id = minted.headers()["x-request-id"].to_str().unwrap();
    assert!(!id.is_empty());
    assert_ne!(id, "trace-abc-123");
}
