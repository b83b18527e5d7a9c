use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tank_relay::connection::Outbound;
use tank_relay::{app, AppState, Relay, TransportError};
use tower::ServiceExt;

/// Device socket stand-in that swallows everything.
struct NullOutbound;

#[async_trait]
impl Outbound for NullOutbound {
    async fn send_text(&self, _text: String) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&self) {}
}

async fn get(state: AppState, uri: &str) -> (StatusCode, String) {
    let response = app(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .expect("route response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    (status, String::from_utf8(bytes.to_vec()).expect("utf8 body"))
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tank-relay-{name}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

#[test_timeout::tokio_timeout_test]
async fn health_lists_online_tanks() {
    let relay = Relay::new();
    let state = AppState::new(relay.clone(), PathBuf::from("does-not-exist"));

    let (status, body) = get(state.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).expect("json body");
    assert_eq!(body, json!({"status": "ok", "tanks": []}));

    relay.connect_device("tank_002", Arc::new(NullOutbound)).await;
    relay.connect_device("tank_001", Arc::new(NullOutbound)).await;

    let (_, body) = get(state, "/health").await;
    let body: Value = serde_json::from_str(&body).expect("json body");
    assert_eq!(body, json!({"status": "ok", "tanks": ["tank_001", "tank_002"]}));
}

#[test_timeout::tokio_timeout_test]
async fn index_serves_page_from_page_dir() {
    let dir = scratch_dir("index");
    std::fs::write(dir.join("index.html"), "<h1>tank console</h1>").expect("write index");
    let state = AppState::new(Relay::new(), dir.clone());

    let (status, body) = get(state, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<h1>tank console</h1>");

    let _ = std::fs::remove_dir_all(dir);
}

#[test_timeout::tokio_timeout_test]
async fn index_falls_back_when_page_missing() {
    let dir = scratch_dir("missing");
    let state = AppState::new(Relay::new(), dir.clone());

    let (status, body) = get(state, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Index not found"));

    let _ = std::fs::remove_dir_all(dir);
}

#[test_timeout::tokio_timeout_test]
async fn websocket_routes_require_upgrade() {
    let state = AppState::new(Relay::new(), PathBuf::from("does-not-exist"));
    let (status, _) = get(state.clone(), "/ws/control").await;
    assert!(status.is_client_error());
    let (status, _) = get(state, "/ws/tank/tank1").await;
    assert!(status.is_client_error());
}
