//! Shared setup for the HTTP-level tests.
#![allow(dead_code)]

pub mod fake_taiga;

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use taiga_bridge::{App, AppState, build_app};
use taiga_bridge_core::config::BridgeConfig;
use taiga_bridge_core::idempotency::{IdempotencyCache, IdempotencyConfig};
use taiga_bridge_core::lifecycle::{SessionConfig, SessionManager};
use taiga_bridge_core::ops::TaigaOps;
use taiga_bridge_core::pagination::PagingPolicy;

pub use fake_taiga::FakeTaiga;

pub const API_KEY: &str = "test-proxy-key";
pub const ACCEPT_BOTH: &str = "application/json, text/event-stream";

pub struct TestApp {
    pub app: App,
    pub taiga: Arc<FakeTaiga>,
    pub sessions: Arc<SessionManager>,
}

impl TestApp {
    /// A started app with the proxy key configured.
    pub fn new() -> Self {
        Self::with_config(BridgeConfig {
            action_api_key: Some(API_KEY.to_string()),
            ..BridgeConfig::default()
        })
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        let taiga = Arc::new(FakeTaiga::new());
        let idempotency = Arc::new(IdempotencyCache::new(IdempotencyConfig::from_bridge(
            &config,
        )));
        let sessions = Arc::new(SessionManager::new(SessionConfig::from_bridge(&config)));
        sessions.start().unwrap();

        let ops = TaigaOps::new(
            taiga.clone(),
            idempotency,
            PagingPolicy::from_bridge(&config),
        );
        let app = build_app(AppState::new(ops, sessions.clone(), config));
        Self {
            app,
            taiga,
            sessions,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }
}

/// `GET` with a local `Host` header.
pub fn get(uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("host", "localhost:8000")
}

pub fn post(uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("host", "localhost:8000")
}

pub fn delete(uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header("host", "localhost:8000")
}

/// Authenticated action `GET`.
pub fn action_get(uri: &str) -> Request<Body> {
    get(uri).header("x-api-key", API_KEY).body(Body::empty()).unwrap()
}

/// Authenticated action `POST` with a JSON body.
pub fn action_post(uri: &str, body: Value) -> Request<Body> {
    post(uri)
        .header("x-api-key", API_KEY)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// A `POST /mcp` carrying `body` with the headers the transport requires.
pub fn mcp_post(body: Value, session_id: Option<&str>) -> Request<Body> {
    let mut builder = post("/mcp")
        .header("accept", ACCEPT_BOTH)
        .header("content-type", "application/json");
    if let Some(id) = session_id {
        builder = builder.header("mcp-session-id", id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}

/// Status and JSON body in one go.
pub async fn status_and_json(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    (status, body_json(response).await)
}

/// Run `initialize` over `/mcp` and return the assigned session id.
pub async fn initialize_session(app: &TestApp) -> String {
    let response = app
        .send(mcp_post(
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {"protocolVersion": "2025-06-18", "capabilities": {}, "clientInfo": {"name": "test", "version": "0"}}
            }),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    response
        .headers()
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap()
}
