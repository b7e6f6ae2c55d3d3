//! Liveness and readiness endpoints.
//!
//! - `GET /` and `GET /healthz`: plain-text liveness, 200 while the process
//!   is up
//! - `GET /readyz`: JSON readiness, 200 only while the session manager is
//!   accepting sessions

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;

use super::{ManagerState, SessionManager};

/// Body returned by `/` for uptime probes.
pub const LIVENESS_BANNER: &str = "Taiga MCP up";

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub state: String,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
}

pub fn health_router(sessions: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/", get(banner_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readiness_handler))
        .with_state(sessions)
}

async fn banner_handler() -> &'static str {
    LIVENESS_BANNER
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn readiness_handler(State(sessions): State<Arc<SessionManager>>) -> Response {
    let state = sessions.state();
    let (status_code, status) = match state {
        ManagerState::Running => (StatusCode::OK, "ready"),
        ManagerState::Idle | ManagerState::Stopped => {
            (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
        }
    };

    (
        status_code,
        Json(ReadinessResponse {
            status,
            state: state.to_string(),
            version: sessions.version(),
            uptime_seconds: sessions.uptime_seconds(),
            active_sessions: sessions.active_count(),
        }),
    )
        .into_response()
}
