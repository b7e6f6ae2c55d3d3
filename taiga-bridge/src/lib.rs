//! Taiga bridge HTTP surfaces.
//!
//! This crate serves the two MCP streaming transports (`/sse` and `/mcp`),
//! the `/actions/*` REST proxy and the liveness endpoints on one listener.
//! All Taiga logic lives in `taiga-bridge-core`.

pub mod actions;
pub mod error;
pub mod mcp;
pub mod transport;

use std::sync::Arc;

use axum::extract::Request;
use tower::Layer;
use tower::util::{MapRequest, MapRequestLayer};

use taiga_bridge_core::config::BridgeConfig;
use taiga_bridge_core::lifecycle::SessionManager;
use taiga_bridge_core::ops::TaigaOps;

use mcp::McpDispatcher;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: McpDispatcher,
    pub sessions: Arc<SessionManager>,
    pub config: Arc<BridgeConfig>,
}

impl AppState {
    pub fn new(ops: TaigaOps, sessions: Arc<SessionManager>, config: BridgeConfig) -> Self {
        Self {
            dispatcher: McpDispatcher::new(ops),
            sessions,
            config: Arc::new(config),
        }
    }

    pub fn ops(&self) -> &TaigaOps {
        self.dispatcher.ops()
    }
}

/// The router behind path normalization.
pub type App = MapRequest<axum::Router, fn(Request) -> Request>;

/// Build the complete service.
///
/// Paths are normalized before routing so `/mcp/`, `//mcp` and `/mcp//`
/// reach the same handler as `/mcp` without a redirect.
pub fn build_app(state: AppState) -> App {
    let normalize: fn(Request) -> Request = transport::normalize_request;
    MapRequestLayer::new(normalize).layer(transport::router(state))
}
