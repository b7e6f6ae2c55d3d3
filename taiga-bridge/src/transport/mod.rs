//! Transport router.
//!
//! One listener serves:
//!
//! - `GET /`, `/healthz`, `/readyz`: liveness and readiness
//! - `GET /sse`, `POST /sse/messages`: event-stream transport
//! - `POST|GET|DELETE /mcp`: streamable-HTTP transport
//! - `/actions/*`: the authenticated action proxy
//!
//! Paths are rewritten by [`normalize_request`] before they reach the
//! router, so slash variants of a mount are served in place.

pub mod guard;
pub mod sse;
pub mod streamable;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::{StatusCode, Uri};
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use taiga_bridge_core::lifecycle::health_router;

use crate::{AppState, actions};

/// Assemble every mount.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;

    let streaming = Router::new()
        .route("/sse", get(sse::open_stream))
        .route("/sse/messages", post(sse::post_message))
        .route(
            "/mcp",
            post(streamable::post_message)
                .get(streamable::open_stream)
                .delete(streamable::terminate),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guard::require_trusted_host,
        ))
        .with_state(state.clone());

    Router::new()
        .merge(health_router(state.sessions.clone()))
        .merge(streaming)
        .nest("/actions", actions::router(state))
        .fallback(|| async { StatusCode::NOT_FOUND })
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

/// Rewrite the request path to its canonical form.
pub fn normalize_request(mut request: Request) -> Request {
    let uri = request.uri();
    let path = uri.path();
    let normalized = normalize_path(path);
    if normalized == path {
        return request;
    }

    let path_and_query = match uri.query() {
        Some(query) => format!("{normalized}?{query}"),
        None => normalized,
    };
    let mut parts = uri.clone().into_parts();
    match path_and_query.parse() {
        Ok(pq) => parts.path_and_query = Some(pq),
        Err(_) => return request,
    }
    if let Ok(rewritten) = Uri::from_parts(parts) {
        *request.uri_mut() = rewritten;
    }
    request
}

/// Collapse repeated slashes and drop a trailing one; blank becomes `/`.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    format!("/{}", segments.join("/"))
}
