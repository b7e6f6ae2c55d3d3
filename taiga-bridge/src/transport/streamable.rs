//! Streamable-HTTP transport (`/mcp`).
//!
//! - `POST`: one JSON-RPC message or batch per request, answered inline
//! - `GET`: optional server → client event stream for an existing session
//! - `DELETE`: terminate the session
//!
//! Sessions are identified by the `Mcp-Session-Id` header, assigned when a
//! client sends `initialize` without one. Every failure on this mount is a
//! JSON-RPC error object with a `null` id.

use std::convert::Infallible;

use axum::Json;
use axum::extract::State;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::stream;
use tracing::{debug, info};

use taiga_bridge_core::jsonrpc::{JsonRpcResponse, parse_messages};
use taiga_bridge_core::lifecycle::{CloseReason, SessionKind};

use super::sse::KEEP_ALIVE_INTERVAL;
use crate::AppState;
use crate::error::TransportError;

pub const SESSION_HEADER: &str = "mcp-session-id";

const JSON: &str = "application/json";
const EVENT_STREAM: &str = "text/event-stream";

pub async fn post_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_post(&state, &headers, &body)
        .await
        .unwrap_or_else(|e| e.to_jsonrpc_response())
}

async fn handle_post(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, TransportError> {
    if !(accepts(headers, JSON) && accepts(headers, EVENT_STREAM)) {
        return Err(TransportError::NotAcceptable);
    }
    if !content_type_is_json(headers) {
        return Err(TransportError::UnsupportedMediaType);
    }

    let parsed = match parse_messages(body) {
        Ok(parsed) => parsed,
        Err(error) => {
            debug!(error = %error.message, "Rejected unparsable message");
            let reply = JsonRpcResponse::error(None, error);
            return Ok((StatusCode::BAD_REQUEST, Json(reply)).into_response());
        }
    };

    let session_id = match session_header(headers) {
        Some(id) => {
            state
                .sessions
                .touch(id, SessionKind::StreamableHttp)
                .map_err(|e| TransportError::from_session(&e))?;
            id.to_string()
        }
        None if parsed.initialize_request().is_some() => {
            let guard = state
                .sessions
                .open(SessionKind::StreamableHttp)
                .map_err(|e| TransportError::from_session(&e))?;
            guard.detach()
        }
        None => return Err(TransportError::MissingSessionHeader),
    };

    let mut response = match state.dispatcher.dispatch(parsed).await {
        Some(reply) => (StatusCode::OK, Json(reply)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    Ok(response)
}

pub async fn open_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !accepts(&headers, EVENT_STREAM) {
        return TransportError::NotAcceptable.to_jsonrpc_response();
    }
    let Some(session_id) = session_header(&headers) else {
        return TransportError::MissingSessionHeader.to_jsonrpc_response();
    };
    if let Err(e) = state.sessions.touch(session_id, SessionKind::StreamableHttp) {
        return TransportError::from_session(&e).to_jsonrpc_response();
    }
    let outbound = match state.sessions.take_outbound(session_id) {
        Ok(outbound) => outbound,
        Err(e) => return TransportError::from_session(&e).to_jsonrpc_response(),
    };
    let Some(cancel) = state.sessions.cancellation(session_id) else {
        return TransportError::SessionNotFound.to_jsonrpc_response();
    };

    // Dropping the stream hands the receiver back; the session itself stays.
    let messages = stream::unfold((outbound, cancel), |(mut outbound, cancel)| async move {
        let message = tokio::select! {
            _ = cancel.cancelled() => None,
            message = outbound.recv() => message,
        }?;
        let event = Event::default().event("message").data(message.to_string());
        Some((Ok::<_, Infallible>(event), (outbound, cancel)))
    });

    let mut response = Sse::new(messages)
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response();
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

pub async fn terminate(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return TransportError::MissingSessionHeader.to_jsonrpc_response();
    };
    if state
        .sessions
        .touch(session_id, SessionKind::StreamableHttp)
        .is_ok()
        && state.sessions.close(session_id, CloseReason::Terminated)
    {
        info!(session_id = %session_id, "Session terminated by client");
        StatusCode::OK.into_response()
    } else {
        TransportError::SessionNotFound.to_jsonrpc_response()
    }
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Whether the `Accept` header lists `media_type` (parameters ignored).
fn accepts(headers: &HeaderMap, media_type: &str) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|entry| entry.trim().starts_with(media_type))
}

fn content_type_is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().starts_with(JSON))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_accept_requires_listed_type() {
        let both = headers(&[("accept", "application/json, text/event-stream;q=0.9")]);
        assert!(accepts(&both, JSON));
        assert!(accepts(&both, EVENT_STREAM));

        let json_only = headers(&[("accept", "application/json")]);
        assert!(!accepts(&json_only, EVENT_STREAM));

        let split = headers(&[("accept", "application/json"), ("accept", "text/event-stream")]);
        assert!(accepts(&split, EVENT_STREAM));
    }

    #[test]
    fn test_content_type_with_charset() {
        assert!(content_type_is_json(&headers(&[(
            "content-type",
            "application/json; charset=utf-8"
        )])));
        assert!(!content_type_is_json(&headers(&[("content-type", "text/plain")])));
        assert!(!content_type_is_json(&HeaderMap::new()));
    }

    #[test]
    fn test_blank_session_header_is_missing() {
        assert_eq!(session_header(&headers(&[(SESSION_HEADER, "  ")])), None);
        assert_eq!(
            session_header(&headers(&[(SESSION_HEADER, "abc")])),
            Some("abc")
        );
    }
}
