//! Event-stream transport (`/sse`).
//!
//! `GET /sse` registers a session and streams server → client messages. The
//! first event tells the client where to post: `event: endpoint` with
//! `/sse/messages/?session_id=<id>`. Each `POST` is acknowledged with 202 and
//! its response is pushed on the stream as `event: message`.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use taiga_bridge_core::jsonrpc::parse_messages;
use taiga_bridge_core::lifecycle::SessionKind;

use crate::AppState;
use crate::error::TransportError;

pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Where clients post messages for a session.
pub fn messages_endpoint(session_id: &str) -> String {
    format!("/sse/messages/?session_id={session_id}")
}

pub async fn open_stream(State(state): State<AppState>) -> Result<Response, TransportError> {
    let guard = state
        .sessions
        .open(SessionKind::EventStream)
        .map_err(|e| TransportError::from_session(&e))?;
    let outbound = state
        .sessions
        .take_outbound(guard.id())
        .map_err(|e| TransportError::from_session(&e))?;
    let cancel = guard.cancellation();

    let endpoint = Event::default()
        .event("endpoint")
        .data(messages_endpoint(guard.id()));

    // The guard travels with the stream: dropping the response body on
    // client disconnect closes the session.
    let messages = stream::unfold(
        (outbound, guard, cancel),
        |(mut outbound, guard, cancel)| async move {
            let message = tokio::select! {
                _ = cancel.cancelled() => None,
                message = outbound.recv() => message,
            }?;
            let event = Event::default().event("message").data(message.to_string());
            Some((Ok::<_, Infallible>(event), (outbound, guard, cancel)))
        },
    );

    let events = stream::once(async move { Ok::<_, Infallible>(endpoint) }).chain(messages);
    Ok(Sse::new(events)
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    session_id: Option<String>,
}

pub async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), TransportError> {
    let session_id = query
        .session_id
        .filter(|id| !id.is_empty())
        .ok_or(TransportError::MissingSessionId)?;
    state
        .sessions
        .touch(&session_id, SessionKind::EventStream)
        .map_err(|_| TransportError::UnknownSession)?;

    let parsed = parse_messages(&body).map_err(|e| {
        debug!(session_id = %session_id, error = %e.message, "Unparsable message");
        TransportError::UnparsableMessage
    })?;
    let cancel = state
        .sessions
        .cancellation(&session_id)
        .ok_or(TransportError::UnknownSession)?;

    let dispatcher = state.dispatcher.clone();
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(session_id = %session_id, "Session closed before reply");
            }
            _ = async {
                let Some(reply) = dispatcher.dispatch(parsed).await else {
                    return;
                };
                if let Err(e) = sessions.deliver(&session_id, reply).await {
                    warn!(session_id = %session_id, error = %e, "Reply not delivered");
                }
            } => {}
        }
    });

    Ok((StatusCode::ACCEPTED, "Accepted"))
}
