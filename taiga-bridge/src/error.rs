//! Errors raised by the HTTP transports before a message reaches the
//! dispatcher.
//!
//! The event-stream mount answers with plain text; the streamable-HTTP mount
//! wraps the same message in a JSON-RPC error object with a `null` id.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use taiga_bridge_core::error::jsonrpc::JsonRpcError;
use taiga_bridge_core::jsonrpc::JsonRpcResponse;
use taiga_bridge_core::lifecycle::SessionError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid Host header")]
    InvalidHost,

    #[error("Invalid Origin header")]
    InvalidOrigin,

    #[error("session_id is required")]
    MissingSessionId,

    #[error("Could not find session")]
    UnknownSession,

    #[error("Could not parse message")]
    UnparsableMessage,

    #[error("Not Acceptable: Client must accept both application/json and text/event-stream")]
    NotAcceptable,

    #[error("Unsupported Media Type: Content-Type must be application/json")]
    UnsupportedMediaType,

    #[error("Bad Request: Missing session ID")]
    MissingSessionHeader,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Conflict: Only one SSE stream is allowed per session")]
    StreamAlreadyOpen,

    #[error("Service is shutting down")]
    NotAccepting,
}

impl TransportError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidHost => StatusCode::MISDIRECTED_REQUEST,
            Self::InvalidOrigin => StatusCode::FORBIDDEN,
            Self::MissingSessionId | Self::UnparsableMessage | Self::MissingSessionHeader => {
                StatusCode::BAD_REQUEST
            }
            Self::UnknownSession | Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::StreamAlreadyOpen => StatusCode::CONFLICT,
            Self::NotAccepting => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Plain-text rendering.
    pub fn to_plain_response(&self) -> Response {
        (self.status(), self.to_string()).into_response()
    }

    /// JSON-RPC rendering with a `null` id.
    pub fn to_jsonrpc_response(&self) -> Response {
        let body = JsonRpcResponse::error(None, JsonRpcError::server_error(self.to_string()));
        (self.status(), Json(body)).into_response()
    }

    /// Map a registry failure on the streamable mount.
    pub fn from_session(error: &SessionError) -> Self {
        match error {
            SessionError::NotFound { .. } | SessionError::Closed { .. } => Self::SessionNotFound,
            SessionError::StreamAlreadyOpen { .. } => Self::StreamAlreadyOpen,
            SessionError::NotAccepting | SessionError::AlreadyStarted => Self::NotAccepting,
        }
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        self.to_plain_response()
    }
}
