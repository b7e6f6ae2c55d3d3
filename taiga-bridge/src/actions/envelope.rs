//! JSON envelope for action responses.
//!
//! Success bodies are `{"<key>": value}`; failures are `{"error": "..."}`
//! with the failure class's HTTP status.

use axum::Json;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use tracing::{debug, error};
use uuid::Uuid;

use taiga_bridge_core::BridgeError;

pub type ActionResult = Result<Json<Value>, ActionError>;

/// Failure of an action request, rendered as an `{"error": ...}` envelope.
#[derive(Debug)]
pub enum ActionError {
    /// Failure raised by the operations layer.
    Bridge(BridgeError),
    /// The request itself could not be read (body too large, bad query).
    Rejected { status: StatusCode, message: String },
}

impl From<BridgeError> for ActionError {
    fn from(error: BridgeError) -> Self {
        Self::Bridge(error)
    }
}

impl From<BytesRejection> for ActionError {
    fn from(rejection: BytesRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ActionError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ActionError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Bridge(error) => {
                let status = StatusCode::from_u16(error.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if error.is_incident() {
                    let correlation_id = Uuid::new_v4().simple().to_string();
                    error!(
                        correlation_id = %correlation_id,
                        status = status.as_u16(),
                        error_type = error.error_type_name(),
                        error = ?error,
                        "Action failed"
                    );
                } else {
                    debug!(
                        status = status.as_u16(),
                        error_type = error.error_type_name(),
                        error = %error,
                        "Action rejected"
                    );
                }
                (status, error.to_string())
            }
            Self::Rejected { status, message } => {
                debug!(status = status.as_u16(), error = %message, "Action request unreadable");
                (status, message)
            }
        };

        let mut body = Map::new();
        body.insert("error".to_string(), Value::String(message));
        (status, Json(Value::Object(body))).into_response()
    }
}

/// Wrap `value` under `key`.
pub fn envelope(key: &str, value: Value) -> Json<Value> {
    let mut body = Map::new();
    body.insert(key.to_string(), value);
    Json(Value::Object(body))
}
