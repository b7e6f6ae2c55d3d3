//! Error handling for the Taiga bridge.
//!
//! Every failure raised by the resource operations, the resolution engine,
//! the concurrency guard or the idempotency cache is a [`BridgeError`]. The
//! action gateway renders it as `{"error": "..."}` with
//! [`BridgeError::status_code`]; the MCP surface renders it either as a tool
//! result with `isError: true` or, for protocol failures, via
//! [`BridgeError::to_jsonrpc_error`].
//!
//! ## Module Organization
//!
//! - `jsonrpc` - JSON-RPC 2.0 error objects
//! - `BridgeError` - the failure taxonomy shared by both surfaces

pub mod jsonrpc;

use jsonrpc::{ErrorData, JsonRpcError};
use thiserror::Error;

use crate::upstream::UpstreamError;

/// Result alias used across the operations layer.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// All failure classes the bridge can report.
///
/// The `Display` text is the client-facing message; it never contains
/// credentials or raw upstream bodies beyond the validation detail Taiga
/// returned for a rejected payload.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    /// The caller's credential is missing or wrong.
    #[error("{reason}")]
    AuthenticationFailure {
        /// Client-facing reason
        reason: String,
    },

    /// The bridge itself lacks required configuration (e.g. no proxy key).
    #[error("{reason}")]
    ServiceMisconfigured {
        /// Client-facing reason
        reason: String,
    },

    /// Malformed or missing input, or a payload the upstream rejected.
    #[error("{details}")]
    ValidationFailure {
        /// What was wrong with the input
        details: String,
    },

    /// A referenced record or status could not be found.
    #[error("{details}")]
    ReferenceNotFound {
        /// What could not be found
        details: String,
    },

    /// A status token matched more than one status in the project.
    #[error("Status '{token}' is ambiguous in project {project_id}; matching ids: {}", join_ids(.candidates))]
    AmbiguousReference {
        /// The token supplied by the caller
        token: String,
        /// Project the lookup was scoped to
        project_id: u64,
        /// Ids of every matching status
        candidates: Vec<u64>,
    },

    /// The update was based on a stale version stamp.
    #[error("{details}")]
    VersionConflict {
        /// Conflict description, including the versions involved
        details: String,
    },

    /// A create with the same idempotency key is still running.
    #[error("A request with idempotency key '{key}' is still in progress")]
    IdempotencyInFlight {
        /// The idempotency key supplied by the caller
        key: String,
    },

    /// The upstream service failed, denied the service account, or timed out.
    #[error("{details}")]
    UpstreamFailure {
        /// Sanitized upstream failure description
        details: String,
    },

    /// Anything unexpected.
    #[error("Internal server error")]
    InternalFailure {
        /// Server-side detail, logged but never returned
        details: String,
    },
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl BridgeError {
    /// Shorthand for a validation failure.
    pub fn validation(details: impl Into<String>) -> Self {
        Self::ValidationFailure {
            details: details.into(),
        }
    }

    /// Shorthand for a missing reference.
    pub fn not_found(details: impl Into<String>) -> Self {
        Self::ReferenceNotFound {
            details: details.into(),
        }
    }

    /// Shorthand for an upstream failure.
    pub fn upstream(details: impl Into<String>) -> Self {
        Self::UpstreamFailure {
            details: details.into(),
        }
    }

    /// Shorthand for an internal failure.
    pub fn internal(details: impl Into<String>) -> Self {
        Self::InternalFailure {
            details: details.into(),
        }
    }

    /// HTTP status code for the action envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::AuthenticationFailure { .. } => 401,
            Self::ServiceMisconfigured { .. } => 503,
            Self::ValidationFailure { .. } => 400,
            Self::ReferenceNotFound { .. } => 404,
            Self::AmbiguousReference { .. } => 409,
            Self::VersionConflict { .. } => 409,
            Self::IdempotencyInFlight { .. } => 409,
            Self::UpstreamFailure { .. } => 502,
            Self::InternalFailure { .. } => 500,
        }
    }

    /// Whether this failure should be logged as a server-side incident.
    ///
    /// Client-caused failures (4xx) are expected traffic.
    pub fn is_incident(&self) -> bool {
        self.status_code() >= 500
    }

    /// Map to a JSON-RPC error code.
    ///
    /// Standard codes are used where they apply; bridge-specific failures use
    /// the implementation-defined server error range.
    pub fn to_jsonrpc_code(&self) -> i32 {
        match self {
            Self::ValidationFailure { .. } => -32602,
            Self::InternalFailure { .. } => -32603,
            Self::AuthenticationFailure { .. } => -32001,
            Self::UpstreamFailure { .. } => -32002,
            Self::ServiceMisconfigured { .. } => -32003,
            Self::ReferenceNotFound { .. } => -32004,
            Self::AmbiguousReference { .. } => -32005,
            Self::VersionConflict { .. } => -32006,
            Self::IdempotencyInFlight { .. } => -32007,
        }
    }

    /// Stable snake_case name for logs.
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::AuthenticationFailure { .. } => "authentication_failure",
            Self::ServiceMisconfigured { .. } => "service_misconfigured",
            Self::ValidationFailure { .. } => "validation_failure",
            Self::ReferenceNotFound { .. } => "reference_not_found",
            Self::AmbiguousReference { .. } => "ambiguous_reference",
            Self::VersionConflict { .. } => "version_conflict",
            Self::IdempotencyInFlight { .. } => "idempotency_in_flight",
            Self::UpstreamFailure { .. } => "upstream_failure",
            Self::InternalFailure { .. } => "internal_failure",
        }
    }

    /// Convert to a JSON-RPC error object.
    pub fn to_jsonrpc_error(&self, correlation_id: &str) -> JsonRpcError {
        JsonRpcError {
            code: self.to_jsonrpc_code(),
            message: self.to_string(),
            data: Some(ErrorData {
                correlation_id: correlation_id.to_string(),
                error_type: self.error_type_name().to_string(),
                details: None,
            }),
        }
    }
}

/// Classify upstream client failures into the bridge taxonomy.
///
/// | Upstream | Bridge |
/// |----------|--------|
/// | 404 | `ReferenceNotFound` |
/// | 409 / 412 | `VersionConflict` |
/// | other 4xx | `ValidationFailure` (upstream detail kept) |
/// | 401 / 403, 5xx, timeout, connect, decode | `UpstreamFailure` |
/// | client misconfiguration | `InternalFailure` |
impl From<UpstreamError> for BridgeError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::NotFound { path } => Self::ReferenceNotFound {
                details: format!("Taiga resource not found: {path}"),
            },
            UpstreamError::Conflict { path } => Self::VersionConflict {
                details: format!("Taiga rejected a stale write to {path}"),
            },
            UpstreamError::Rejected { status, message } => Self::ValidationFailure {
                details: format!("Taiga rejected the request ({status}): {message}"),
            },
            UpstreamError::Config { details } => Self::InternalFailure { details },
            other => Self::UpstreamFailure {
                details: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            BridgeError::AuthenticationFailure {
                reason: "Missing X-Api-Key header".into()
            }
            .status_code(),
            401
        );
        assert_eq!(
            BridgeError::ServiceMisconfigured {
                reason: "x".into()
            }
            .status_code(),
            503
        );
        assert_eq!(BridgeError::validation("x").status_code(), 400);
        assert_eq!(BridgeError::not_found("x").status_code(), 404);
        assert_eq!(
            BridgeError::VersionConflict {
                details: "x".into()
            }
            .status_code(),
            409
        );
        assert_eq!(
            BridgeError::IdempotencyInFlight { key: "k".into() }.status_code(),
            409
        );
        assert_eq!(BridgeError::upstream("x").status_code(), 502);
        assert_eq!(BridgeError::internal("x").status_code(), 500);
    }

    #[test]
    fn test_ambiguous_message_lists_candidates() {
        let err = BridgeError::AmbiguousReference {
            token: "Done".into(),
            project_id: 3,
            candidates: vec![10, 12],
        };
        assert_eq!(
            err.to_string(),
            "Status 'Done' is ambiguous in project 3; matching ids: 10, 12"
        );
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn test_internal_failure_hides_details() {
        let err = BridgeError::internal("database exploded at 0xdeadbeef");
        assert_eq!(err.to_string(), "Internal server error");
        assert!(err.is_incident());
    }

    #[test]
    fn test_only_server_errors_are_incidents() {
        assert!(!BridgeError::validation("x").is_incident());
        assert!(!BridgeError::not_found("x").is_incident());
        assert!(BridgeError::upstream("x").is_incident());
    }

    #[test]
    fn test_upstream_classification() {
        let not_found: BridgeError = UpstreamError::NotFound {
            path: "userstories/5".into(),
        }
        .into();
        assert_eq!(not_found.status_code(), 404);

        let conflict: BridgeError = UpstreamError::Conflict {
            path: "userstories/5".into(),
        }
        .into();
        assert_eq!(conflict.status_code(), 409);

        let rejected: BridgeError = UpstreamError::Rejected {
            status: 400,
            message: "subject: required".into(),
        }
        .into();
        assert_eq!(rejected.status_code(), 400);
        assert!(rejected.to_string().contains("subject: required"));

        let denied: BridgeError = UpstreamError::Denied { status: 403 }.into();
        assert_eq!(denied.status_code(), 502);

        let timeout: BridgeError = UpstreamError::Timeout { timeout_secs: 30 }.into();
        assert_eq!(timeout.status_code(), 502);
    }

    #[test]
    fn test_jsonrpc_error_carries_type_name() {
        let err = BridgeError::validation("project_id must be an integer");
        let rpc = err.to_jsonrpc_error("abc");
        assert_eq!(rpc.code, -32602);
        assert_eq!(rpc.message, "project_id must be an integer");
        let data = rpc.data.expect("data present");
        assert_eq!(data.error_type, "validation_failure");
        assert_eq!(data.correlation_id, "abc");
    }
}
