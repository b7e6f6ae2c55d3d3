//! JSON-RPC 2.0 error objects.

use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 error object embedded in error responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (standard or bridge-specific)
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

/// Additional error context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ErrorData {
    /// Identifier for finding this error in logs
    pub correlation_id: String,

    /// Machine-readable error type name
    pub error_type: String,

    /// Type-specific details (sanitized)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl JsonRpcError {
    fn standard(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// -32700: the payload was not valid JSON.
    pub fn parse_error(details: impl std::fmt::Display) -> Self {
        Self::standard(-32700, format!("Parse error: {details}"))
    }

    /// -32600: valid JSON but not a JSON-RPC request.
    pub fn invalid_request(details: impl std::fmt::Display) -> Self {
        Self::standard(-32600, format!("Invalid request: {details}"))
    }

    /// -32601: unknown method.
    pub fn method_not_found(method: &str) -> Self {
        Self::standard(-32601, format!("Method not found: {method}"))
    }

    /// -32602: bad parameters for a known method.
    pub fn invalid_params(details: impl std::fmt::Display) -> Self {
        Self::standard(-32602, format!("Invalid params: {details}"))
    }

    /// Transport-level rejection rendered in JSON-RPC framing.
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::standard(-32000, message)
    }
}
