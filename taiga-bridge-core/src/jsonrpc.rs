//! JSON-RPC 2.0 message types and parsing for the MCP transports.
//!
//! - Requests have `id`, `method`, and optional `params`
//! - Notifications are requests without `id`
//! - Responses (client replies to server requests) carry `result` or `error`
//! - Batches are arrays of the above
//! - `id` type (string or integer) is preserved in responses

use std::borrow::Cow;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::jsonrpc::JsonRpcError;

const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request ID.
///
/// Never coerce between types: `"id": 1` is answered with `"id": 1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsonRpcId {
    Number(i64),
    String(String),
    /// Explicit `"id": null`, distinct from a missing id.
    Null,
}

impl Serialize for JsonRpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcId::Number(n) => serializer.serialize_i64(*n),
            JsonRpcId::String(s) => serializer.serialize_str(s),
            JsonRpcId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n.as_i64().map(JsonRpcId::Number).ok_or_else(|| {
                serde::de::Error::custom("JSON-RPC ID must be integer, not float")
            }),
            Value::String(s) => Ok(JsonRpcId::String(s)),
            Value::Null => Ok(JsonRpcId::Null),
            _ => Err(serde::de::Error::custom(
                "JSON-RPC ID must be string, integer, or null",
            )),
        }
    }
}

impl JsonRpcId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(JsonRpcId::Number),
            Value::String(s) => Some(JsonRpcId::String(s.clone())),
            Value::Null => Some(JsonRpcId::Null),
            _ => None,
        }
    }
}

/// Distinguishes a missing field from an explicit `null`.
#[derive(Debug, Clone, Default)]
enum MaybeNull<T> {
    #[default]
    Absent,
    Null,
    Present(T),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for MaybeNull<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            Ok(MaybeNull::Null)
        } else {
            T::deserialize(value)
                .map(MaybeNull::Present)
                .map_err(serde::de::Error::custom)
        }
    }
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<JsonRpcId>, D::Error>
where
    D: Deserializer<'de>,
{
    match MaybeNull::deserialize(deserializer)? {
        MaybeNull::Absent => Ok(None),
        MaybeNull::Null => Ok(Some(JsonRpcId::Null)),
        MaybeNull::Present(id) => Ok(Some(id)),
    }
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    jsonrpc: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    id: Option<JsonRpcId>,
    method: Option<String>,
    params: Option<Value>,
    result: Option<Value>,
    error: Option<Value>,
}

/// A request or notification addressed to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcRequest {
    /// `None` for notifications
    pub id: Option<JsonRpcId>,
    pub method: String,
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    #[inline]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// One inbound message after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    /// Has a method; may or may not expect a response.
    Request(JsonRpcRequest),
    /// A client's reply to a server-initiated request.
    Response { id: Option<JsonRpcId> },
}

impl JsonRpcMessage {
    /// Whether the server owes a response for this message.
    pub fn expects_response(&self) -> bool {
        matches!(self, Self::Request(req) if !req.is_notification())
    }
}

/// A batch element; malformed elements keep their id for the error reply.
#[derive(Debug)]
pub enum BatchItem {
    Valid(JsonRpcMessage),
    Invalid {
        id: Option<JsonRpcId>,
        error: JsonRpcError,
    },
}

/// Result of parsing a request body.
#[derive(Debug)]
pub enum ParsedMessages {
    Single(JsonRpcMessage),
    Batch(Vec<BatchItem>),
}

impl ParsedMessages {
    /// Whether any element needs a response (requests or invalid items).
    pub fn expects_response(&self) -> bool {
        match self {
            Self::Single(message) => message.expects_response(),
            Self::Batch(items) => items.iter().any(|item| match item {
                BatchItem::Valid(message) => message.expects_response(),
                BatchItem::Invalid { .. } => true,
            }),
        }
    }

    /// The `initialize` request, if this body is one.
    pub fn initialize_request(&self) -> Option<&JsonRpcRequest> {
        match self {
            Self::Single(JsonRpcMessage::Request(req)) if req.method == "initialize" => Some(req),
            _ => None,
        }
    }
}

/// Parse a request body into one message or a batch.
///
/// Malformed JSON yields a parse error (-32700); well-formed JSON that is not
/// a JSON-RPC message yields an invalid request error (-32600).
pub fn parse_messages(bytes: &[u8]) -> Result<ParsedMessages, JsonRpcError> {
    let first_byte = bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .ok_or_else(|| JsonRpcError::parse_error("empty input"))?;

    match first_byte {
        b'{' => {
            let raw: RawMessage = serde_json::from_slice(bytes).map_err(|e| {
                if e.is_syntax() || e.is_eof() {
                    JsonRpcError::parse_error(e)
                } else {
                    JsonRpcError::invalid_request(e)
                }
            })?;
            Ok(ParsedMessages::Single(classify(raw)?))
        }
        b'[' => {
            let items: Vec<Value> =
                serde_json::from_slice(bytes).map_err(JsonRpcError::parse_error)?;
            if items.is_empty() {
                return Err(JsonRpcError::invalid_request("empty batch"));
            }

            let parsed = items
                .into_iter()
                .map(|item| {
                    let id = item
                        .as_object()
                        .and_then(|obj| obj.get("id"))
                        .and_then(JsonRpcId::from_value);
                    let classified = serde_json::from_value::<RawMessage>(item)
                        .map_err(JsonRpcError::invalid_request)
                        .and_then(classify);
                    match classified {
                        Ok(message) => BatchItem::Valid(message),
                        Err(error) => BatchItem::Invalid { id, error },
                    }
                })
                .collect();
            Ok(ParsedMessages::Batch(parsed))
        }
        _ => match serde_json::from_slice::<Value>(bytes) {
            Err(e) => Err(JsonRpcError::parse_error(e)),
            Ok(_) => Err(JsonRpcError::invalid_request(
                "message must be an object or array",
            )),
        },
    }
}

fn classify(raw: RawMessage) -> Result<JsonRpcMessage, JsonRpcError> {
    match raw.jsonrpc.as_deref() {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            return Err(JsonRpcError::invalid_request(format!(
                "expected jsonrpc \"2.0\", got \"{other}\""
            )));
        }
        None => return Err(JsonRpcError::invalid_request("missing field: jsonrpc")),
    }

    match raw.method {
        Some(method) => Ok(JsonRpcMessage::Request(JsonRpcRequest {
            id: raw.id,
            method,
            params: raw.params,
        })),
        None if raw.result.is_some() || raw.error.is_some() => {
            Ok(JsonRpcMessage::Response { id: raw.id })
        }
        None => Err(JsonRpcError::invalid_request("missing field: method")),
    }
}

/// JSON-RPC 2.0 response.
///
/// `id` always serializes; `None` becomes `"id": null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    pub id: Option<JsonRpcId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<JsonRpcId>, result: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<JsonRpcId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: None,
            error: Some(error),
        }
    }
}
