//! MCP method dispatch shared by both streaming transports.
//!
//! Transports parse the wire bytes into [`ParsedMessages`] and hand them to
//! [`McpDispatcher::dispatch`]; what comes back is the JSON to send to the
//! client (a single response or a batch array), or `None` when the input
//! held only notifications and responses.

pub mod tools;

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde_json::{Value, json};
use tracing::{debug, error, info};
use uuid::Uuid;

use taiga_bridge_core::error::jsonrpc::JsonRpcError;
use taiga_bridge_core::jsonrpc::{
    BatchItem, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, ParsedMessages,
};
use taiga_bridge_core::ops::TaigaOps;
use taiga_bridge_core::params::Params;

use tools::ToolSpec;

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "Taiga MCP";

/// Protocol revisions this server speaks, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

const MAX_BATCH_CONCURRENCY: usize = 16;

/// Routes JSON-RPC requests to MCP method handlers.
#[derive(Clone)]
pub struct McpDispatcher {
    ops: TaigaOps,
    tools: Arc<Vec<ToolSpec>>,
}

impl McpDispatcher {
    pub fn new(ops: TaigaOps) -> Self {
        Self {
            ops,
            tools: Arc::new(tools::catalog()),
        }
    }

    pub fn ops(&self) -> &TaigaOps {
        &self.ops
    }

    /// Handle one parsed body.
    pub async fn dispatch(&self, parsed: ParsedMessages) -> Option<Value> {
        match parsed {
            ParsedMessages::Single(message) => {
                let response = self.handle_message(message).await?;
                Some(to_json(&response))
            }
            ParsedMessages::Batch(items) => {
                let concurrency = items.len().clamp(1, MAX_BATCH_CONCURRENCY);
                let responses: Vec<Value> = stream::iter(items)
                    .map(|item| async move {
                        match item {
                            BatchItem::Valid(message) => self.handle_message(message).await,
                            BatchItem::Invalid { id, error } => {
                                Some(JsonRpcResponse::error(id, error))
                            }
                        }
                    })
                    .buffered(concurrency)
                    .filter_map(|response| async move { response.as_ref().map(to_json) })
                    .collect()
                    .await;

                if responses.is_empty() {
                    None
                } else {
                    Some(Value::Array(responses))
                }
            }
        }
    }

    /// Handle one message; responses sent by the client are ignored.
    pub async fn handle_message(&self, message: JsonRpcMessage) -> Option<JsonRpcResponse> {
        let JsonRpcMessage::Request(request) = message else {
            return None;
        };
        let result = self.route(&request).await;

        if request.is_notification() {
            if let Err(e) = result {
                debug!(method = %request.method, error = %e.message, "Notification failed");
            }
            return None;
        }

        Some(match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    async fn route(&self, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        match request.method.as_str() {
            "initialize" => Ok(initialize_result(request.params.as_ref())),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.tools.as_slice() })),
            "tools/call" => self.call_tool(request.params.as_ref()).await,
            method if method.starts_with("notifications/") => Ok(Value::Null),
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    async fn call_tool(&self, params: Option<&Value>) -> Result<Value, JsonRpcError> {
        let name = params
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("tools/call requires a tool name"))?;
        let arguments = params.and_then(|p| p.get("arguments")).cloned();

        let arguments = Params::from_arguments(arguments).map_err(|e| {
            let correlation_id = Uuid::new_v4().simple().to_string();
            debug!(
                tool = %name,
                correlation_id = %correlation_id,
                error = %e,
                "Malformed tool arguments"
            );
            e.to_jsonrpc_error(&correlation_id)
        })?;
        let outcome = tools::invoke(&self.ops, name, &arguments)
            .await
            .ok_or_else(|| JsonRpcError::invalid_params(format!("Unknown tool: {name}")))?;

        match &outcome {
            Ok(_) => info!(tool = %name, "Tool call succeeded"),
            Err(e) if e.is_incident() => {
                let correlation_id = Uuid::new_v4().simple().to_string();
                error!(
                    tool = %name,
                    correlation_id = %correlation_id,
                    error_type = e.error_type_name(),
                    error = ?e,
                    "Tool call failed"
                );
            }
            Err(e) => {
                debug!(tool = %name, error_type = e.error_type_name(), error = %e, "Tool call rejected")
            }
        }
        Ok(tools::tool_result(outcome))
    }
}

/// `initialize` result, echoing the client's protocol version when supported.
pub fn initialize_result(params: Option<&Value>) -> Value {
    let requested = params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str);
    let version = requested
        .and_then(|v| SUPPORTED_PROTOCOL_VERSIONS.iter().find(|s| **s == v))
        .copied()
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0]);

    json!({
        "protocolVersion": version,
        "capabilities": {"tools": {"listChanged": false}},
        "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
    })
}

fn to_json(response: &JsonRpcResponse) -> Value {
    serde_json::to_value(response).unwrap_or_else(|_| {
        json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32603, "message": "Internal error"},
        })
    })
}
