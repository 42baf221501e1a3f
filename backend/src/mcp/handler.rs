//! MCP JSON-RPC request handler.
//!
//! Answers the protocol-level methods every MCP server must support. Tool,
//! prompt and resource catalogs are left empty; embedding applications
//! supply their own channel factory when they need real ones.

use mcpgate_types::{jsonrpc, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};
use serde_json::{json, Value};
use tracing::debug;

/// Identity advertised in the `initialize` result.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub instructions: Option<String>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
        }
    }
}

/// Tool call parameters from MCP.
#[derive(Debug, serde::Deserialize)]
struct ToolCallParams {
    name: String,
}

/// Stateless dispatcher for MCP methods.
#[derive(Debug, Clone, Default)]
pub struct McpHandler {
    info: ServerInfo,
}

impl McpHandler {
    pub fn new(info: ServerInfo) -> Self {
        Self { info }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Handle an MCP JSON-RPC request. Notifications yield `None`.
    pub fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("MCP: Handling method: {}", request.method);

        if request.is_notification() {
            // notifications/initialized, notifications/cancelled, ...
            return None;
        }
        let id = request.id.clone();

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": [] })),
            "prompts/list" => JsonRpcResponse::success(id, json!({ "prompts": [] })),
            "resources/list" => JsonRpcResponse::success(id, json!({ "resources": [] })),
            "tools/call" => Self::handle_call_tool(id, request.params),
            _ => JsonRpcResponse::error(
                id,
                jsonrpc::METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        };
        Some(response)
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        let mut result = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {},
                "prompts": {},
                "resources": {}
            },
            "serverInfo": {
                "name": self.info.name,
                "version": self.info.version
            }
        });
        if let Some(instructions) = &self.info.instructions {
            result["instructions"] = json!(instructions);
        }
        JsonRpcResponse::success(id, result)
    }

    fn handle_call_tool(id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        match params.map(serde_json::from_value::<ToolCallParams>) {
            Some(Ok(call)) => JsonRpcResponse::error(
                id,
                jsonrpc::INVALID_PARAMS,
                format!("Unknown tool: {}", call.name),
            ),
            _ => JsonRpcResponse::error(
                id,
                jsonrpc::INVALID_PARAMS,
                "Invalid params: expected {\"name\": string}",
            ),
        }
    }
}
