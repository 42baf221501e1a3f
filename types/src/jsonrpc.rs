//! JSON-RPC 2.0 envelopes used on the MCP wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i32 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i32 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i32 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i32 = -32603;
/// Transport-level rejection (e.g. request before initialization).
pub const SERVER_ERROR: i32 = -32000;
/// The session id is unknown, expired, evicted or bound to someone else.
pub const SESSION_NOT_FOUND: i32 = -32001;

/// Message paired with [`SESSION_NOT_FOUND`].
pub const SESSION_NOT_FOUND_MESSAGE: &str = "Session not found";

/// JSON-RPC 2.0 Request (or notification when `id` is absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Notifications carry no `id` and never get a response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 Response.
///
/// `id` is always serialized; error responses to unidentifiable requests
/// carry `"id": null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// The fixed session-not-found error.
    pub fn session_not_found() -> Self {
        Self::error(None, SESSION_NOT_FOUND, SESSION_NOT_FOUND_MESSAGE)
    }
}

/// JSON-RPC 2.0 Error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Whether a parsed body is an MCP `initialize` request.
///
/// Requires a JSON-RPC 2.0 request object (with an `id`) whose method is
/// `initialize` and whose params name a protocol version.
pub fn is_initialize_request(body: &Value) -> bool {
    let Some(obj) = body.as_object() else {
        return false;
    };
    obj.get("jsonrpc").and_then(Value::as_str) == Some(JSONRPC_VERSION)
        && obj.get("method").and_then(Value::as_str) == Some("initialize")
        && obj.get("id").is_some_and(|id| !id.is_null())
        && obj
            .get("params")
            .and_then(|p| p.get("protocolVersion"))
            .is_some_and(Value::is_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_not_found_wire_shape() {
        let body = serde_json::to_string(&JsonRpcResponse::session_not_found()).unwrap();
        assert_eq!(
            body,
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32001,"message":"Session not found"}}"#
        );
    }

    #[test]
    fn test_success_omits_error() {
        let body = serde_json::to_value(JsonRpcResponse::success(Some(json!(7)), json!({}))).unwrap();
        assert_eq!(body, json!({"jsonrpc": "2.0", "id": 7, "result": {}}));
    }

    #[test]
    fn test_is_initialize_request() {
        let init = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "0.0.0"}
            }
        });
        assert!(is_initialize_request(&init));

        let notification = json!({"jsonrpc": "2.0", "method": "initialize", "params": {"protocolVersion": "x"}});
        assert!(!is_initialize_request(&notification));

        let other = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
        assert!(!is_initialize_request(&other));

        let no_params = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});
        assert!(!is_initialize_request(&no_params));

        assert!(!is_initialize_request(&json!([init])));
    }

    #[test]
    fn test_request_notification() {
        let req: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
                .unwrap();
        assert!(req.is_notification());
        assert!(req.params.is_none());
    }
}
