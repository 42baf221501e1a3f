//! JSON-RPC HTTP response builders.

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use mcpgate_types::{JsonRpcResponse, MCP_SESSION_ID_HEADER};

/// Serialize a JSON-RPC response with the given HTTP status.
pub fn json_rpc(status: StatusCode, body: &JsonRpcResponse) -> Response {
    let json = serde_json::to_string(body).unwrap_or_default();
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        json,
    )
        .into_response()
}

/// Like [`json_rpc`], echoing the session id header when one is known.
pub fn json_rpc_with_session(
    status: StatusCode,
    body: &JsonRpcResponse,
    session_id: Option<&str>,
) -> Response {
    let mut resp = json_rpc(status, body);
    if let Some(sid) = session_id {
        set_session_header(&mut resp, sid);
    }
    resp
}

/// Attach `mcp-session-id` to a response.
pub fn set_session_header(resp: &mut Response, session_id: &str) {
    if let Ok(hv) = HeaderValue::from_str(session_id) {
        resp.headers_mut()
            .insert(HeaderName::from_static(MCP_SESSION_ID_HEADER), hv);
    }
}

/// The fixed 404 / -32001 response.
///
/// Used for unknown, expired, evicted and foreign sessions alike, so a
/// client cannot tell them apart.
pub fn session_not_found() -> Response {
    json_rpc(StatusCode::NOT_FOUND, &JsonRpcResponse::session_not_found())
}

/// A JSON-RPC error with `"id": null`.
pub fn error(status: StatusCode, code: i32, message: impl Into<String>) -> Response {
    json_rpc(status, &JsonRpcResponse::error(None, code, message))
}
