//! MCP Streamable HTTP endpoint handlers.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - Send JSON-RPC requests
//! - `GET /mcp` - Open SSE stream for server-initiated messages
//! - `DELETE /mcp` - Terminate a session
//!
//! All three authenticate the caller and hand the request to the
//! [`TransportGateway`](crate::mcp::TransportGateway), which owns session
//! resolution.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use mcpgate_types::jsonrpc;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::mcp::{response, ChannelRequest};
use crate::state::AppState;

/// Validate Origin header for DNS rebinding protection.
fn validate_origin(headers: &HeaderMap, allowed: &[String]) -> bool {
    // No Origin header - accept (common for non-browser clients)
    let Some(origin) = headers.get(header::ORIGIN) else {
        return true;
    };
    let Ok(origin_str) = origin.to_str() else {
        warn!("Rejecting MCP request with unreadable Origin header");
        return false;
    };

    if is_loopback_origin(origin_str) {
        return true;
    }
    if allowed
        .iter()
        .any(|a| a.trim_end_matches('/') == origin_str.trim_end_matches('/'))
    {
        return true;
    }

    warn!("Rejecting MCP request from origin: {}", origin_str);
    false
}

/// Whether `origin` is `http(s)://` plus a loopback host and an optional port.
fn is_loopback_origin(origin: &str) -> bool {
    let Some(authority) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    else {
        return false;
    };

    let (host, port) = match authority.strip_prefix("[::1]") {
        Some(rest) => ("[::1]", rest),
        None => match authority.find(':') {
            Some(i) => authority.split_at(i),
            None => (authority, ""),
        },
    };

    let port_ok = match port.strip_prefix(':') {
        Some(digits) => {
            !digits.is_empty() && digits.len() <= 5 && digits.bytes().all(|b| b.is_ascii_digit())
        }
        None => port.is_empty(),
    };
    port_ok && matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

/// Parse a request body. An empty body is `None`; anything else must be JSON.
#[allow(clippy::result_large_err)]
fn parse_body(body: &Bytes) -> Result<Option<Value>, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body).map(Some).map_err(|e| {
        debug!("MCP: Rejecting unparseable body: {}", e);
        response::error(StatusCode::BAD_REQUEST, jsonrpc::PARSE_ERROR, "Parse error")
    })
}

/// Authenticate, check the origin, then resolve through the gateway.
async fn dispatch(state: AppState, method: Method, headers: HeaderMap, body: Option<Value>) -> Response {
    let principal = match state.authenticator().authenticate(&headers).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    if !validate_origin(&headers, state.allowed_origins()) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Invalid origin"})),
        )
            .into_response();
    }

    let request = ChannelRequest::new(method, headers, body);
    debug!(
        "MCP {}: session={:?}",
        request.method,
        request.session_id()
    );

    match state
        .gateway()
        .handle(request, &principal.principal_key(), state.factory().as_ref())
        .await
    {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

/// POST /mcp - Handle JSON-RPC requests.
///
/// An `initialize` without a live session starts a new one; its id is
/// returned in the `Mcp-Session-Id` header and required afterwards.
pub async fn mcp_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let body = match parse_body(&body) {
        Ok(body) => body,
        Err(response) => return response,
    };
    dispatch(state, Method::POST, headers, body).await
}

/// GET /mcp - Open SSE stream for server-initiated messages.
pub async fn mcp_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    dispatch(state, Method::GET, headers, None).await
}

/// DELETE /mcp - Terminate a session.
pub async fn mcp_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    dispatch(state, Method::DELETE, headers, None).await
}
