//! Shared types for the mcpgate Streamable HTTP gateway.
//!
//! This crate contains the JSON-RPC wire envelopes and OAuth metadata types
//! shared between the gateway and its clients and tests.

/// Default port for the gateway server.
pub const DEFAULT_PORT: u16 = 8787;

/// Header carrying the MCP session id in both directions.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// MCP protocol version spoken by the built-in channel.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

pub mod auth;
pub mod jsonrpc;

pub use auth::{AuthErrorResponse, ProtectedResourceMetadata};
pub use jsonrpc::{is_initialize_request, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
