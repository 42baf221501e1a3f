//! MCP (Model Context Protocol) Streamable HTTP support.
//!
//! This module turns stateless HTTP requests into session-continued MCP
//! JSON-RPC channels, with every session bound to the principal that
//! created it.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - Send JSON-RPC requests
//! - `GET /mcp` - Open SSE stream for server messages
//! - `DELETE /mcp` - Terminate session
//!
//! ## Session Management
//!
//! Sessions are identified by the `Mcp-Session-Id` header, assigned during
//! initialization and required for subsequent requests. A session presented
//! by a different principal is destroyed and answered exactly like an
//! unknown one.

pub mod channel;
pub mod gateway;
pub mod handler;
pub mod response;
pub mod session;
pub mod streamable;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{ChannelConfig, ChannelError, ChannelFactory, ChannelRequest, ProtocolChannel};
pub use gateway::{GatewayError, TransportGateway};
pub use handler::{McpHandler, ServerInfo};
pub use session::{SessionLimits, SessionStore};
pub use streamable::{StreamableChannel, StreamableChannelFactory};
