//! Protocol channel seam.
//!
//! A protocol channel performs the JSON-RPC exchange for one session. The
//! gateway never looks inside a channel: it creates one through a
//! [`ChannelFactory`], hands it requests, and closes it when the session
//! dies.

use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use mcpgate_types::MCP_SESSION_ID_HEADER;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Produces a fresh session id once a channel has initialized.
pub type SessionIdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Error type for channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to create channel: {0}")]
    Construction(String),

    #[error("Failed to close channel: {0}")]
    Close(String),
}

/// One inbound HTTP request, already authenticated and body-parsed.
#[derive(Debug, Clone)]
pub struct ChannelRequest {
    pub method: Method,
    pub headers: HeaderMap,
    /// Parsed JSON body, `None` when the request had no body.
    pub body: Option<Value>,
}

impl ChannelRequest {
    pub fn new(method: Method, headers: HeaderMap, body: Option<Value>) -> Self {
        Self {
            method,
            headers,
            body,
        }
    }

    /// Session id from the `mcp-session-id` header. Blank values count as absent.
    pub fn session_id(&self) -> Option<String> {
        self.headers
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Construction options for a new channel.
///
/// A channel created with a generator is session-capable: on a successful
/// `initialize` it must call the generator exactly once and send the id
/// through `on_session_initialized` before returning its response.
#[derive(Default)]
pub struct ChannelConfig {
    pub session_id_generator: Option<SessionIdGenerator>,
    pub on_session_initialized: Option<oneshot::Sender<String>>,
}

impl ChannelConfig {
    /// Options for a request that may start a new session.
    pub fn initiating(generator: SessionIdGenerator, notify: oneshot::Sender<String>) -> Self {
        Self {
            session_id_generator: Some(generator),
            on_session_initialized: Some(notify),
        }
    }
}

/// The per-session JSON-RPC engine.
#[async_trait]
pub trait ProtocolChannel: Send + Sync {
    /// Handle one HTTP request and produce its HTTP response.
    ///
    /// May suspend for as long as the exchange lasts (SSE streams).
    async fn handle_request(&self, request: ChannelRequest) -> Response;

    /// Release the channel's resources. Must not block; must be idempotent.
    fn close(&self) -> Result<(), ChannelError>;
}

/// Creates protocol channels on demand.
pub trait ChannelFactory: Send + Sync {
    fn create(&self, config: ChannelConfig) -> Result<Arc<dyn ProtocolChannel>, ChannelError>;
}
