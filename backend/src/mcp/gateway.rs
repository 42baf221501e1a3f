//! Per-request session resolution for the Streamable HTTP transport.
//!
//! Every request runs store maintenance, then either continues an existing
//! session (after checking it belongs to the caller) or forks a fresh
//! channel. Fresh channels only become sessions when they report a
//! successful `initialize`.

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use mcpgate_types::{is_initialize_request, jsonrpc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::channel::{ChannelConfig, ChannelError, ChannelFactory, ChannelRequest};
use super::response;
use super::session::{close_best_effort, Resolution, SessionStore, SessionStoreError};

/// Error type for gateway failures that are not the channel's own.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Store(#[from] SessionStoreError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let message = match self {
            GatewayError::Channel(_) => "Internal error: failed to create transport",
            GatewayError::Store(_) => "Internal error: failed to register session",
        };
        response::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            jsonrpc::INTERNAL_ERROR,
            message,
        )
    }
}

/// Resolves requests against a [`SessionStore`] and delegates to channels.
#[derive(Clone)]
pub struct TransportGateway {
    store: SessionStore,
}

impl TransportGateway {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Handle one request for the principal identified by `principal_key`.
    pub async fn handle(
        &self,
        request: ChannelRequest,
        principal_key: &str,
        factory: &dyn ChannelFactory,
    ) -> Result<Response, GatewayError> {
        let now = Instant::now();
        self.store.maintain(now);

        if let Some(session_id) = request.session_id() {
            match self.store.resolve(&session_id, principal_key, now) {
                Resolution::Continue(session) => {
                    debug!("MCP {} continues session {}", request.method, session_id);
                    let terminating = request.method == Method::DELETE;
                    let channel = session.channel.clone();
                    drop(session);

                    let resp = channel.handle_request(request).await;
                    if terminating && self.store.remove(&session_id) {
                        info!("MCP session closed by client: {}", session_id);
                    }
                    return Ok(resp);
                }
                Resolution::Mismatch => return Ok(response::session_not_found()),
                Resolution::NotFound => {
                    debug!("MCP session {} not found; treating as new", session_id);
                }
            }
        }

        self.initiate(request, principal_key, factory).await
    }

    /// Fork a fresh channel for a request with no live session.
    ///
    /// Non-initialize requests get a channel without a session id generator,
    /// so the channel's own validation rejects them.
    async fn initiate(
        &self,
        request: ChannelRequest,
        principal_key: &str,
        factory: &dyn ChannelFactory,
    ) -> Result<Response, GatewayError> {
        let is_init = request.body.as_ref().is_some_and(is_initialize_request);

        let (config, initialized_rx) = if is_init {
            let (tx, rx) = oneshot::channel();
            let generator = Arc::new(|| Uuid::new_v4().to_string());
            (ChannelConfig::initiating(generator, tx), Some(rx))
        } else {
            (ChannelConfig::default(), None)
        };

        let channel = factory.create(config).map_err(|e| {
            error!("MCP channel construction failed: {}", e);
            e
        })?;

        let resp = channel.handle_request(request).await;

        if let Some(mut rx) = initialized_rx {
            if let Ok(session_id) = rx.try_recv() {
                let now = Instant::now();
                if let Err(e) = self.store.insert(
                    session_id.clone(),
                    channel.clone(),
                    principal_key.to_string(),
                    now,
                ) {
                    error!("MCP session registration failed: {}", e);
                    close_best_effort(&session_id, channel.as_ref());
                    return Err(e.into());
                }
                self.store.maintain(now);
            }
        }

        Ok(resp)
    }
}
