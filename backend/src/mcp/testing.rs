//! Test doubles for the channel seam.

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::Response;
use mcpgate_types::{is_initialize_request, JsonRpcResponse};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use super::channel::{
    ChannelConfig, ChannelError, ChannelFactory, ChannelRequest, ProtocolChannel,
    SessionIdGenerator,
};
use super::response;

/// A channel that initializes on `initialize` and answers everything else with `{}`.
pub struct MockChannel {
    generator: Option<SessionIdGenerator>,
    notify: Mutex<Option<oneshot::Sender<String>>>,
    session_id: Mutex<Option<String>>,
    initialized: AtomicBool,
    fail_close: bool,
    close_calls: AtomicUsize,
    handled: AtomicUsize,
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(ChannelConfig::default(), false))
    }

    pub fn failing_close() -> Arc<Self> {
        Arc::new(Self::build(ChannelConfig::default(), true))
    }

    fn build(config: ChannelConfig, fail_close: bool) -> Self {
        Self {
            generator: config.session_id_generator,
            notify: Mutex::new(config.on_session_initialized),
            session_id: Mutex::new(None),
            initialized: AtomicBool::new(false),
            fail_close,
            close_calls: AtomicUsize::new(0),
            handled: AtomicUsize::new(0),
        }
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolChannel for MockChannel {
    async fn handle_request(&self, request: ChannelRequest) -> Response {
        self.handled.fetch_add(1, Ordering::SeqCst);
        let is_init = request.body.as_ref().is_some_and(is_initialize_request);

        if is_init && !self.initialized.load(Ordering::SeqCst) {
            if let Some(generator) = &self.generator {
                let sid = generator();
                *self.session_id.lock() = Some(sid.clone());
                self.initialized.store(true, Ordering::SeqCst);
                if let Some(tx) = self.notify.lock().take() {
                    let _ = tx.send(sid.clone());
                }
                return response::json_rpc_with_session(
                    StatusCode::OK,
                    &JsonRpcResponse::success(Some(json!(1)), json!({"initialized": true})),
                    Some(&sid),
                );
            }
        }

        if self.initialized.load(Ordering::SeqCst) {
            response::json_rpc(
                StatusCode::OK,
                &JsonRpcResponse::success(Some(json!(1)), json!({})),
            )
        } else {
            response::error(StatusCode::BAD_REQUEST, -32000, "Bad Request: Server not initialized")
        }
    }

    fn close(&self) -> Result<(), ChannelError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            Err(ChannelError::Close("transport already torn down".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Factory that records every channel it creates.
#[derive(Default)]
pub struct MockFactory {
    pub created: Mutex<Vec<Arc<MockChannel>>>,
    pub fail: bool,
}

impl MockFactory {
    pub fn failing() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn last(&self) -> Option<Arc<MockChannel>> {
        self.created.lock().last().cloned()
    }
}

impl ChannelFactory for MockFactory {
    fn create(&self, config: ChannelConfig) -> Result<Arc<dyn ProtocolChannel>, ChannelError> {
        if self.fail {
            return Err(ChannelError::Construction("factory offline".to_string()));
        }
        let channel = Arc::new(MockChannel::build(config, false));
        self.created.lock().push(channel.clone());
        Ok(channel)
    }
}
