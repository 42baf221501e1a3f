//! Built-in Streamable HTTP protocol channel.
//!
//! One [`StreamableChannel`] serves one MCP session: JSON responses for
//! POSTed requests, an SSE stream for server-initiated messages on GET, and
//! termination on DELETE.

use async_trait::async_trait;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use mcpgate_types::{is_initialize_request, jsonrpc, JsonRpcRequest};
use parking_lot::Mutex;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use super::channel::{
    ChannelConfig, ChannelError, ChannelFactory, ChannelRequest, ProtocolChannel,
    SessionIdGenerator,
};
use super::handler::{McpHandler, ServerInfo};
use super::response;

/// Buffered server-initiated messages per channel.
const EVENT_BUFFER: usize = 100;

/// SSE keep-alive interval.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Default)]
struct ChannelState {
    initialized: bool,
    session_id: Option<String>,
    closed: bool,
}

/// A single MCP session's transport.
pub struct StreamableChannel {
    handler: McpHandler,
    session_id_generator: Option<SessionIdGenerator>,
    on_session_initialized: Mutex<Option<oneshot::Sender<String>>>,
    state: Mutex<ChannelState>,
    /// Dropped on close, which ends every open SSE stream.
    events: Mutex<Option<broadcast::Sender<String>>>,
}

impl StreamableChannel {
    pub fn new(handler: McpHandler, config: ChannelConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            handler,
            session_id_generator: config.session_id_generator,
            on_session_initialized: Mutex::new(config.on_session_initialized),
            state: Mutex::new(ChannelState::default()),
            events: Mutex::new(Some(event_tx)),
        }
    }

    /// The session id assigned at initialization, if any.
    pub fn session_id(&self) -> Option<String> {
        self.state.lock().session_id.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Push a server-initiated JSON-RPC message to open SSE streams.
    ///
    /// Returns whether any stream received it.
    pub fn publish(&self, message: &Value) -> bool {
        let Ok(json) = serde_json::to_string(message) else {
            return false;
        };
        match self.events.lock().as_ref() {
            Some(tx) => tx.send(json).is_ok(),
            None => false,
        }
    }

    fn handle_post(&self, request: ChannelRequest) -> Response {
        let header_sid = request.session_id();
        let Some(body) = request.body else {
            return response::error(
                StatusCode::BAD_REQUEST,
                jsonrpc::PARSE_ERROR,
                "Parse error: empty body",
            );
        };
        if body.is_array() {
            return response::error(
                StatusCode::BAD_REQUEST,
                jsonrpc::INVALID_REQUEST,
                "Invalid Request: batch requests are not supported",
            );
        }

        let is_init = is_initialize_request(&body);
        let rpc: JsonRpcRequest = match serde_json::from_value::<JsonRpcRequest>(body) {
            Ok(rpc) if rpc.jsonrpc == jsonrpc::JSONRPC_VERSION => rpc,
            _ => {
                return response::error(
                    StatusCode::BAD_REQUEST,
                    jsonrpc::INVALID_REQUEST,
                    "Invalid Request",
                )
            }
        };

        if is_init {
            return self.initialize(rpc);
        }
        if rpc.method == "initialize" {
            return response::error(
                StatusCode::BAD_REQUEST,
                jsonrpc::INVALID_REQUEST,
                "Invalid Request: malformed initialize",
            );
        }

        let session_id = match self.validate_session(header_sid.as_deref()) {
            Ok(sid) => sid,
            Err(resp) => return resp,
        };

        match self.handler.handle_request(rpc) {
            Some(resp) => response::json_rpc_with_session(StatusCode::OK, &resp, session_id.as_deref()),
            None => StatusCode::ACCEPTED.into_response(),
        }
    }

    fn initialize(&self, rpc: JsonRpcRequest) -> Response {
        let session_id = {
            let mut state = self.state.lock();
            if state.initialized {
                return response::error(
                    StatusCode::BAD_REQUEST,
                    jsonrpc::INVALID_REQUEST,
                    "Invalid Request: Server already initialized",
                );
            }
            state.initialized = true;
            state.session_id = self.session_id_generator.as_ref().map(|generate| generate());
            state.session_id.clone()
        };

        if let Some(sid) = &session_id {
            info!("MCP: New session initialized: {}", sid);
            if let Some(tx) = self.on_session_initialized.lock().take() {
                let _ = tx.send(sid.clone());
            }
        }

        match self.handler.handle_request(rpc) {
            Some(resp) => response::json_rpc_with_session(StatusCode::OK, &resp, session_id.as_deref()),
            None => StatusCode::ACCEPTED.into_response(),
        }
    }

    fn handle_get(&self, request: ChannelRequest) -> Response {
        if !accepts_event_stream(&request.headers) {
            return response::error(
                StatusCode::NOT_ACCEPTABLE,
                jsonrpc::SERVER_ERROR,
                "Not Acceptable: Client must accept text/event-stream",
            );
        }
        let session_id = match self.validate_session(request.session_id().as_deref()) {
            Ok(sid) => sid,
            Err(resp) => return resp,
        };

        let rx = match self.events.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            None => return response::session_not_found(),
        };
        debug!("MCP: SSE stream opened for session {:?}", session_id);

        let stream = BroadcastStream::new(rx).filter_map(|result| match result {
            Ok(json) => Some(Ok::<_, Infallible>(Event::default().data(json))),
            Err(_) => None, // Lagged
        });

        let mut resp = Sse::new(stream)
            .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
            .into_response();
        if let Some(sid) = &session_id {
            response::set_session_header(&mut resp, sid);
        }
        resp
    }

    fn handle_delete(&self, request: ChannelRequest) -> Response {
        if let Err(resp) = self.validate_session(request.session_id().as_deref()) {
            return resp;
        }
        let _ = self.close();
        StatusCode::OK.into_response()
    }

    /// Check the request's session header against this channel.
    ///
    /// Returns the channel's session id (`None` for a channel without one).
    fn validate_session(&self, header_sid: Option<&str>) -> Result<Option<String>, Response> {
        let state = self.state.lock();
        if !state.initialized {
            return Err(match header_sid {
                Some(_) => response::session_not_found(),
                None => response::error(
                    StatusCode::BAD_REQUEST,
                    jsonrpc::SERVER_ERROR,
                    "Bad Request: Server not initialized",
                ),
            });
        }
        match (&state.session_id, header_sid) {
            (None, _) => Ok(None),
            (Some(own), Some(given)) if own == given => Ok(Some(own.clone())),
            (Some(_), Some(_)) => Err(response::session_not_found()),
            (Some(_), None) => Err(response::error(
                StatusCode::BAD_REQUEST,
                jsonrpc::SERVER_ERROR,
                "Bad Request: Mcp-Session-Id header is required",
            )),
        }
    }
}

#[async_trait]
impl ProtocolChannel for StreamableChannel {
    async fn handle_request(&self, request: ChannelRequest) -> Response {
        if self.is_closed() {
            return response::session_not_found();
        }
        match request.method.clone() {
            Method::POST => self.handle_post(request),
            Method::GET => self.handle_get(request),
            Method::DELETE => self.handle_delete(request),
            _ => (
                StatusCode::METHOD_NOT_ALLOWED,
                [(header::ALLOW, "GET, POST, DELETE")],
            )
                .into_response(),
        }
    }

    fn close(&self) -> Result<(), ChannelError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
        }
        self.events.lock().take();
        debug!("MCP channel closed (session {:?})", self.session_id());
        Ok(())
    }
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
}

/// Creates [`StreamableChannel`]s sharing one [`McpHandler`].
#[derive(Debug, Clone, Default)]
pub struct StreamableChannelFactory {
    handler: McpHandler,
}

impl StreamableChannelFactory {
    pub fn new(info: ServerInfo) -> Self {
        Self {
            handler: McpHandler::new(info),
        }
    }
}

impl ChannelFactory for StreamableChannelFactory {
    fn create(&self, config: ChannelConfig) -> Result<Arc<dyn ProtocolChannel>, ChannelError> {
        Ok(Arc::new(StreamableChannel::new(self.handler.clone(), config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use http_body_util::BodyExt;
    use mcpgate_types::MCP_SESSION_ID_HEADER;
    use serde_json::json;

    fn init_body() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "0.0.0"}
            }
        })
    }

    fn req(method: Method, sid: Option<&str>, body: Option<Value>) -> ChannelRequest {
        let mut headers = HeaderMap::new();
        if let Some(sid) = sid {
            headers.insert(MCP_SESSION_ID_HEADER, HeaderValue::from_str(sid).unwrap());
        }
        ChannelRequest::new(method, headers, body)
    }

    fn session_channel() -> (StreamableChannel, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        let config = ChannelConfig::initiating(Arc::new(|| "sid-1".to_string()), tx);
        (StreamableChannel::new(McpHandler::default(), config), rx)
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_assigns_and_reports_session() {
        let (channel, mut rx) = session_channel();

        let resp = channel
            .handle_request(req(Method::POST, None, Some(init_body())))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[MCP_SESSION_ID_HEADER], "sid-1");
        assert_eq!(rx.try_recv().unwrap(), "sid-1");
        assert_eq!(channel.session_id().as_deref(), Some("sid-1"));

        let body = body_json(resp).await;
        assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
    }

    #[tokio::test]
    async fn test_second_initialize_rejected() {
        let (channel, _rx) = session_channel();
        channel
            .handle_request(req(Method::POST, None, Some(init_body())))
            .await;

        let resp = channel
            .handle_request(req(Method::POST, Some("sid-1"), Some(init_body())))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], jsonrpc::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_uninitialized_channel_rejects_requests() {
        let channel = StreamableChannel::new(McpHandler::default(), ChannelConfig::default());
        let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});

        let resp = channel
            .handle_request(req(Method::POST, None, Some(list.clone())))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], jsonrpc::SERVER_ERROR);

        let resp = channel
            .handle_request(req(Method::POST, Some("stale"), Some(list)))
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"]["code"], jsonrpc::SESSION_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_header_validation() {
        let (channel, _rx) = session_channel();
        channel
            .handle_request(req(Method::POST, None, Some(init_body())))
            .await;
        let ping = json!({"jsonrpc": "2.0", "id": 5, "method": "ping"});

        let resp = channel
            .handle_request(req(Method::POST, Some("sid-1"), Some(ping.clone())))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["id"], 5);

        let resp = channel
            .handle_request(req(Method::POST, Some("other"), Some(ping.clone())))
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = channel
            .handle_request(req(Method::POST, None, Some(ping)))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_notification_accepted() {
        let (channel, _rx) = session_channel();
        channel
            .handle_request(req(Method::POST, None, Some(init_body())))
            .await;

        let resp = channel
            .handle_request(req(
                Method::POST,
                Some("sid-1"),
                Some(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
            ))
            .await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_malformed_bodies() {
        let (channel, _rx) = session_channel();

        let resp = channel.handle_request(req(Method::POST, None, None)).await;
        assert_eq!(body_json(resp).await["error"]["code"], jsonrpc::PARSE_ERROR);

        let resp = channel
            .handle_request(req(Method::POST, None, Some(json!({"jsonrpc": "1.0", "id": 1, "method": "ping"}))))
            .await;
        assert_eq!(body_json(resp).await["error"]["code"], jsonrpc::INVALID_REQUEST);

        let resp = channel
            .handle_request(req(Method::POST, None, Some(json!([init_body()]))))
            .await;
        assert_eq!(body_json(resp).await["error"]["code"], jsonrpc::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_sse_stream_receives_published_messages() {
        let (channel, _rx) = session_channel();
        channel
            .handle_request(req(Method::POST, None, Some(init_body())))
            .await;

        let mut get = req(Method::GET, Some("sid-1"), None);
        get.headers
            .insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        let resp = channel.handle_request(get).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[MCP_SESSION_ID_HEADER], "sid-1");

        let note = json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {"level": "info"}});
        assert!(channel.publish(&note));

        let mut body = resp.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.contains("notifications/message"));

        // Closing ends the stream.
        channel.close().unwrap();
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn test_get_requires_event_stream_accept() {
        let (channel, _rx) = session_channel();
        channel
            .handle_request(req(Method::POST, None, Some(init_body())))
            .await;
        let resp = channel
            .handle_request(req(Method::GET, Some("sid-1"), None))
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_delete_closes_channel() {
        let (channel, _rx) = session_channel();
        channel
            .handle_request(req(Method::POST, None, Some(init_body())))
            .await;

        let resp = channel
            .handle_request(req(Method::DELETE, Some("sid-1"), None))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(channel.is_closed());
        assert!(!channel.publish(&json!({})));

        let resp = channel
            .handle_request(req(
                Method::POST,
                Some("sid-1"),
                Some(json!({"jsonrpc": "2.0", "id": 9, "method": "ping"})),
            ))
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        // Idempotent.
        channel.close().unwrap();
    }

    #[tokio::test]
    async fn test_other_methods_not_allowed() {
        let (channel, _rx) = session_channel();
        let resp = channel.handle_request(req(Method::PUT, None, None)).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
