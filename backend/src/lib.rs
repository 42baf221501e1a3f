//! mcpgate backend library.
//!
//! This module exposes the application builder for use in tests.

use axum::http::HeaderValue;
use axum::http::{header, HeaderName, Method};
use axum::{routing::get, Router};
use mcpgate_types::MCP_SESSION_ID_HEADER;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod auth;
pub mod config;
pub mod mcp;
pub mod state;

use config::RESOURCE_METADATA_PATH;
use state::AppState;

/// Create the Axum application router with default state.
///
/// Authentication is disabled and sessions use the default limits.
pub fn create_app() -> Router {
    create_app_with_state(AppState::default())
}

/// Create the Axum application router with a given state.
pub fn create_app_with_state(state: AppState) -> Router {
    create_app_with_config(state, Vec::new())
}

/// Create the Axum application router with a given state and CORS origins.
///
/// If `cors_allowed_origins` is empty, any origin is allowed.
/// Otherwise, only the specified origins are allowed.
pub fn create_app_with_config(state: AppState, cors_allowed_origins: Vec<String>) -> Router {
    if state.authenticator().is_enabled() {
        tracing::info!("Authentication enabled for /mcp");
    }

    Router::new()
        .route("/health", get(health))
        .route(
            "/mcp",
            get(api::mcp::mcp_get)
                .post(api::mcp::mcp_post)
                .delete(api::mcp::mcp_delete),
        )
        .route(RESOURCE_METADATA_PATH, get(api::metadata::protected_resource))
        .layer(TraceLayer::new_for_http())
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::AUTHORIZATION,
                    header::ACCEPT,
                    HeaderName::from_static(MCP_SESSION_ID_HEADER),
                ])
                .expose_headers([
                    HeaderName::from_static(MCP_SESSION_ID_HEADER),
                    header::WWW_AUTHENTICATE,
                ]);

            if cors_allowed_origins.is_empty() {
                cors.allow_origin(Any)
            } else {
                let origins: Vec<HeaderValue> = cors_allowed_origins
                    .iter()
                    .filter_map(|o| o.parse::<HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins).allow_credentials(true)
            }
        })
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "OK"
}
