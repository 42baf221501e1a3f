//! OAuth protected-resource metadata (RFC 9728).

use axum::{extract::State, Json};
use mcpgate_types::ProtectedResourceMetadata;

use crate::state::AppState;

/// GET /.well-known/oauth-protected-resource
pub async fn protected_resource(State(state): State<AppState>) -> Json<ProtectedResourceMetadata> {
    Json(state.resource_metadata().clone())
}
