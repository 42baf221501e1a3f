//! OAuth protected-resource types (RFC 9728).

use serde::{Deserialize, Serialize};

/// Scopes advertised when none are configured.
pub const DEFAULT_SCOPES: [&str; 2] = ["email", "profile"];

/// Metadata served at `/.well-known/oauth-protected-resource`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    pub authorization_servers: Vec<String>,
    pub scopes_supported: Vec<String>,
}

impl ProtectedResourceMetadata {
    /// Build metadata, defaulting `scopes_supported` to `email profile`.
    ///
    /// `openid` is deliberately absent from the defaults: the gateway only
    /// needs an access token, and some authorization servers fail the token
    /// exchange when asked to mint an ID token.
    pub fn new(
        resource: impl Into<String>,
        authorization_servers: Vec<String>,
        scopes_supported: Option<Vec<String>>,
    ) -> Self {
        Self {
            resource: resource.into(),
            authorization_servers,
            scopes_supported: scopes_supported
                .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()),
        }
    }
}

/// Error body returned with 401/403 responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthErrorResponse {
    pub error: String,
    pub error_description: String,
}
