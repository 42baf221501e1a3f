//! Bearer token authentication for the MCP endpoint.
//!
//! Every `/mcp` request is authenticated before session resolution. The
//! verified [`Principal`] is reduced to a principal key that sessions are
//! bound to. When no verifier is configured, all requests run as the
//! anonymous principal.

mod jwks;
mod verify;

pub use jwks::JwksCache;
pub use verify::JwtVerifier;

use async_trait::async_trait;
use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use mcpgate_types::AuthErrorResponse;
use std::sync::Arc;
use tracing::{debug, warn};

/// Placeholder for a principal without a client id.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Subject used when authentication is disabled.
pub const ANONYMOUS_SUBJECT: &str = "anonymous";

/// Error type for token verification.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Key set unavailable: {0}")]
    KeySet(String),
}

/// The verified identity behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub sub: String,
    pub iss: Option<String>,
    pub aud: Vec<String>,
    pub exp: Option<u64>,
    pub client_id: Option<String>,
}

impl Principal {
    /// The principal used for every request when auth is disabled.
    pub fn anonymous() -> Self {
        Self {
            sub: ANONYMOUS_SUBJECT.to_string(),
            iss: None,
            aud: Vec::new(),
            exp: None,
            client_id: None,
        }
    }

    /// `"{sub}:{client_id}"`, with `unknown` standing in for a missing client id.
    pub fn principal_key(&self) -> String {
        format!(
            "{}:{}",
            self.sub,
            self.client_id.as_deref().unwrap_or(UNKNOWN_CLIENT)
        )
    }
}

/// Verifies a raw bearer token.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError>;
}

/// Extract the token from an `Authorization: Bearer ...` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// `WWW-Authenticate` challenge pointing clients at the resource metadata.
pub fn www_authenticate_header(resource_metadata_url: &str, scope: &str) -> String {
    format!("Bearer resource_metadata=\"{resource_metadata_url}\", scope=\"{scope}\"")
}

/// Authenticates requests, producing either a principal or a 401 response.
#[derive(Clone)]
pub struct Authenticator {
    verifier: Option<Arc<dyn TokenVerifier>>,
    challenge: String,
}

impl Authenticator {
    /// An authenticator that requires tokens checked by `verifier`.
    pub fn new(verifier: Arc<dyn TokenVerifier>, resource_metadata_url: &str, scope: &str) -> Self {
        Self {
            verifier: Some(verifier),
            challenge: www_authenticate_header(resource_metadata_url, scope),
        }
    }

    /// An authenticator that lets everyone in as [`Principal::anonymous`].
    pub fn disabled() -> Self {
        warn!("MCP authentication is DISABLED - all requests share the anonymous principal");
        Self {
            verifier: None,
            challenge: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.verifier.is_some()
    }

    /// Authenticate a request from its headers.
    #[allow(clippy::result_large_err)]
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, Response> {
        let Some(verifier) = &self.verifier else {
            return Ok(Principal::anonymous());
        };

        let Some(token) = bearer_token(headers) else {
            return Err(self.unauthorized(&AuthError::MissingToken));
        };

        match verifier.verify(token).await {
            Ok(principal) => {
                debug!("Authenticated MCP request for {}", principal.principal_key());
                Ok(principal)
            }
            Err(e) => {
                debug!("MCP token rejected: {}", e);
                Err(self.unauthorized(&e))
            }
        }
    }

    fn unauthorized(&self, err: &AuthError) -> Response {
        let (error, description) = match err {
            AuthError::MissingToken => ("invalid_request", err.to_string()),
            AuthError::InvalidToken(_) | AuthError::KeySet(_) => ("invalid_token", err.to_string()),
        };
        let mut resp = (
            StatusCode::UNAUTHORIZED,
            Json(AuthErrorResponse {
                error: error.to_string(),
                error_description: description,
            }),
        )
            .into_response();
        if let Ok(value) = HeaderValue::from_str(&self.challenge) {
            resp.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
        resp
    }
}
