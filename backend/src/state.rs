//! Application state management.

use mcpgate_types::ProtectedResourceMetadata;
use std::sync::Arc;
use tracing::info;

use crate::auth::{Authenticator, JwksCache, JwtVerifier, TokenVerifier};
use crate::config::{AuthConfig, Config};
use crate::mcp::{
    ChannelFactory, ServerInfo, SessionLimits, SessionStore, StreamableChannelFactory,
    TransportGateway,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    gateway: TransportGateway,
    /// Creates a channel for every request without a live session
    factory: Arc<dyn ChannelFactory>,
    authenticator: Authenticator,
    resource_metadata: ProtectedResourceMetadata,
    /// Origins accepted on `/mcp` besides localhost
    allowed_origins: Vec<String>,
}

impl AppState {
    /// Create state from its parts.
    pub fn new(
        store: SessionStore,
        factory: Arc<dyn ChannelFactory>,
        authenticator: Authenticator,
        resource_metadata: ProtectedResourceMetadata,
        allowed_origins: Vec<String>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                gateway: TransportGateway::new(store),
                factory,
                authenticator,
                resource_metadata,
                allowed_origins,
            }),
        }
    }

    /// Build state from loaded configuration, using the built-in channel.
    ///
    /// Fails when token verification is enabled without an issuer and audience.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.auth.validate()?;

        let store = SessionStore::with_limits(SessionLimits {
            ttl: config.session_ttl,
            max_sessions: config.max_sessions,
        });
        info!(
            "Session store: ttl={}s, max_sessions={}",
            config.session_ttl.as_secs(),
            config.max_sessions
        );

        let verifier = match (&config.auth.jwks_url, &config.auth.issuer) {
            (Some(url), Some(issuer)) => {
                info!("Verifying bearer tokens from {} against JWKS at {}", issuer, url);
                Some(Arc::new(JwtVerifier::new(
                    Arc::new(JwksCache::new(url.clone())),
                    issuer.clone(),
                    config.auth.audiences.clone(),
                )) as Arc<dyn TokenVerifier>)
            }
            _ => None,
        };

        Ok(Self::new(
            store,
            Arc::new(StreamableChannelFactory::new(ServerInfo::default())),
            authenticator_for(&config.auth, verifier),
            resource_metadata_for(&config.auth),
            config.allowed_origins.clone(),
        ))
    }

    pub fn gateway(&self) -> &TransportGateway {
        &self.inner.gateway
    }

    pub fn factory(&self) -> &Arc<dyn ChannelFactory> {
        &self.inner.factory
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.inner.authenticator
    }

    pub fn resource_metadata(&self) -> &ProtectedResourceMetadata {
        &self.inner.resource_metadata
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.inner.allowed_origins
    }

    /// Close every live session. Called once the server has stopped.
    pub fn shutdown(&self) {
        let closed = self.inner.gateway.store().drain();
        info!("Closed {} MCP session(s) on shutdown", closed);
    }
}

impl Default for AppState {
    /// Default limits with authentication disabled.
    fn default() -> Self {
        let auth = Config::default().auth;
        Self::new(
            SessionStore::new(),
            Arc::new(StreamableChannelFactory::new(ServerInfo::default())),
            Authenticator::disabled(),
            resource_metadata_for(&auth),
            Vec::new(),
        )
    }
}

/// An authenticator for `auth`, disabled when there is no verifier.
pub fn authenticator_for(auth: &AuthConfig, verifier: Option<Arc<dyn TokenVerifier>>) -> Authenticator {
    match verifier {
        Some(v) => Authenticator::new(v, &auth.resource_metadata_url, &auth.scope()),
        None => Authenticator::disabled(),
    }
}

/// Protected-resource metadata advertised for `auth`.
pub fn resource_metadata_for(auth: &AuthConfig) -> ProtectedResourceMetadata {
    ProtectedResourceMetadata::new(
        auth.resource.clone(),
        auth.authorization_servers.clone(),
        Some(auth.scopes.clone()),
    )
}
