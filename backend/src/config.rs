//! Configuration management.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use mcpgate_types::auth::DEFAULT_SCOPES;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::mcp::session::{DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_TTL};

/// Path of the protected-resource metadata document.
pub const RESOURCE_METADATA_PATH: &str = "/.well-known/oauth-protected-resource";

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    sessions: SessionsConfig,
    #[serde(default)]
    auth: AuthSection,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_port")]
    port: u16,
    /// Extra origins accepted on `/mcp` besides localhost.
    #[serde(default)]
    allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionsConfig {
    #[serde(default = "default_ttl_secs")]
    ttl_secs: u64,
    #[serde(default = "default_max_sessions")]
    max_sessions: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct AuthSection {
    /// JWKS endpoint. Authentication is disabled when unset.
    jwks_url: Option<String>,
    issuer: Option<String>,
    #[serde(default)]
    audiences: Vec<String>,
    /// Public URL of the MCP resource (e.g. `https://mcp.example.com/mcp`).
    resource: Option<String>,
    resource_metadata_url: Option<String>,
    #[serde(default)]
    authorization_servers: Vec<String>,
    scopes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LoggingConfig {
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    log_level: Option<String>,
}

fn default_port() -> u16 {
    mcpgate_types::DEFAULT_PORT
}

fn default_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL.as_secs()
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

/// Token verification and protected-resource settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub jwks_url: Option<String>,
    pub issuer: Option<String>,
    pub audiences: Vec<String>,
    pub resource: String,
    pub resource_metadata_url: String,
    pub authorization_servers: Vec<String>,
    pub scopes: Vec<String>,
}

impl AuthConfig {
    /// Authentication is enabled when a JWKS URL is configured.
    pub fn enabled(&self) -> bool {
        self.jwks_url.is_some()
    }

    /// Token verification needs an issuer and at least one audience.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        if self.issuer.as_deref().map_or(true, |iss| iss.trim().is_empty()) {
            anyhow::bail!("auth.issuer is required when auth.jwks_url is set");
        }
        if self.audiences.iter().all(|aud| aud.trim().is_empty()) {
            anyhow::bail!("auth.audiences must name at least one audience when auth.jwks_url is set");
        }
        Ok(())
    }

    /// Space-separated scope string for `WWW-Authenticate`.
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }

    /// Defaults for a gateway listening on localhost with auth disabled.
    pub fn local(port: u16) -> Self {
        let resource = format!("http://localhost:{port}/mcp");
        Self {
            jwks_url: None,
            issuer: None,
            audiences: Vec::new(),
            resource_metadata_url: metadata_url_for(&resource),
            resource,
            authorization_servers: Vec::new(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on
    pub port: u16,
    /// Origins accepted on `/mcp` in addition to localhost
    pub allowed_origins: Vec<String>,
    /// Idle time after which a session expires
    pub session_ttl: Duration,
    /// Maximum number of live sessions
    pub max_sessions: usize,
    pub auth: AuthConfig,
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    pub log_file: Option<PathBuf>,
    /// Log level (if set, overrides RUST_LOG environment variable)
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are searched in this order:
    /// 1. `.mcpgate.toml` in current directory
    /// 2. `config.toml` in user config directory (~/.config/mcpgate/ on Linux)
    pub fn from_figment(port: Option<u16>, jwks_url: Option<String>) -> anyhow::Result<Self> {
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(".mcpgate.toml"));
        let user_config = directories::ProjectDirs::from("", "", "mcpgate")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // defaults < user config < local config < env vars < CLI args
        let mut figment = Figment::new().merge(Serialized::defaults(ConfigFile::default()));

        if let Some(ref path) = user_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        if let Some(ref path) = local_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        // MCPGATE_SERVER__PORT, MCPGATE_AUTH__JWKS_URL, ...
        figment = figment.merge(Env::prefixed("MCPGATE_").split("__"));

        if let Some(p) = port {
            figment = figment.merge(Serialized::default("server.port", p));
        }
        if let Some(ref url) = jwks_url {
            figment = figment.merge(Serialized::default("auth.jwks_url", url));
        }

        let config_file: ConfigFile = figment.extract()?;
        Self::from_file(config_file)
    }

    fn from_file(file: ConfigFile) -> anyhow::Result<Self> {
        if file.sessions.max_sessions == 0 {
            anyhow::bail!("sessions.max_sessions must be at least 1");
        }
        if file.sessions.ttl_secs == 0 {
            anyhow::bail!("sessions.ttl_secs must be at least 1");
        }

        let port = file.server.port;
        let mut auth = AuthConfig::local(port);
        if let Some(resource) = file.auth.resource {
            auth.resource_metadata_url = metadata_url_for(&resource);
            auth.resource = resource;
        }
        if let Some(url) = file.auth.resource_metadata_url {
            auth.resource_metadata_url = url;
        }
        if let Some(scopes) = file.auth.scopes {
            auth.scopes = scopes;
        }
        auth.jwks_url = file.auth.jwks_url.filter(|u| !u.trim().is_empty());
        auth.issuer = file.auth.issuer;
        auth.audiences = file.auth.audiences;
        auth.authorization_servers = file.auth.authorization_servers;
        auth.validate()?;

        Ok(Self {
            port,
            allowed_origins: file.server.allowed_origins,
            session_ttl: Duration::from_secs(file.sessions.ttl_secs),
            max_sessions: file.sessions.max_sessions,
            auth,
            log_file: file.logging.log_file,
            log_level: file.logging.log_level,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        let port = mcpgate_types::DEFAULT_PORT;
        Self {
            port,
            allowed_origins: Vec::new(),
            session_ttl: DEFAULT_SESSION_TTL,
            max_sessions: DEFAULT_MAX_SESSIONS,
            auth: AuthConfig::local(port),
            log_file: None,
            log_level: None,
        }
    }
}

/// Metadata URL on the same origin as `resource`.
fn metadata_url_for(resource: &str) -> String {
    let origin = match resource.find("://") {
        Some(scheme_end) => {
            let rest = &resource[scheme_end + 3..];
            let host_end = rest.find('/').map_or(resource.len(), |i| scheme_end + 3 + i);
            &resource[..host_end]
        }
        None => resource.trim_end_matches('/'),
    };
    format!("{origin}{RESOURCE_METADATA_PATH}")
}
