//! JWKS (JSON Web Key Set) cache with rate-limited refresh.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::AuthError;

/// Minimum interval between JWKS refreshes (5 minutes).
const JWKS_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// A JWK entry from the JWKS endpoint.
#[derive(Debug, Deserialize)]
struct JwkEntry {
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    alg: Option<String>,
    // RSA fields
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    // EC fields
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<JwkEntry>,
}

/// Caches keys fetched from one JWKS URL.
pub struct JwksCache {
    keys: RwLock<HashMap<String, (Algorithm, DecodingKey)>>,
    jwks_url: String,
    client: reqwest::Client,
    last_refresh: RwLock<Option<Instant>>,
}

impl JwksCache {
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            jwks_url: jwks_url.into(),
            client: reqwest::Client::new(),
            last_refresh: RwLock::new(None),
        }
    }

    /// A cache pre-loaded with keys that never fetches.
    #[cfg(test)]
    pub fn with_keys(keys: HashMap<String, (Algorithm, DecodingKey)>) -> Self {
        Self {
            keys: RwLock::new(keys),
            jwks_url: String::new(),
            client: reqwest::Client::new(),
            last_refresh: RwLock::new(Some(Instant::now())),
        }
    }

    pub fn url(&self) -> &str {
        &self.jwks_url
    }

    /// Get the decoding key for `kid`, refreshing (rate-limited) on a miss.
    pub async fn get_key(&self, kid: &str) -> Result<(Algorithm, DecodingKey), AuthError> {
        {
            let keys = self.keys.read().await;
            if let Some((alg, key)) = keys.get(kid) {
                return Ok((*alg, key.clone()));
            }
        }

        self.refresh().await?;

        let keys = self.keys.read().await;
        keys.get(kid)
            .map(|(alg, key)| (*alg, key.clone()))
            .ok_or_else(|| AuthError::InvalidToken(format!("Unknown signing key: {kid}")))
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        {
            let last = self.last_refresh.read().await;
            if last.is_some_and(|t| t.elapsed() < JWKS_REFRESH_INTERVAL) {
                return Ok(());
            }
        }

        debug!("Fetching JWKS from {}", self.jwks_url);
        let resp = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::KeySet(format!("JWKS fetch failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(AuthError::KeySet(format!(
                "JWKS fetch returned HTTP {status}"
            )));
        }

        let doc: JwksDocument = resp
            .json()
            .await
            .map_err(|e| AuthError::KeySet(format!("Failed to parse JWKS: {e}")))?;

        let new_keys = decode_keys(&doc);
        *self.keys.write().await = new_keys;
        *self.last_refresh.write().await = Some(Instant::now());
        Ok(())
    }
}

/// Turn usable JWK entries into decoding keys; unusable entries are skipped.
fn decode_keys(doc: &JwksDocument) -> HashMap<String, (Algorithm, DecodingKey)> {
    let mut keys = HashMap::new();
    for jwk in &doc.keys {
        let Some(kid) = jwk.kid.clone() else {
            continue;
        };

        let decoded = match jwk.kty.as_str() {
            "RSA" => match (jwk.n.as_deref(), jwk.e.as_deref()) {
                (Some(n), Some(e)) if !n.is_empty() && !e.is_empty() => {
                    DecodingKey::from_rsa_components(n, e)
                }
                _ => continue,
            },
            "EC" => match (jwk.x.as_deref(), jwk.y.as_deref()) {
                (Some(x), Some(y)) if !x.is_empty() && !y.is_empty() => {
                    DecodingKey::from_ec_components(x, y)
                }
                _ => continue,
            },
            _ => continue,
        };

        match decoded {
            Ok(key) => {
                keys.insert(kid, (jwk_algorithm(jwk), key));
            }
            Err(e) => warn!("Skipping invalid JWK {}: {}", kid, e),
        }
    }
    keys
}

/// Determine the JWT algorithm for a JWK entry.
fn jwk_algorithm(jwk: &JwkEntry) -> Algorithm {
    if let Some(alg) = &jwk.alg {
        match alg.as_str() {
            "RS256" => return Algorithm::RS256,
            "RS384" => return Algorithm::RS384,
            "RS512" => return Algorithm::RS512,
            "ES256" => return Algorithm::ES256,
            "ES384" => return Algorithm::ES384,
            _ => {}
        }
    }
    match jwk.kty.as_str() {
        "EC" => match jwk.crv.as_deref() {
            Some("P-384") => Algorithm::ES384,
            _ => Algorithm::ES256,
        },
        _ => Algorithm::RS256,
    }
}
