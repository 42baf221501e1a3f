//! JWT access token verification against a JWKS.

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::jwks::JwksCache;
use super::{AuthError, Principal, TokenVerifier};

/// Claims read from an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AccessTokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
    /// A single audience string or an array of them.
    #[serde(default)]
    pub aud: Option<Value>,
    #[serde(default)]
    pub exp: Option<u64>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub azp: Option<String>,
}

impl AccessTokenClaims {
    /// `client_id`, falling back to `azp`. Blank values are ignored.
    fn client_id(&self) -> Option<String> {
        [self.client_id.as_deref(), self.azp.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn audiences(&self) -> Vec<String> {
        match &self.aud {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn into_principal(self) -> Result<Principal, AuthError> {
        let sub = self
            .sub
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::InvalidToken("Token is missing the sub claim".to_string()))?
            .to_string();
        Ok(Principal {
            client_id: self.client_id(),
            aud: self.audiences(),
            sub,
            iss: self.iss,
            exp: self.exp,
        })
    }
}

/// Verifies signed access tokens: signature via JWKS, `exp`, `iss` and `aud`.
pub struct JwtVerifier {
    jwks: Arc<JwksCache>,
    issuer: String,
    audiences: Vec<String>,
}

impl JwtVerifier {
    /// Tokens must be issued by `issuer` for one of `audiences`. An empty
    /// audience list matches no token.
    pub fn new(jwks: Arc<JwksCache>, issuer: impl Into<String>, audiences: Vec<String>) -> Self {
        Self {
            jwks,
            issuer: issuer.into(),
            audiences,
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let header = decode_header(token)
            .map_err(|e| AuthError::InvalidToken(format!("Invalid JWT header: {e}")))?;

        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| AuthError::InvalidToken("JWT header missing kid".to_string()))?;

        let (alg, key) = self.jwks.get_key(kid).await?;

        let mut validation = Validation::new(alg);
        validation.set_audience(&self.audiences);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_exp = true;

        let token_data = decode::<AccessTokenClaims>(token, &key, &validation)
            .map_err(|e| AuthError::InvalidToken(format!("JWT validation failed: {e}")))?;

        token_data.claims.into_principal()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};

    use super::*;

    const SECRET: &[u8] = b"test-signing-secret";
    const KID: &str = "test-kid-1";
    const ISSUER: &str = "https://auth.example.com";
    const AUDIENCE: &str = "https://mcp.example.com/mcp";

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn verifier() -> JwtVerifier {
        verifier_for(vec![AUDIENCE.to_string()])
    }

    fn verifier_for(audiences: Vec<String>) -> JwtVerifier {
        let mut keys = HashMap::new();
        keys.insert(
            KID.to_string(),
            (Algorithm::HS256, DecodingKey::from_secret(SECRET)),
        );
        JwtVerifier::new(Arc::new(JwksCache::with_keys(keys)), ISSUER, audiences)
    }

    fn base_claims() -> AccessTokenClaims {
        AccessTokenClaims {
            sub: Some("u1".to_string()),
            iss: Some(ISSUER.to_string()),
            aud: Some(Value::String(AUDIENCE.to_string())),
            exp: Some(now() + 3600),
            client_id: Some("cA".to_string()),
            azp: None,
        }
    }

    fn sign(claims: &AccessTokenClaims) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(KID.to_string());
        encode(&header, claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    #[tokio::test]
    async fn valid_token_yields_principal() {
        let principal = verifier()
            .verify(&sign(&base_claims()))
            .await
            .expect("should verify");
        assert_eq!(principal.principal_key(), "u1:cA");
        assert_eq!(principal.iss.as_deref(), Some(ISSUER));
        assert_eq!(principal.aud, vec![AUDIENCE.to_string()]);
    }

    #[tokio::test]
    async fn azp_used_when_client_id_blank() {
        let mut claims = base_claims();
        claims.client_id = Some("  ".to_string());
        claims.azp = Some("cB".to_string());
        let principal = verifier().verify(&sign(&claims)).await.unwrap();
        assert_eq!(principal.principal_key(), "u1:cB");

        claims.azp = None;
        let principal = verifier().verify(&sign(&claims)).await.unwrap();
        assert_eq!(principal.principal_key(), "u1:unknown");
    }

    #[tokio::test]
    async fn missing_sub_rejected() {
        let mut claims = base_claims();
        claims.sub = None;
        let err = verifier().verify(&sign(&claims)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn tampered_token_rejected() {
        let token = sign(&base_claims());
        let len = token.len();
        let last = token.as_bytes()[len - 1];
        let replacement = if last == b'A' { b'B' } else { b'A' };
        let mut bytes = token.into_bytes();
        bytes[len - 1] = replacement;
        let token = String::from_utf8(bytes).unwrap();

        assert!(verifier().verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn wrong_issuer_rejected() {
        let mut claims = base_claims();
        claims.iss = Some("https://evil.example.com".to_string());
        assert!(verifier().verify(&sign(&claims)).await.is_err());
    }

    #[tokio::test]
    async fn wrong_audience_rejected() {
        let mut claims = base_claims();
        claims.aud = Some(serde_json::json!(["https://other.example.com"]));
        assert!(verifier().verify(&sign(&claims)).await.is_err());
    }

    #[tokio::test]
    async fn foreign_issuer_and_audience_rejected() {
        let mut claims = base_claims();
        claims.iss = Some("https://evil.example".to_string());
        claims.aud = Some(Value::String("some-other-api".to_string()));
        assert!(verifier().verify(&sign(&claims)).await.is_err());

        // Each check fails on its own.
        let mut claims = base_claims();
        claims.aud = Some(Value::String("some-other-api".to_string()));
        assert!(verifier().verify(&sign(&claims)).await.is_err());
    }

    #[tokio::test]
    async fn missing_issuer_or_audience_rejected() {
        let mut claims = base_claims();
        claims.iss = None;
        assert!(verifier().verify(&sign(&claims)).await.is_err());

        let mut claims = base_claims();
        claims.aud = None;
        assert!(verifier().verify(&sign(&claims)).await.is_err());
    }

    #[tokio::test]
    async fn empty_audience_list_accepts_nothing() {
        let result = verifier_for(Vec::new()).verify(&sign(&base_claims())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn expired_token_rejected() {
        let mut claims = base_claims();
        claims.exp = Some(now() - 3600);
        assert!(verifier().verify(&sign(&claims)).await.is_err());
    }

    #[tokio::test]
    async fn unknown_kid_rejected() {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("other".to_string());
        let token = encode(&header, &base_claims(), &EncodingKey::from_secret(SECRET)).unwrap();
        assert!(verifier().verify(&token).await.is_err());
    }
}
