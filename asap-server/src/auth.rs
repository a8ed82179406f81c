//! Authentication hook for inbound envelopes.
//!
//! When the manifest declares an auth scheme, the server requires an
//! `Authorization: Bearer <token>` header and asks the injected
//! [`CredentialValidator`] for the caller's identity. That identity must
//! equal the envelope sender.

use asap_core::{AsapError, SharedClock};
use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Why a credential was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthRejection {
    #[error("Unknown token")]
    UnknownToken,
    #[error("Token is invalid: {0}")]
    InvalidToken(String),
    #[error("Token has expired")]
    Expired,
}

/// Maps a bearer credential to an agent identity.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Return the identity (agent URN) the credential belongs to.
    async fn validate(&self, credential: &str) -> Result<String, AuthRejection>;
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AsapError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AsapError::AuthRequired {
            reason: "missing Authorization header".to_string(),
        })?
        .to_str()
        .map_err(|_| AsapError::AuthRequired {
            reason: "Authorization header is not valid ASCII".to_string(),
        })?;

    let (scheme, token) = value.split_once(' ').ok_or_else(|| AsapError::AuthRequired {
        reason: "Authorization header must be 'Bearer <token>'".to_string(),
    })?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AsapError::AuthRequired {
            reason: "Authorization header must be 'Bearer <token>'".to_string(),
        });
    }
    Ok(token)
}

/// Constant-time token comparison so mismatches leak no prefix length.
fn tokens_equal(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ============================================================================
// STATIC TOKENS
// ============================================================================

/// Fixed token → identity table.
#[derive(Default, Clone)]
pub struct StaticTokenValidator {
    tokens: HashMap<String, String>,
}

impl std::fmt::Debug for StaticTokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StaticTokenValidator([{} tokens])", self.tokens.len())
    }
}

impl StaticTokenValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), identity.into());
        self
    }
}

#[async_trait]
impl CredentialValidator for StaticTokenValidator {
    async fn validate(&self, credential: &str) -> Result<String, AuthRejection> {
        // Compare against every entry so timing does not depend on position
        let mut found = None;
        for (token, identity) in &self.tokens {
            if tokens_equal(token, credential) {
                found = Some(identity.clone());
            }
        }
        found.ok_or(AuthRejection::UnknownToken)
    }
}

// ============================================================================
// JWT
// ============================================================================

/// Type-safe JWT secret that prevents accidental logging.
#[derive(Clone)]
pub struct JwtSecret(SecretString);

impl JwtSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(SecretString::from(secret.into()))
    }

    /// Expose the secret value (use sparingly, only for cryptographic operations).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JwtSecret([REDACTED, {} chars])", self.len())
    }
}

/// JWT claims. `sub` carries the agent URN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 JWT validator; identity is the `sub` claim.
///
/// Signature checking is delegated to `jsonwebtoken`; expiry is checked
/// against the injected clock so tests stay deterministic.
#[derive(Debug, Clone)]
pub struct JwtValidator {
    secret: JwtSecret,
    leeway_secs: i64,
    clock: SharedClock,
}

impl JwtValidator {
    pub fn new(secret: JwtSecret, clock: SharedClock) -> Self {
        Self {
            secret,
            leeway_secs: 60,
            clock,
        }
    }

    pub fn with_leeway_secs(mut self, leeway_secs: i64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    /// Issue a token for `subject` valid for `ttl_secs` from the clock's now.
    pub fn issue(&self, subject: &str, ttl_secs: i64) -> Result<String, AuthRejection> {
        let now = self.clock.now().timestamp();
        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.expose().as_bytes()),
        )
        .map_err(|e| AuthRejection::InvalidToken(format!("failed to sign token: {e}")))
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, AuthRejection> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims = std::collections::HashSet::from([
            "exp".to_string(),
            "sub".to_string(),
        ]);

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.expose().as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                AuthRejection::InvalidToken("signature is invalid".to_string())
            }
            _ => AuthRejection::InvalidToken(e.to_string()),
        })?;
        Ok(data.claims)
    }
}

#[async_trait]
impl CredentialValidator for JwtValidator {
    async fn validate(&self, credential: &str) -> Result<String, AuthRejection> {
        let claims = self.decode_claims(credential)?;
        let now = self.clock.now().timestamp();
        if claims.exp < now - self.leeway_secs {
            return Err(AuthRejection::Expired);
        }
        if claims.sub.is_empty() {
            return Err(AuthRejection::InvalidToken("sub claim is empty".to_string()));
        }
        Ok(claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asap_core::ManualClock;
    use axum::http::HeaderValue;
    use std::sync::Arc;
    use std::time::Duration;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(&headers("Bearer abc")).unwrap(), "abc");
        assert_eq!(extract_bearer_token(&headers("bearer  abc ")).unwrap(), "abc");
        for bad in ["Basic abc", "Bearer", "Bearer    ", "abc"] {
            let err = extract_bearer_token(&headers(bad)).unwrap_err();
            assert_eq!(err.code(), "security/auth_required", "{bad:?}");
        }
        let err = extract_bearer_token(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.code(), "security/auth_required");
    }

    #[test]
    fn test_tokens_equal() {
        assert!(tokens_equal("secret", "secret"));
        assert!(!tokens_equal("secret", "secreT"));
        assert!(!tokens_equal("secret", "secret2"));
    }

    #[tokio::test]
    async fn test_static_validator() {
        let validator = StaticTokenValidator::new()
            .with_token("t-alice", "urn:asap:agent:alice")
            .with_token("t-bob", "urn:asap:agent:bob");
        assert_eq!(
            validator.validate("t-bob").await.unwrap(),
            "urn:asap:agent:bob"
        );
        assert_eq!(
            validator.validate("t-eve").await.unwrap_err(),
            AuthRejection::UnknownToken
        );
    }

    #[tokio::test]
    async fn test_jwt_roundtrip_and_expiry() {
        let clock = Arc::new(ManualClock::starting_now());
        let validator = JwtValidator::new(JwtSecret::new("a-test-secret-of-decent-length"), clock.clone())
            .with_leeway_secs(0);
        let token = validator.issue("urn:asap:agent:alice", 60).unwrap();
        assert_eq!(
            validator.validate(&token).await.unwrap(),
            "urn:asap:agent:alice"
        );

        clock.advance(Duration::from_secs(120));
        assert_eq!(
            validator.validate(&token).await.unwrap_err(),
            AuthRejection::Expired
        );
    }

    #[tokio::test]
    async fn test_jwt_wrong_secret_rejected() {
        let clock = Arc::new(ManualClock::starting_now());
        let issuer = JwtValidator::new(JwtSecret::new("issuer-secret"), clock.clone());
        let verifier = JwtValidator::new(JwtSecret::new("verifier-secret"), clock);
        let token = issuer.issue("urn:asap:agent:alice", 60).unwrap();
        assert!(matches!(
            verifier.validate(&token).await,
            Err(AuthRejection::InvalidToken(_))
        ));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = JwtSecret::new("super-secret");
        let debug = format!("{secret:?}");
        assert!(!debug.contains("super-secret"));
    }
}
