//! Token handlers: the closed set of ways a bearer token becomes an [`Identity`].
//!
//! - [`JwtTokenHandler`]: stateless HS256 tokens (`jsonwebtoken`).
//! - [`SessionTokenHandler`]: opaque random tokens looked up in a
//!   [`KeyValueStore`]. Only a SHA-256 digest of the token is stored.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use gantry_core::{DispatchError, Identity};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::store::KeyValueStore;

/// Token verification and issuance failures.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("token rejected: {0}")]
    Rejected(String),

    #[error("failed to issue token: {0}")]
    Issue(String),

    #[error("token store unavailable: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl From<TokenError> for DispatchError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Store(source) => DispatchError::Internal(source),
            TokenError::Issue(msg) => DispatchError::Internal(anyhow::anyhow!(msg)),
            other => DispatchError::InvalidToken(other.to_string()),
        }
    }
}

/// Token handler chosen once at startup.
#[derive(Debug, Clone)]
pub enum TokenHandler {
    Jwt(JwtTokenHandler),
    Session(SessionTokenHandler),
}

impl TokenHandler {
    /// Resolves `token` into the identity it was issued for.
    ///
    /// # Errors
    ///
    /// Returns `TokenError` when the token is malformed, expired, forged,
    /// unknown, or the session store fails.
    pub async fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        match self {
            Self::Jwt(handler) => handler.verify(token),
            Self::Session(handler) => handler.verify(token).await,
        }
    }

    /// Issues a new token for `identity`.
    ///
    /// # Errors
    ///
    /// Returns `TokenError` when encoding or persisting the token fails.
    pub async fn issue(&self, identity: &Identity) -> Result<String, TokenError> {
        match self {
            Self::Jwt(handler) => handler.issue(identity),
            Self::Session(handler) => handler.issue(identity).await,
        }
    }

    /// Invalidates `token`. JWTs cannot be revoked and are left to expire.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Store` if the session store fails.
    pub async fn revoke(&self, token: &str) -> Result<bool, TokenError> {
        match self {
            Self::Jwt(_) => Ok(false),
            Self::Session(handler) => handler.revoke(token).await,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Jwt(_) => "jwt",
            Self::Session(_) => "session",
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

// ---------------------------------------------------------------------------
// JWT
// ---------------------------------------------------------------------------

/// Registered claims plus whatever the identity carries.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iss: String,
    iat: u64,
    exp: u64,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

const RESERVED_CLAIMS: [&str; 5] = ["sub", "iss", "iat", "exp", "nbf"];

/// HS256 JWT validator and issuer.
#[derive(Clone)]
pub struct JwtTokenHandler {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl JwtTokenHandler {
    pub fn new(secret: &str, issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            ttl,
        }
    }

    fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                JwtErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Rejected(e.to_string()),
            }
        })?;

        Ok(Identity {
            subject: data.claims.sub,
            claims: data.claims.extra,
        })
    }

    fn issue(&self, identity: &Identity) -> Result<String, TokenError> {
        let now = unix_now();
        let mut extra = identity.claims.clone();
        for reserved in RESERVED_CLAIMS {
            extra.remove(reserved);
        }
        let claims = Claims {
            sub: identity.subject.clone(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.ttl.as_secs(),
            extra,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Issue(e.to_string()))
    }
}

impl fmt::Debug for JwtTokenHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtTokenHandler")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Store-backed opaque session tokens.
#[derive(Clone)]
pub struct SessionTokenHandler {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl SessionTokenHandler {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(token: &str) -> String {
        format!("session:{}", hex::encode(Sha256::digest(token.as_bytes())))
    }

    async fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        let stored = self
            .store
            .get(&Self::key(token))
            .await?
            .ok_or_else(|| TokenError::Rejected("unknown or expired session".to_string()))?;
        serde_json::from_str(&stored)
            .map_err(|e| TokenError::Rejected(format!("corrupt session record: {e}")))
    }

    async fn issue(&self, identity: &Identity) -> Result<String, TokenError> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let record =
            serde_json::to_string(identity).map_err(|e| TokenError::Issue(e.to_string()))?;
        self.store
            .set(&Self::key(&token), record, Some(self.ttl))
            .await?;
        Ok(token)
    }

    async fn revoke(&self, token: &str) -> Result<bool, TokenError> {
        Ok(self.store.delete(&Self::key(token)).await?)
    }
}

impl fmt::Debug for SessionTokenHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokenHandler")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    fn jwt() -> TokenHandler {
        TokenHandler::Jwt(JwtTokenHandler::new(
            "jwt-secret",
            "gantry",
            Duration::from_secs(3600),
        ))
    }

    fn session() -> (TokenHandler, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let handler = TokenHandler::Session(SessionTokenHandler::new(
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
            Duration::from_secs(60),
        ));
        (handler, store)
    }

    #[tokio::test]
    async fn jwt_round_trip_keeps_claims() {
        let handler = jwt();
        let identity = Identity::new("ada").with_claim("role", json!("admin"));
        let token = handler.issue(&identity).await.unwrap();
        let verified = handler.verify(&token).await.unwrap();
        assert_eq!(verified.subject, "ada");
        assert_eq!(verified.claims.get("role"), Some(&json!("admin")));
    }

    #[tokio::test]
    async fn jwt_reserved_claims_cannot_be_overridden() {
        let handler = jwt();
        let identity = Identity::new("ada").with_claim("exp", json!(1));
        let token = handler.issue(&identity).await.unwrap();
        assert!(handler.verify(&token).await.is_ok());
    }

    #[tokio::test]
    async fn jwt_from_other_secret_is_rejected() {
        let other = JwtTokenHandler::new("other", "gantry", Duration::from_secs(60));
        let token = other.issue(&Identity::new("eve")).unwrap();
        let err = jwt().verify(&token).await.unwrap_err();
        assert!(matches!(err, TokenError::Rejected(_)));
    }

    #[tokio::test]
    async fn jwt_wrong_issuer_is_rejected() {
        let other = JwtTokenHandler::new("jwt-secret", "someone-else", Duration::from_secs(60));
        let token = other.issue(&Identity::new("eve")).unwrap();
        assert!(jwt().verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn jwt_expired_token_reports_expiry() {
        let claims = Claims {
            sub: "ada".into(),
            iss: "gantry".into(),
            iat: 1,
            exp: unix_now() - 3600,
            extra: Map::new(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"jwt-secret"),
        )
        .unwrap();
        let err = jwt().verify(&token).await.unwrap_err();
        assert!(matches!(err, TokenError::Expired));
        let dispatch: DispatchError = err.into();
        assert_eq!(dispatch.code(), 4011);
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        assert!(jwt().verify("not.a.jwt").await.is_err());
        let (handler, _) = session();
        assert!(handler.verify("nope").await.is_err());
    }

    #[tokio::test]
    async fn session_issue_verify_revoke() {
        let (handler, store) = session();
        let token = handler.issue(&Identity::new("ada")).await.unwrap();
        assert_eq!(store.len(), 1);

        assert_eq!(handler.verify(&token).await.unwrap().subject, "ada");
        assert!(handler.revoke(&token).await.unwrap());
        assert!(handler.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn session_store_never_holds_raw_token() {
        let (handler, store) = session();
        let token = handler.issue(&Identity::new("ada")).await.unwrap();
        assert_eq!(store.get(&format!("session:{token}")).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn session_expires_with_ttl() {
        let (handler, _) = session();
        let token = handler.issue(&Identity::new("ada")).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(handler.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn jwt_revoke_is_a_no_op() {
        assert!(!jwt().revoke("anything").await.unwrap());
        assert_eq!(jwt().kind(), "jwt");
    }
}
