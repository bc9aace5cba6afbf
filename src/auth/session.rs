//! Session tokens
//!
//! Access tokens are stateless apart from the revocation list. Refresh
//! tokens are single use: the identity keeps only their SHA-256 hashes and
//! rotation removes the presented hash before anything new is minted.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::models::{Identity, UserRole, MAX_REFRESH_TOKENS};
use crate::store::{IdentityStore, KvStore, StoreError};

use super::crypto::hash_token;
use super::jwt::{generate_token, verify_token, Claims, JwtError, TokenType};

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Token has been revoked")]
    Revoked,

    #[error("{0}")]
    Forbidden(String),

    #[error("Token signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<JwtError> for SessionError {
    fn from(e: JwtError) -> Self {
        match e {
            JwtError::TokenExpired => SessionError::TokenExpired,
            JwtError::EncodingFailed(msg) => SessionError::Signing(msg),
            other => SessionError::InvalidToken(other.to_string()),
        }
    }
}

/// Signing secrets and lifetimes
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_days: i64,
}

impl SessionConfig {
    fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_days * 24 * 60 * 60
    }
}

/// A freshly minted access/refresh pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

fn blacklist_key(token: &str) -> String {
    format!("blacklist:{}", token)
}

/// Issues, rotates and revokes session tokens
pub struct SessionService {
    identities: Arc<dyn IdentityStore>,
    kv: Arc<dyn KvStore>,
    config: SessionConfig,
}

impl SessionService {
    pub fn new(identities: Arc<dyn IdentityStore>, kv: Arc<dyn KvStore>, config: SessionConfig) -> Self {
        Self {
            identities,
            kv,
            config,
        }
    }

    pub fn access_ttl_seconds(&self) -> i64 {
        self.config.access_ttl_seconds
    }

    pub fn issue_access_token(&self, identity_id: Uuid, role: UserRole) -> Result<String, SessionError> {
        Ok(generate_token(
            identity_id,
            role,
            &self.config.access_secret,
            self.config.access_ttl_seconds,
            TokenType::Access,
        )?)
    }

    /// Mint a refresh token. The caller must store its hash.
    pub fn issue_refresh_token(&self, identity_id: Uuid, role: UserRole) -> Result<String, SessionError> {
        Ok(generate_token(
            identity_id,
            role,
            &self.config.refresh_secret,
            self.config.refresh_ttl_seconds(),
            TokenType::Refresh,
        )?)
    }

    /// Mint a pair and record the refresh hash on the identity
    pub async fn issue_pair(&self, identity: &Identity) -> Result<TokenPair, SessionError> {
        let access_token = self.issue_access_token(identity.id, identity.role)?;
        let refresh_token = self.issue_refresh_token(identity.id, identity.role)?;
        self.identities
            .push_refresh_hash(identity.id, &hash_token(&refresh_token), MAX_REFRESH_TOKENS)
            .await?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.config.access_ttl_seconds,
        })
    }

    /// Exchange a refresh token for a new pair. Each refresh token works once.
    pub async fn rotate(&self, refresh_token: &str) -> Result<TokenPair, SessionError> {
        let claims = verify_token(refresh_token, &self.config.refresh_secret, TokenType::Refresh)
            .map_err(|e| SessionError::InvalidToken(e.to_string()))?;
        let identity_id = claims.identity_id()?;

        let removed = self
            .identities
            .take_refresh_hash(identity_id, &hash_token(refresh_token))
            .await
            .map_err(|e| match e {
                StoreError::NotFound => SessionError::InvalidToken("unknown identity".to_string()),
                other => SessionError::Store(other),
            })?;
        if !removed {
            tracing::warn!(identity_id = %identity_id, "Refresh token reuse or unknown token");
            return Err(SessionError::InvalidToken(
                "refresh token is not active".to_string(),
            ));
        }

        let identity = self
            .identities
            .find_by_id(identity_id)
            .await?
            .ok_or_else(|| SessionError::InvalidToken("unknown identity".to_string()))?;

        let pair = self.issue_pair(&identity).await?;
        tracing::debug!(identity_id = %identity_id, "Refresh token rotated");
        Ok(pair)
    }

    /// Verify an access token: signature, expiry, type, then revocation
    pub async fn verify_access(&self, token: &str) -> Result<Claims, SessionError> {
        let claims = verify_token(token, &self.config.access_secret, TokenType::Access)?;
        if self.kv.exists(&blacklist_key(token)).await? {
            return Err(SessionError::Revoked);
        }
        Ok(claims)
    }

    /// Blacklist an access token for the rest of its lifetime
    pub async fn revoke(&self, access_token: &str) -> Result<(), SessionError> {
        let claims = match verify_token(access_token, &self.config.access_secret, TokenType::Access) {
            Ok(claims) => claims,
            Err(JwtError::TokenExpired) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let remaining = claims.remaining_seconds();
        if remaining > 0 {
            self.kv
                .set(&blacklist_key(access_token), "1", Duration::from_secs(remaining))
                .await?;
        }
        Ok(())
    }

    /// Revoke the access token and drop the presented refresh token
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> Result<(), SessionError> {
        let claims = self.verify_access(access_token).await?;
        let identity_id = claims.identity_id()?;

        if let Some(refresh_token) = refresh_token {
            let refresh_claims =
                verify_token(refresh_token, &self.config.refresh_secret, TokenType::Refresh)
                    .map_err(|e| SessionError::InvalidToken(e.to_string()))?;
            if refresh_claims.identity_id()? != identity_id {
                return Err(SessionError::Forbidden(
                    "Refresh token belongs to another identity".to_string(),
                ));
            }
            self.identities
                .take_refresh_hash(identity_id, &hash_token(refresh_token))
                .await?;
        }

        self.revoke(access_token).await?;
        tracing::info!(identity_id = %identity_id, "Logged out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::FieldCipher;
    use crate::models::Profile;
    use crate::store::{MemoryKvStore, MemoryStore};
    use chrono::Utc;

    fn config() -> SessionConfig {
        SessionConfig {
            access_secret: "access-secret".to_string(),
            refresh_secret: "refresh-secret".to_string(),
            access_ttl_seconds: 900,
            refresh_ttl_days: 7,
        }
    }

    async fn setup() -> (SessionService, Arc<MemoryStore>, Identity) {
        let store = Arc::new(MemoryStore::new());
        let cipher = FieldCipher::from_hex_key(&"22".repeat(32)).unwrap();
        let identity =
            Identity::register("254712345678", "a@b.co", "12345678", UserRole::Buyer, &cipher).unwrap();
        let profile = Profile {
            id: Uuid::new_v4(),
            identity_id: identity.id,
            full_names: "A B".to_string(),
            longitude: None,
            latitude: None,
            address: None,
            farm_name: None,
            business_name: None,
            vehicle_type: None,
            created_at: Utc::now(),
        };
        store.create_with_profile(&identity, &profile).await.unwrap();
        let service = SessionService::new(store.clone(), Arc::new(MemoryKvStore::new()), config());
        (service, store, identity)
    }

    #[tokio::test]
    async fn test_issue_pair_stores_only_hash() {
        let (service, store, identity) = setup().await;
        let pair = service.issue_pair(&identity).await.unwrap();

        let stored = store.find_by_id(identity.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_tokens, vec![hash_token(&pair.refresh_token)]);
        assert!(!stored.refresh_tokens.contains(&pair.refresh_token));

        let claims = service.verify_access(&pair.access_token).await.unwrap();
        assert_eq!(claims.identity_id().unwrap(), identity.id);
        assert_eq!(pair.expires_in, 900);
    }

    #[tokio::test]
    async fn test_rotate_is_single_use() {
        let (service, _, identity) = setup().await;
        let pair = service.issue_pair(&identity).await.unwrap();

        let rotated = service.rotate(&pair.refresh_token).await.unwrap();
        assert_ne!(rotated.refresh_token, pair.refresh_token);
        assert!(matches!(
            service.rotate(&pair.refresh_token).await,
            Err(SessionError::InvalidToken(_))
        ));
        service.rotate(&rotated.refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn test_access_token_is_not_a_refresh_token() {
        let (service, _, identity) = setup().await;
        let pair = service.issue_pair(&identity).await.unwrap();
        assert!(matches!(
            service.rotate(&pair.access_token).await,
            Err(SessionError::InvalidToken(_))
        ));
        assert!(service.verify_access(&pair.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn test_logout_revokes_access_and_refresh() {
        let (service, store, identity) = setup().await;
        let pair = service.issue_pair(&identity).await.unwrap();

        service
            .logout(&pair.access_token, Some(&pair.refresh_token))
            .await
            .unwrap();

        assert!(matches!(
            service.verify_access(&pair.access_token).await,
            Err(SessionError::Revoked)
        ));
        assert!(store
            .find_by_id(identity.id)
            .await
            .unwrap()
            .unwrap()
            .refresh_tokens
            .is_empty());
        assert!(service.rotate(&pair.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn test_logout_rejects_foreign_refresh_token() {
        let (service, _, identity) = setup().await;
        let pair = service.issue_pair(&identity).await.unwrap();
        let foreign = service
            .issue_refresh_token(Uuid::new_v4(), UserRole::Buyer)
            .unwrap();

        assert!(matches!(
            service.logout(&pair.access_token, Some(&foreign)).await,
            Err(SessionError::Forbidden(_))
        ));
        service.verify_access(&pair.access_token).await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_list_is_capped() {
        let (service, store, identity) = setup().await;
        let mut tokens = Vec::new();
        for _ in 0..(MAX_REFRESH_TOKENS + 2) {
            tokens.push(service.issue_pair(&identity).await.unwrap().refresh_token);
        }
        let stored = store.find_by_id(identity.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_tokens.len(), MAX_REFRESH_TOKENS);
        assert!(service.rotate(&tokens[0]).await.is_err());
        service.rotate(tokens.last().unwrap()).await.unwrap();
    }
}
