//! Authorization facade
//!
//! One place that answers "is this caller allowed to do this now". It
//! composes access-token verification with the KYC-derived
//! `can_transact` predicate and role checks.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::auth::{SessionError, SessionService};
use crate::kyc::{KycError, VerificationService};
use crate::models::{AccountStatus, UserRole};
use crate::store::{IdentityStore, StoreError};

/// Authorization errors
#[derive(Error, Debug)]
pub enum AuthzError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("Token has been revoked")]
    Revoked,

    #[error("{0}")]
    Forbidden(String),

    #[error("Identity is not cleared to transact")]
    CannotTransact,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SessionError> for AuthzError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Revoked => AuthzError::Revoked,
            SessionError::Store(e) => AuthzError::Store(e),
            other => AuthzError::Unauthenticated(other.to_string()),
        }
    }
}

impl From<KycError> for AuthzError {
    fn from(e: KycError) -> Self {
        match e {
            KycError::Store(e) => AuthzError::Store(e),
            KycError::IdentityNotFound => {
                AuthzError::Unauthenticated("Identity not found".to_string())
            }
            other => AuthzError::Forbidden(other.to_string()),
        }
    }
}

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub identity_id: Uuid,
    pub role: UserRole,
    /// Raw access token, kept for logout
    pub access_token: String,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Operations that need an authorization decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    OpenOrder,
    InitiateCollection,
    ReviewKyc,
    ReleaseEscrow,
}

impl Action {
    fn moves_money(&self) -> bool {
        matches!(self, Action::OpenOrder | Action::InitiateCollection)
    }

    fn admin_only(&self) -> bool {
        matches!(self, Action::ReviewKyc | Action::ReleaseEscrow)
    }
}

/// Composes the session service and the verification workflow
pub struct AuthorizationFacade {
    sessions: Arc<SessionService>,
    verification: Arc<VerificationService>,
    identities: Arc<dyn IdentityStore>,
}

impl AuthorizationFacade {
    pub fn new(
        sessions: Arc<SessionService>,
        verification: Arc<VerificationService>,
        identities: Arc<dyn IdentityStore>,
    ) -> Self {
        Self {
            sessions,
            verification,
            identities,
        }
    }

    /// Resolve a bearer token to a principal. The role comes from the
    /// current identity record, not the token.
    pub async fn authenticate(&self, access_token: &str) -> Result<Principal, AuthzError> {
        let claims = self.sessions.verify_access(access_token).await?;
        let identity_id = claims
            .identity_id()
            .map_err(|e| AuthzError::Unauthenticated(e.to_string()))?;

        let identity = self
            .identities
            .find_by_id(identity_id)
            .await?
            .ok_or_else(|| AuthzError::Unauthenticated("Identity not found".to_string()))?;

        if matches!(identity.status, AccountStatus::Suspended | AccountStatus::Banned) {
            return Err(AuthzError::Forbidden("Account is disabled".to_string()));
        }

        Ok(Principal {
            identity_id,
            role: identity.role,
            access_token: access_token.to_string(),
        })
    }

    /// The money-movement gate
    pub async fn can_transact(&self, identity_id: Uuid) -> Result<bool, AuthzError> {
        Ok(self.verification.can_transact(identity_id).await?)
    }

    /// Fail with `CannotTransact` unless the identity passes the gate
    pub async fn ensure_can_transact(&self, identity_id: Uuid) -> Result<(), AuthzError> {
        if self.can_transact(identity_id).await? {
            Ok(())
        } else {
            tracing::info!(identity_id = %identity_id, "Blocked by transact gate");
            Err(AuthzError::CannotTransact)
        }
    }

    /// Decide whether `principal` may perform `action` now
    pub async fn authorize(&self, principal: &Principal, action: Action) -> Result<(), AuthzError> {
        if action.admin_only() && !principal.is_admin() {
            return Err(AuthzError::Forbidden("Admin access required".to_string()));
        }
        if action.moves_money() {
            self.ensure_can_transact(principal.identity_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{FieldCipher, SessionConfig};
    use crate::gateway::{InMemoryDocumentStorage, LogNotificationSender};
    use crate::models::{Identity, KycStatus, Profile, VerificationUpdate};
    use crate::store::{MemoryKvStore, MemoryStore};
    use chrono::Utc;
    use std::time::Duration;

    struct Fixture {
        facade: AuthorizationFacade,
        sessions: Arc<SessionService>,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let kv = Arc::new(MemoryKvStore::new());
        let cipher = FieldCipher::from_hex_key(&"55".repeat(32)).unwrap();
        let sessions = Arc::new(SessionService::new(
            store.clone(),
            kv,
            SessionConfig {
                access_secret: "a".to_string(),
                refresh_secret: "r".to_string(),
                access_ttl_seconds: 900,
                refresh_ttl_days: 7,
            },
        ));
        let verification = Arc::new(VerificationService::new(
            store.clone(),
            store.clone(),
            Arc::new(InMemoryDocumentStorage::new()),
            Arc::new(LogNotificationSender),
            cipher,
            Duration::from_secs(5),
        ));
        Fixture {
            facade: AuthorizationFacade::new(sessions.clone(), verification, store.clone()),
            sessions,
            store,
        }
    }

    async fn add(store: &MemoryStore, role: UserRole) -> Identity {
        let cipher = FieldCipher::from_hex_key(&"55".repeat(32)).unwrap();
        let phone = format!("2547{:08}", rand::random::<u32>() % 100_000_000);
        let identity = Identity::register(&phone, &format!("{}@x.co", phone), &phone, role, &cipher).unwrap();
        let profile = Profile {
            id: Uuid::new_v4(),
            identity_id: identity.id,
            full_names: "T".to_string(),
            longitude: None,
            latitude: None,
            address: None,
            farm_name: None,
            business_name: None,
            vehicle_type: None,
            created_at: Utc::now(),
        };
        store.create_with_profile(&identity, &profile).await.unwrap();
        identity
    }

    #[tokio::test]
    async fn test_authenticate_and_revoke() {
        let f = fixture();
        let identity = add(&f.store, UserRole::Buyer).await;
        let pair = f.sessions.issue_pair(&identity).await.unwrap();

        let principal = f.facade.authenticate(&pair.access_token).await.unwrap();
        assert_eq!(principal.identity_id, identity.id);
        assert_eq!(principal.role, UserRole::Buyer);

        f.sessions.revoke(&pair.access_token).await.unwrap();
        assert!(matches!(
            f.facade.authenticate(&pair.access_token).await,
            Err(AuthzError::Revoked)
        ));
        assert!(matches!(
            f.facade.authenticate("garbage").await,
            Err(AuthzError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn test_suspended_identity_is_refused() {
        let f = fixture();
        let identity = add(&f.store, UserRole::Buyer).await;
        let pair = f.sessions.issue_pair(&identity).await.unwrap();
        f.store
            .update_verification(
                identity.id,
                &VerificationUpdate {
                    kyc_status: KycStatus::KycVerified,
                    status: AccountStatus::Suspended,
                    kyc_rejection_reason: None,
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            f.facade.authenticate(&pair.access_token).await,
            Err(AuthzError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_money_actions_require_transact_gate() {
        let f = fixture();
        let identity = add(&f.store, UserRole::Buyer).await;
        let pair = f.sessions.issue_pair(&identity).await.unwrap();
        let principal = f.facade.authenticate(&pair.access_token).await.unwrap();

        assert!(matches!(
            f.facade.authorize(&principal, Action::OpenOrder).await,
            Err(AuthzError::CannotTransact)
        ));

        f.store
            .update_verification(
                identity.id,
                &VerificationUpdate {
                    kyc_status: KycStatus::KycVerified,
                    status: AccountStatus::Active,
                    kyc_rejection_reason: None,
                },
            )
            .await
            .unwrap();
        f.facade.authorize(&principal, Action::OpenOrder).await.unwrap();
        assert!(matches!(
            f.facade.authorize(&principal, Action::ReleaseEscrow).await,
            Err(AuthzError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_actions() {
        let f = fixture();
        let admin = add(&f.store, UserRole::Admin).await;
        let pair = f.sessions.issue_pair(&admin).await.unwrap();
        let principal = f.facade.authenticate(&pair.access_token).await.unwrap();
        assert!(principal.is_admin());
        f.facade.authorize(&principal, Action::ReviewKyc).await.unwrap();
        f.facade.authorize(&principal, Action::ReleaseEscrow).await.unwrap();
    }
}
