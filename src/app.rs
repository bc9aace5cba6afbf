//! Service wiring
//!
//! Builds every service from configuration and a set of collaborators, so
//! the binary and the integration tests assemble the same graph.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::auth::{AuthService, CryptoError, FieldCipher, OtpManager, OtpPolicy, SessionConfig, SessionService};
use crate::authz::AuthorizationFacade;
use crate::config::Config;
use crate::escrow::{SettlementEngine, SettlementPolicy};
use crate::gateway::{
    DocumentStorage, FsDocumentStorage, HttpNotificationSender, InMemoryDocumentStorage,
    LogNotificationSender, NotificationSender, PaymentGateway,
};
use crate::kyc::VerificationService;
use crate::state::AppState;
use crate::store::{IdentityStore, KvStore, KycStore, MemoryKvStore, MemoryStore, PgStore, SettlementStore};

/// Stores and external collaborators the services run against
#[derive(Clone)]
pub struct Collaborators {
    pub identities: Arc<dyn IdentityStore>,
    pub documents: Arc<dyn KycStore>,
    pub settlement: Arc<dyn SettlementStore>,
    pub kv: Arc<dyn KvStore>,
    pub notifier: Arc<dyn NotificationSender>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub storage: Arc<dyn DocumentStorage>,
    pub db: Option<PgPool>,
}

impl Collaborators {
    /// Everything in process: memory stores, simulated gateway
    pub fn in_memory(notifier: Arc<dyn NotificationSender>, gateway: Arc<dyn PaymentGateway>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            identities: store.clone(),
            documents: store.clone(),
            settlement: store,
            kv: Arc::new(MemoryKvStore::new()),
            notifier,
            gateway,
            storage: Arc::new(InMemoryDocumentStorage::new()),
            db: None,
        }
    }

    /// Postgres-backed stores. The TTL store stays in process.
    pub fn postgres(pool: PgPool, notifier: Arc<dyn NotificationSender>, gateway: Arc<dyn PaymentGateway>) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));
        Self {
            identities: store.clone(),
            documents: store.clone(),
            settlement: store,
            kv: Arc::new(MemoryKvStore::new()),
            notifier,
            gateway,
            storage: Arc::new(InMemoryDocumentStorage::new()),
            db: Some(pool),
        }
    }

    /// Replace the document image store
    pub fn with_storage(mut self, storage: Arc<dyn DocumentStorage>) -> Self {
        self.storage = storage;
        self
    }
}

/// Document image store selected by configuration
pub fn storage_from_config(config: &Config) -> Arc<dyn DocumentStorage> {
    match &config.document_storage_dir {
        Some(dir) => {
            tracing::info!(dir = %dir, "KYC documents stored on disk");
            Arc::new(FsDocumentStorage::new(dir))
        }
        None => {
            tracing::warn!("DOCUMENT_STORAGE_DIR not set, KYC documents are kept in memory");
            Arc::new(InMemoryDocumentStorage::new())
        }
    }
}

/// SMS sender selected by configuration
pub fn notifier_from_config(config: &Config) -> Arc<dyn NotificationSender> {
    match &config.notify_relay_url {
        Some(url) => Arc::new(HttpNotificationSender::new(url.clone(), config.gateway_timeout())),
        None => {
            tracing::warn!("NOTIFY_RELAY_URL not set, SMS messages are only logged");
            Arc::new(LogNotificationSender)
        }
    }
}

/// Build the shared application state
pub fn build_state(config: &Config, collaborators: &Collaborators) -> Result<AppState, CryptoError> {
    let cipher = FieldCipher::from_hex_key(&config.encryption_key)?;
    let io_timeout = config.gateway_timeout();

    let otp = Arc::new(OtpManager::new(
        collaborators.kv.clone(),
        collaborators.notifier.clone(),
        OtpPolicy {
            ttl: Duration::from_secs(config.otp_ttl_seconds),
            max_attempts: config.otp_max_attempts,
            window: Duration::from_secs(config.otp_window_seconds),
            send_timeout: io_timeout,
        },
    ));

    let sessions = Arc::new(SessionService::new(
        collaborators.identities.clone(),
        collaborators.kv.clone(),
        SessionConfig {
            access_secret: config.jwt_access_secret.clone(),
            refresh_secret: config.jwt_refresh_secret.clone(),
            access_ttl_seconds: config.jwt_access_token_ttl_seconds,
            refresh_ttl_days: config.jwt_refresh_token_ttl_days,
        },
    ));

    let auth_service = Arc::new(AuthService::new(
        collaborators.identities.clone(),
        otp,
        sessions.clone(),
        cipher.clone(),
        config.otp_echo_in_response,
        config.admin_phones.clone(),
    ));

    let verification_service = Arc::new(VerificationService::new(
        collaborators.identities.clone(),
        collaborators.documents.clone(),
        collaborators.storage.clone(),
        collaborators.notifier.clone(),
        cipher,
        io_timeout,
    ));

    let authz = Arc::new(AuthorizationFacade::new(
        sessions,
        verification_service.clone(),
        collaborators.identities.clone(),
    ));

    let settlement_engine = Arc::new(SettlementEngine::new(
        collaborators.identities.clone(),
        collaborators.settlement.clone(),
        collaborators.gateway.clone(),
        collaborators.notifier.clone(),
        authz.clone(),
        SettlementPolicy {
            gateway_timeout: io_timeout,
            collection_in_flight: Duration::from_secs(config.collection_in_flight_seconds),
            notify_timeout: io_timeout,
        },
    ));

    Ok(AppState::new(
        auth_service,
        verification_service,
        settlement_engine,
        authz,
        collaborators.db.clone(),
        config.environment.as_str(),
    ))
}
