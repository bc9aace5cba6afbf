//! Authentication service
//!
//! Phone-OTP registration and login on top of the OTP manager and the
//! session service.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::gateway::mask_phone;
use crate::models::{
    AccountStatus, AuthTokensResponse, Identity, IdentityResponse, MeResponse, OtpIssuedResponse,
    Profile, ProfileResponse, RefreshTokenResponse, RegisterCompleteRequest, UserRole,
};
use crate::store::{IdentityStore, StoreError};

use super::crypto::{hash_national_id, CryptoError, FieldCipher};
use super::otp::{OtpError, OtpManager, OtpPurpose};
use super::session::{SessionError, SessionService, TokenPair};

/// Auth service errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{0} is already registered")]
    AlreadyRegistered(&'static str),

    #[error("Identity not found")]
    IdentityNotFound,

    #[error("Account is {0}")]
    AccountDisabled(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Otp(#[from] OtpError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(constraint) if constraint.contains("phone") => {
                AuthError::AlreadyRegistered("Phone number")
            }
            StoreError::Conflict(constraint) if constraint.contains("email") => {
                AuthError::AlreadyRegistered("Email")
            }
            StoreError::Conflict(constraint) if constraint.contains("national_id") => {
                AuthError::AlreadyRegistered("National ID")
            }
            other => AuthError::Store(other),
        }
    }
}

const OTP_SENT: &str = "OTP sent successfully";

/// Authentication service
pub struct AuthService {
    identities: Arc<dyn IdentityStore>,
    otp: Arc<OtpManager>,
    sessions: Arc<SessionService>,
    cipher: FieldCipher,
    echo_otp: bool,
    admin_phones: Vec<String>,
}

impl AuthService {
    /// Create a new AuthService
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        otp: Arc<OtpManager>,
        sessions: Arc<SessionService>,
        cipher: FieldCipher,
        echo_otp: bool,
        admin_phones: Vec<String>,
    ) -> Self {
        Self {
            identities,
            otp,
            sessions,
            cipher,
            echo_otp,
            admin_phones,
        }
    }

    fn issued_response(&self, code: Option<String>) -> OtpIssuedResponse {
        OtpIssuedResponse {
            success: true,
            message: OTP_SENT.to_string(),
            expires_in: self.otp.ttl_seconds(),
            otp: code.filter(|_| self.echo_otp),
        }
    }

    /// Start registration by sending an OTP.
    ///
    /// An already verified phone gets the same response but no code.
    pub async fn register_init(&self, phone: &str) -> Result<OtpIssuedResponse, AuthError> {
        let existing = self.identities.find_by_phone(phone).await?;
        if existing.map(|i| i.is_phone_verified).unwrap_or(false) {
            self.otp.count_attempt(phone).await?;
            tracing::info!(phone = %mask_phone(phone), "Registration requested for a registered phone");
            return Ok(self.issued_response(None));
        }

        let issued = self.otp.issue(OtpPurpose::Register, phone).await?;
        tracing::info!(phone = %mask_phone(phone), "Registration OTP sent");
        Ok(self.issued_response(Some(issued.code)))
    }

    /// Finish registration: verify the OTP, create identity and profile
    /// together, and sign the new identity in.
    ///
    /// The code is only consumed once every other check passed, and the
    /// identity is only created by the request that consumed it.
    pub async fn register_complete(
        &self,
        request: RegisterCompleteRequest,
    ) -> Result<AuthTokensResponse, AuthError> {
        self.otp
            .check(OtpPurpose::Register, &request.phone, &request.otp)
            .await?;

        if request.role == UserRole::Admin && !self.admin_phones.contains(&request.phone) {
            return Err(AuthError::Forbidden(
                "Admin accounts cannot be self-registered".to_string(),
            ));
        }

        if self.identities.find_by_phone(&request.phone).await?.is_some() {
            return Err(AuthError::AlreadyRegistered("Phone number"));
        }
        if self.identities.find_by_email(&request.email).await?.is_some() {
            return Err(AuthError::AlreadyRegistered("Email"));
        }
        if self
            .identities
            .find_by_national_id_hash(&hash_national_id(&request.national_id))
            .await?
            .is_some()
        {
            return Err(AuthError::AlreadyRegistered("National ID"));
        }

        let identity = Identity::register(
            &request.phone,
            &request.email,
            &request.national_id,
            request.role,
            &self.cipher,
        )?;
        let profile = build_profile(&identity, &request);

        self.otp
            .validate(OtpPurpose::Register, &request.phone, &request.otp)
            .await?;
        self.identities.create_with_profile(&identity, &profile).await?;

        self.identities.record_login(identity.id).await?;
        let identity = self.load(identity.id).await?;
        let pair = self.sessions.issue_pair(&identity).await?;

        tracing::info!(identity_id = %identity.id, role = identity.role.as_str(), "Identity registered");
        Ok(tokens_response(pair, &identity, Some(&profile)))
    }

    /// Start login by sending an OTP.
    ///
    /// Unknown or unverified phones get the same response but no code.
    pub async fn login_init(&self, phone: &str) -> Result<OtpIssuedResponse, AuthError> {
        let known = self
            .identities
            .find_by_phone(phone)
            .await?
            .map(|i| i.is_phone_verified)
            .unwrap_or(false);
        if !known {
            self.otp.count_attempt(phone).await?;
            tracing::info!(phone = %mask_phone(phone), "Login requested for an unknown phone");
            return Ok(self.issued_response(None));
        }

        let issued = self.otp.issue(OtpPurpose::Login, phone).await?;
        tracing::info!(phone = %mask_phone(phone), "Login OTP sent");
        Ok(self.issued_response(Some(issued.code)))
    }

    /// Verify a login OTP and issue a session
    pub async fn login_verify(&self, phone: &str, code: &str) -> Result<AuthTokensResponse, AuthError> {
        self.otp.validate(OtpPurpose::Login, phone, code).await?;

        let identity = self
            .identities
            .find_by_phone(phone)
            .await?
            .ok_or(AuthError::IdentityNotFound)?;
        match identity.status {
            AccountStatus::Suspended => return Err(AuthError::AccountDisabled("suspended")),
            AccountStatus::Banned => return Err(AuthError::AccountDisabled("banned")),
            AccountStatus::PendingVerification | AccountStatus::Active => {}
        }

        self.identities.record_login(identity.id).await?;
        let identity = self.load(identity.id).await?;
        let profile = self.identities.find_profile(identity.id).await?;
        let pair = self.sessions.issue_pair(&identity).await?;

        tracing::info!(identity_id = %identity.id, "Login successful");
        Ok(tokens_response(pair, &identity, profile.as_ref()))
    }

    /// Rotate a refresh token
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshTokenResponse, AuthError> {
        let pair = self.sessions.rotate(refresh_token).await?;
        Ok(RefreshTokenResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: pair.expires_in,
        })
    }

    /// Revoke the current access token and optionally one refresh token
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> Result<(), AuthError> {
        Ok(self.sessions.logout(access_token, refresh_token).await?)
    }

    /// Current identity with profile
    pub async fn me(&self, identity_id: Uuid) -> Result<MeResponse, AuthError> {
        let identity = self.load(identity_id).await?;
        let profile = self.identities.find_profile(identity_id).await?;
        Ok(MeResponse {
            identity: IdentityResponse::from(&identity),
            profile: profile.as_ref().map(ProfileResponse::from),
        })
    }

    /// Decrypt an identity's national ID for an audit. Admins only.
    pub async fn national_id_for_audit(
        &self,
        actor_id: Uuid,
        identity_id: Uuid,
    ) -> Result<String, AuthError> {
        let actor = self.load(actor_id).await?;
        if actor.role != UserRole::Admin {
            return Err(AuthError::Forbidden("Admin access required".to_string()));
        }
        let identity = self.load(identity_id).await?;
        let national_id = self.cipher.decrypt(&identity.national_id_encrypted)?;
        tracing::info!(actor_id = %actor_id, identity_id = %identity_id, "National ID decrypted for audit");
        Ok(national_id)
    }

    async fn load(&self, identity_id: Uuid) -> Result<Identity, AuthError> {
        self.identities
            .find_by_id(identity_id)
            .await?
            .ok_or(AuthError::IdentityNotFound)
    }
}

fn build_profile(identity: &Identity, request: &RegisterCompleteRequest) -> Profile {
    let (longitude, latitude) = match request.location {
        Some(location) => (Some(location.longitude), Some(location.latitude)),
        None => (None, None),
    };
    Profile {
        id: Uuid::new_v4(),
        identity_id: identity.id,
        full_names: request.full_names.trim().to_string(),
        longitude,
        latitude,
        address: request.address.clone(),
        farm_name: request.farm_name.clone().filter(|_| identity.role == UserRole::Farmer),
        business_name: request.business_name.clone().filter(|_| identity.role == UserRole::Buyer),
        vehicle_type: request.vehicle_type.clone().filter(|_| identity.role == UserRole::Driver),
        created_at: Utc::now(),
    }
}

fn tokens_response(pair: TokenPair, identity: &Identity, profile: Option<&Profile>) -> AuthTokensResponse {
    AuthTokensResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: pair.expires_in,
        identity: IdentityResponse::from(identity),
        profile: profile.map(ProfileResponse::from),
    }
}
