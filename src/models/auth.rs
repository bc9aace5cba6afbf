//! Authentication request/response models

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::{AccountStatus, Identity, KycStatus, Profile, UserRole};

/// Accepts carrier numbers of the form 2547XXXXXXXX / 2541XXXXXXXX
pub fn is_valid_phone(phone: &str) -> bool {
    let bytes = phone.as_bytes();
    bytes.len() == 12
        && phone.starts_with("254")
        && matches!(bytes[3], b'7' | b'1')
        && bytes.iter().all(u8::is_ascii_digit)
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    if is_valid_phone(phone) {
        Ok(())
    } else {
        let mut err = ValidationError::new("phone");
        err.message = Some("Invalid phone number format (e.g., 254712345678)".into());
        Err(err)
    }
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Request carrying only a phone number (register/init, login/init)
#[derive(Debug, Deserialize, Validate)]
pub struct PhoneRequest {
    #[validate(custom = "validate_phone")]
    pub phone: String,
}

/// Response after an OTP has been issued
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpIssuedResponse {
    pub success: bool,
    pub message: String,
    pub expires_in: u64,
    /// Only populated when OTP echo is enabled for non-production use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

/// Request completing a registration
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCompleteRequest {
    #[validate(custom = "validate_phone")]
    pub phone: String,
    #[validate(length(equal = 6))]
    pub otp: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 2, max = 120))]
    pub full_names: String,
    #[validate(length(min = 5, max = 20))]
    pub national_id: String,
    pub role: UserRole,
    pub location: Option<GeoLocation>,
    pub address: Option<String>,
    pub farm_name: Option<String>,
    pub business_name: Option<String>,
    pub vehicle_type: Option<String>,
}

/// Longitude/latitude pair
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoLocation {
    pub longitude: f64,
    pub latitude: f64,
}

/// Request verifying a login OTP
#[derive(Debug, Deserialize, Validate)]
pub struct LoginVerifyRequest {
    #[validate(custom = "validate_phone")]
    pub phone: String,
    #[validate(length(equal = 6))]
    pub otp: String,
}

/// Auth tokens response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokensResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub identity: IdentityResponse,
    pub profile: Option<ProfileResponse>,
}

/// Decrypted national ID returned to an auditing admin
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NationalIdAuditResponse {
    pub identity_id: Uuid,
    pub national_id: String,
}

/// Refresh token request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Rotated token pair
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Logout request
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

/// Identity response (sanitized for API)
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    pub id: Uuid,
    pub phone: String,
    pub email: String,
    pub role: UserRole,
    pub status: AccountStatus,
    pub kyc_status: KycStatus,
    pub can_transact: bool,
    pub is_phone_verified: bool,
    pub is_email_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Identity> for IdentityResponse {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            phone: identity.phone.clone(),
            email: identity.email.clone(),
            role: identity.role,
            status: identity.status,
            kyc_status: identity.kyc_status,
            can_transact: identity.can_transact(),
            is_phone_verified: identity.is_phone_verified,
            is_email_verified: identity.is_email_verified,
            last_login: identity.last_login,
            created_at: identity.created_at,
        }
    }
}

/// Profile response
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub id: Uuid,
    pub full_names: String,
    pub location: Option<GeoLocation>,
    pub address: Option<String>,
    pub farm_name: Option<String>,
    pub business_name: Option<String>,
    pub vehicle_type: Option<String>,
}

impl From<&Profile> for ProfileResponse {
    fn from(profile: &Profile) -> Self {
        let location = match (profile.longitude, profile.latitude) {
            (Some(longitude), Some(latitude)) => Some(GeoLocation {
                longitude,
                latitude,
            }),
            _ => None,
        };
        Self {
            id: profile.id,
            full_names: profile.full_names.clone(),
            location,
            address: profile.address.clone(),
            farm_name: profile.farm_name.clone(),
            business_name: profile.business_name.clone(),
            vehicle_type: profile.vehicle_type.clone(),
        }
    }
}

/// Current identity with profile
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub identity: IdentityResponse,
    pub profile: Option<ProfileResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_format() {
        assert!(is_valid_phone("254712345678"));
        assert!(is_valid_phone("254112345678"));
        assert!(!is_valid_phone("254812345678"));
        assert!(!is_valid_phone("+254712345678"));
        assert!(!is_valid_phone("25471234567"));
        assert!(!is_valid_phone("2547123456a8"));
    }

    #[test]
    fn test_register_request_validation() {
        let req: RegisterCompleteRequest = serde_json::from_value(serde_json::json!({
            "phone": "254712345678",
            "otp": "123456",
            "email": "jane@example.com",
            "fullNames": "Jane Wanjiku",
            "nationalId": "12345678",
            "role": "farmer",
            "farmName": "Shamba"
        }))
        .unwrap();
        assert!(req.validate().is_ok());

        let mut bad = req.clone();
        bad.email = "not-an-email".to_string();
        assert!(bad.validate().is_err());

        let mut bad = req;
        bad.phone = "0712345678".to_string();
        assert!(bad.validate().is_err());
    }
}
