//! JWT token generation and validation
//!
//! Access and refresh tokens are signed with separate secrets so a leaked
//! refresh secret cannot mint access tokens and vice versa.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::UserRole;

/// JWT-related errors
#[derive(Error, Debug)]
pub enum JwtError {
    #[error("Token encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Token decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// JWT claims shared by access and refresh tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (identity ID)
    pub sub: String,
    /// Identity role at issuance
    pub role: String,
    /// JWT ID; makes every token unique
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
    /// Token type (access or refresh)
    pub token_type: String,
}

impl Claims {
    pub fn identity_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|e| JwtError::InvalidToken(e.to_string()))
    }

    pub fn role(&self) -> Result<UserRole, JwtError> {
        self.role.parse().map_err(JwtError::InvalidToken)
    }

    /// Seconds until expiry, floored at zero
    pub fn remaining_seconds(&self) -> u64 {
        (self.exp - Utc::now().timestamp()).max(0) as u64
    }
}

/// Token type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// Generate a signed token
///
/// # Arguments
/// * `identity_id` - Token subject
/// * `role` - Role claim
/// * `secret` - Signing secret for this token type
/// * `ttl_seconds` - Token time-to-live in seconds
/// * `token_type` - Access or refresh
pub fn generate_token(
    identity_id: Uuid,
    role: UserRole,
    secret: &str,
    ttl_seconds: i64,
    token_type: TokenType,
) -> Result<String, JwtError> {
    let now = Utc::now();
    let exp = now + Duration::seconds(ttl_seconds);

    let claims = Claims {
        sub: identity_id.to_string(),
        role: role.as_str().to_string(),
        jti: Uuid::new_v4().to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
        token_type: token_type.as_str().to_string(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| JwtError::EncodingFailed(e.to_string()))
}

/// Verify signature, expiry and token type
///
/// # Returns
/// * `Ok(Claims)` if token is valid
/// * `Err(JwtError::TokenExpired)` once `exp` has passed (no leeway)
pub fn verify_token(token: &str, secret: &str, expected: TokenType) -> Result<Claims, JwtError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation.leeway = 0;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => JwtError::TokenExpired,
        _ => JwtError::DecodingFailed(e.to_string()),
    })?;

    if token_data.claims.token_type != expected.as_str() {
        return Err(JwtError::InvalidToken(format!(
            "expected {} token",
            expected.as_str()
        )));
    }

    Ok(token_data.claims)
}
