//! Authentication module for AgriConnect
//!
//! Phone-based authentication:
//! - OTP challenges delivered by SMS
//! - JWT access tokens with a revocation list
//! - Rotating, single-use refresh tokens stored as hashes

mod crypto;
mod jwt;
mod otp;
mod service;
mod session;

pub use crypto::{constant_time_eq, hash_national_id, hash_token, CryptoError, FieldCipher};
pub use jwt::{generate_token, verify_token, Claims, JwtError, TokenType};
pub use otp::{generate_code, IssuedOtp, OtpError, OtpManager, OtpPolicy, OtpPurpose};
pub use service::{AuthError, AuthService};
pub use session::{SessionConfig, SessionError, SessionService, TokenPair};
