//! One-time-password challenges
//!
//! One live code per (purpose, phone). Issuance is rate limited per phone
//! across purposes with a fixed window that starts at the first request.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::gateway::{mask_phone, NotificationSender};
use crate::store::{KvStore, StoreError};

use super::crypto::constant_time_eq;

/// OTP errors
#[derive(Error, Debug)]
pub enum OtpError {
    #[error("Too many OTP requests. Please try again later.")]
    RateLimited,

    #[error("Failed to send OTP: {0}")]
    NotificationFailed(String),

    #[error("OTP expired or not requested")]
    OtpExpired,

    #[error("Invalid OTP")]
    OtpInvalid,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a challenge authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpPurpose {
    Register,
    Login,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Register => "register",
            OtpPurpose::Login => "login",
        }
    }
}

/// Issuance and lifetime limits
#[derive(Debug, Clone)]
pub struct OtpPolicy {
    pub ttl: Duration,
    pub max_attempts: u32,
    pub window: Duration,
    pub send_timeout: Duration,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            max_attempts: 5,
            window: Duration::from_secs(3600),
            send_timeout: Duration::from_secs(10),
        }
    }
}

/// A code that was stored and delivered
#[derive(Debug, Clone)]
pub struct IssuedOtp {
    pub code: String,
    pub expires_in_seconds: u64,
}

fn code_key(purpose: OtpPurpose, phone: &str) -> String {
    format!("otp:{}:{}", purpose.as_str(), phone)
}

fn attempts_key(phone: &str) -> String {
    format!("otp:attempts:{}", phone)
}

/// Uniform over 000000..=999999
pub fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

/// Issues and validates OTP challenges
pub struct OtpManager {
    kv: Arc<dyn KvStore>,
    sender: Arc<dyn NotificationSender>,
    policy: OtpPolicy,
}

impl OtpManager {
    pub fn new(kv: Arc<dyn KvStore>, sender: Arc<dyn NotificationSender>, policy: OtpPolicy) -> Self {
        Self { kv, sender, policy }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.policy.ttl.as_secs()
    }

    /// Count an issuance request against the phone's window without
    /// issuing anything.
    pub async fn count_attempt(&self, phone: &str) -> Result<u32, OtpError> {
        self.kv
            .incr_within(&attempts_key(phone), self.policy.max_attempts, self.policy.window)
            .await?
            .ok_or(OtpError::RateLimited)
    }

    /// Issue a fresh code, replacing any live one for the same purpose.
    ///
    /// The attempt stays counted even when delivery fails.
    pub async fn issue(&self, purpose: OtpPurpose, phone: &str) -> Result<IssuedOtp, OtpError> {
        let attempt = self.count_attempt(phone).await.map_err(|e| {
            if matches!(e, OtpError::RateLimited) {
                tracing::warn!(phone = %mask_phone(phone), purpose = purpose.as_str(), "OTP rate limit reached");
            }
            e
        })?;

        let code = generate_code();
        let key = code_key(purpose, phone);
        self.kv.set(&key, &code, self.policy.ttl).await?;

        let message = format!(
            "Your AgriConnect Kenya verification code is: {}. Valid for {} minutes. Do not share this code.",
            code,
            self.policy.ttl.as_secs() / 60
        );

        let outcome = tokio::time::timeout(self.policy.send_timeout, self.sender.send(phone, &message)).await;
        let failure = match outcome {
            Ok(Ok(delivery)) => {
                tracing::info!(
                    phone = %mask_phone(phone),
                    purpose = purpose.as_str(),
                    attempt,
                    provider_ref = %delivery.provider_ref,
                    "OTP sent"
                );
                None
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("notification timed out".to_string()),
        };

        if let Some(reason) = failure {
            tracing::error!(phone = %mask_phone(phone), purpose = purpose.as_str(), %reason, "Failed to send OTP");
            self.kv.delete(&key).await?;
            return Err(OtpError::NotificationFailed(reason));
        }

        Ok(IssuedOtp {
            code,
            expires_in_seconds: self.policy.ttl.as_secs(),
        })
    }

    /// Check a code without consuming it
    pub async fn check(&self, purpose: OtpPurpose, phone: &str, code: &str) -> Result<(), OtpError> {
        let stored = self
            .kv
            .get(&code_key(purpose, phone))
            .await?
            .ok_or(OtpError::OtpExpired)?;
        if !constant_time_eq(&stored, code) {
            return Err(OtpError::OtpInvalid);
        }
        Ok(())
    }

    /// Validate and consume a code; success clears the phone's attempt counter
    pub async fn validate(&self, purpose: OtpPurpose, phone: &str, code: &str) -> Result<(), OtpError> {
        self.check(purpose, phone, code).await?;

        // A concurrent validation may have consumed it between check and take
        let taken = self
            .kv
            .take(&code_key(purpose, phone))
            .await?
            .ok_or(OtpError::OtpExpired)?;
        if !constant_time_eq(&taken, code) {
            return Err(OtpError::OtpInvalid);
        }

        self.kv.delete(&attempts_key(phone)).await?;
        tracing::debug!(phone = %mask_phone(phone), purpose = purpose.as_str(), "OTP validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Delivery, GatewayError};
    use crate::store::MemoryKvStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSender for RecordingSender {
        async fn send(&self, phone: &str, message: &str) -> Result<Delivery, GatewayError> {
            if self.fail {
                return Err(GatewayError::Transport("relay down".to_string()));
            }
            self.sent.lock().push((phone.to_string(), message.to_string()));
            Ok(Delivery {
                provider_ref: "test".to_string(),
            })
        }
    }

    struct HangingSender;

    #[async_trait]
    impl NotificationSender for HangingSender {
        async fn send(&self, _phone: &str, _message: &str) -> Result<Delivery, GatewayError> {
            std::future::pending().await
        }
    }

    const PHONE: &str = "254712345678";

    fn manager(sender: Arc<dyn NotificationSender>) -> (OtpManager, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::new());
        (OtpManager::new(kv.clone(), sender, OtpPolicy::default()), kv)
    }

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_issue_and_validate() {
        let sender = Arc::new(RecordingSender::default());
        let (otp, _) = manager(sender.clone());

        let issued = otp.issue(OtpPurpose::Register, PHONE).await.unwrap();
        assert_eq!(issued.expires_in_seconds, 600);
        assert!(sender.sent.lock()[0].1.contains(&issued.code));

        assert!(matches!(
            otp.validate(OtpPurpose::Login, PHONE, &issued.code).await,
            Err(OtpError::OtpExpired)
        ));
        otp.validate(OtpPurpose::Register, PHONE, &issued.code)
            .await
            .unwrap();
        assert!(matches!(
            otp.validate(OtpPurpose::Register, PHONE, &issued.code).await,
            Err(OtpError::OtpExpired)
        ));
    }

    #[tokio::test]
    async fn test_wrong_code_is_invalid_and_keeps_challenge() {
        let (otp, _) = manager(Arc::new(RecordingSender::default()));
        let issued = otp.issue(OtpPurpose::Login, PHONE).await.unwrap();
        let wrong = if issued.code == "000000" { "000001" } else { "000000" };

        assert!(matches!(
            otp.validate(OtpPurpose::Login, PHONE, wrong).await,
            Err(OtpError::OtpInvalid)
        ));
        otp.validate(OtpPurpose::Login, PHONE, &issued.code).await.unwrap();
    }

    #[tokio::test]
    async fn test_reissue_overwrites_previous_code() {
        let (otp, kv) = manager(Arc::new(RecordingSender::default()));
        otp.issue(OtpPurpose::Login, PHONE).await.unwrap();
        let second = otp.issue(OtpPurpose::Login, PHONE).await.unwrap();
        assert_eq!(
            kv.get(&code_key(OtpPurpose::Login, PHONE)).await.unwrap(),
            Some(second.code)
        );
    }

    #[tokio::test]
    async fn test_rate_limit_after_cap() {
        let (otp, _) = manager(Arc::new(RecordingSender::default()));
        for _ in 0..5 {
            otp.issue(OtpPurpose::Login, PHONE).await.unwrap();
        }
        assert!(matches!(
            otp.issue(OtpPurpose::Register, PHONE).await,
            Err(OtpError::RateLimited)
        ));
    }

    #[tokio::test]
    async fn test_successful_validation_resets_counter() {
        let (otp, _) = manager(Arc::new(RecordingSender::default()));
        for _ in 0..4 {
            otp.issue(OtpPurpose::Login, PHONE).await.unwrap();
        }
        let issued = otp.issue(OtpPurpose::Login, PHONE).await.unwrap();
        otp.validate(OtpPurpose::Login, PHONE, &issued.code).await.unwrap();
        otp.issue(OtpPurpose::Login, PHONE).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_failure_deletes_code_but_counts_attempt() {
        let sender = Arc::new(RecordingSender {
            fail: true,
            ..Default::default()
        });
        let (otp, kv) = manager(sender);

        let err = otp.issue(OtpPurpose::Register, PHONE).await.unwrap_err();
        assert!(matches!(err, OtpError::NotificationFailed(_)));
        assert!(!kv.exists(&code_key(OtpPurpose::Register, PHONE)).await.unwrap());
        assert_eq!(kv.get(&attempts_key(PHONE)).await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeout_fails_issue() {
        let (otp, kv) = manager(Arc::new(HangingSender));
        let err = otp.issue(OtpPurpose::Login, PHONE).await.unwrap_err();
        assert!(matches!(err, OtpError::NotificationFailed(_)));
        assert!(!kv.exists(&code_key(OtpPurpose::Login, PHONE)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_expires_after_ttl() {
        let (otp, _) = manager(Arc::new(RecordingSender::default()));
        let issued = otp.issue(OtpPurpose::Login, PHONE).await.unwrap();
        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(matches!(
            otp.validate(OtpPurpose::Login, PHONE, &issued.code).await,
            Err(OtpError::OtpExpired)
        ));
    }
}
