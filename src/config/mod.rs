//! Configuration management for AgriConnect
//!
//! This module handles loading and validating configuration from environment variables,
//! with support for different environments (development, staging, production).

use std::env;
use std::time::Duration;
use thiserror::Error;

const DEV_ACCESS_SECRET: &str = "development-access-secret-change-in-production";
const DEV_REFRESH_SECRET: &str = "development-refresh-secret-change-in-production";
/// 32 zero bytes, hex encoded. Never accepted in production.
const DEV_ENCRYPTION_KEY: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment value: {0}")]
    InvalidValue(String),

    #[error("Invalid port number: {0}")]
    InvalidPort(String),

    #[error("Insecure production configuration: {0}")]
    Insecure(String),
}

/// Application environment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Parse environment from string
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid environment: '{}'. Expected: dev, staging, or prod",
                s
            ))),
        }
    }

    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Get the environment name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL. Without one the server runs on in-memory stores.
    pub database_url: Option<String>,

    /// Current environment
    pub environment: Environment,

    /// Server port
    pub port: u16,

    /// Maximum database connections
    pub db_max_connections: u32,

    /// Rate limit: requests per second per IP
    pub rate_limit_rps: u32,

    /// Shared secret expected on gateway callbacks
    pub webhook_secret: Option<String>,

    /// CORS allowed origins
    pub cors_allowed_origins: Option<String>,

    /// Log level (RUST_LOG)
    pub log_level: String,

    /// Signing secret for access tokens
    pub jwt_access_secret: String,

    /// Signing secret for refresh tokens
    pub jwt_refresh_secret: String,

    /// Access token TTL in seconds (default: 900 = 15 minutes)
    pub jwt_access_token_ttl_seconds: i64,

    /// Refresh token TTL in days (default: 7)
    pub jwt_refresh_token_ttl_days: i64,

    /// Hex-encoded 32-byte key for national ID sealing
    pub encryption_key: String,

    /// OTP lifetime in seconds (default: 600)
    pub otp_ttl_seconds: u64,

    /// OTP requests allowed per phone per window (default: 5)
    pub otp_max_attempts: u32,

    /// OTP rate-limit window in seconds (default: 3600)
    pub otp_window_seconds: u64,

    /// Return the OTP in API responses. Development only.
    pub otp_echo_in_response: bool,

    /// SMS relay endpoint. Messages are logged when unset.
    pub notify_relay_url: Option<String>,

    /// Directory for KYC document images. Images stay in memory when unset.
    pub document_storage_dir: Option<String>,

    /// Timeout for gateway, SMS and storage calls
    pub gateway_timeout_seconds: u64,

    /// How long a collection request blocks a new one
    pub collection_in_flight_seconds: u64,

    /// Interval of the automatic escrow release job
    pub escrow_release_interval_seconds: u64,

    /// Phones allowed to self-register with the admin role
    pub admin_phones: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup
    pub fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = var("ENVIRONMENT")
            .map(|s| Environment::from_str(&s))
            .unwrap_or(Ok(Environment::Development))?;

        let database_url = var("DATABASE_URL").filter(|s| !s.trim().is_empty());

        let port = var("PORT")
            .unwrap_or_else(|| "3001".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort("PORT must be a valid number".to_string()))?;

        let parse_or = |key: &str, default: u64| -> u64 {
            var(key).and_then(|v| v.parse::<u64>().ok()).unwrap_or(default)
        };

        let db_max_connections = parse_or("DB_MAX_CONNECTIONS", 5) as u32;
        let rate_limit_rps = parse_or("RATE_LIMIT_RPS", 100) as u32;
        let webhook_secret = var("WEBHOOK_SECRET").filter(|s| !s.is_empty());
        let notify_relay_url = var("NOTIFY_RELAY_URL").filter(|s| !s.is_empty());
        let document_storage_dir = var("DOCUMENT_STORAGE_DIR").filter(|s| !s.trim().is_empty());
        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS");
        let log_level = var("RUST_LOG").unwrap_or_else(|| "info".to_string());

        // JWT and Auth configuration
        let jwt_access_secret =
            var("JWT_ACCESS_SECRET").unwrap_or_else(|| DEV_ACCESS_SECRET.to_string());
        let jwt_refresh_secret =
            var("JWT_REFRESH_SECRET").unwrap_or_else(|| DEV_REFRESH_SECRET.to_string());
        let jwt_access_token_ttl_seconds = parse_or("JWT_ACCESS_TOKEN_TTL_SECONDS", 900) as i64;
        let jwt_refresh_token_ttl_days = parse_or("JWT_REFRESH_TOKEN_TTL_DAYS", 7) as i64;

        let encryption_key_var = var("ENCRYPTION_KEY");
        let otp_echo_in_response = var("OTP_ECHO_IN_RESPONSE")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(!environment.is_production());

        let admin_phones = var("ADMIN_PHONES")
            .map(|v| {
                v.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if environment.is_production() {
            if database_url.is_none() {
                return Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()));
            }
            if encryption_key_var.is_none() {
                return Err(ConfigError::MissingEnvVar("ENCRYPTION_KEY".to_string()));
            }
            if jwt_access_secret == DEV_ACCESS_SECRET || jwt_refresh_secret == DEV_REFRESH_SECRET {
                return Err(ConfigError::Insecure(
                    "JWT secrets must be set explicitly".to_string(),
                ));
            }
            if jwt_access_secret == jwt_refresh_secret {
                return Err(ConfigError::Insecure(
                    "Access and refresh secrets must differ".to_string(),
                ));
            }
            if otp_echo_in_response {
                return Err(ConfigError::Insecure(
                    "OTP_ECHO_IN_RESPONSE must be off".to_string(),
                ));
            }
            // Unauthenticated callbacks could mark orders paid
            if webhook_secret.is_none() {
                return Err(ConfigError::MissingEnvVar("WEBHOOK_SECRET".to_string()));
            }
            // Without a relay, OTP codes end up in the log
            if notify_relay_url.is_none() {
                return Err(ConfigError::MissingEnvVar("NOTIFY_RELAY_URL".to_string()));
            }
            if document_storage_dir.is_none() {
                return Err(ConfigError::Insecure(
                    "KYC document images would only be kept in memory; set DOCUMENT_STORAGE_DIR"
                        .to_string(),
                ));
            }
        }

        Ok(Config {
            database_url,
            environment,
            port,
            db_max_connections,
            rate_limit_rps,
            webhook_secret,
            cors_allowed_origins,
            log_level,
            jwt_access_secret,
            jwt_refresh_secret,
            jwt_access_token_ttl_seconds,
            jwt_refresh_token_ttl_days,
            encryption_key: encryption_key_var.unwrap_or_else(|| DEV_ENCRYPTION_KEY.to_string()),
            otp_ttl_seconds: parse_or("OTP_TTL_SECONDS", 600),
            otp_max_attempts: parse_or("OTP_MAX_ATTEMPTS", 5) as u32,
            otp_window_seconds: parse_or("OTP_WINDOW_SECONDS", 3600),
            otp_echo_in_response,
            notify_relay_url,
            document_storage_dir,
            gateway_timeout_seconds: parse_or("GATEWAY_TIMEOUT_SECONDS", 15),
            collection_in_flight_seconds: parse_or("COLLECTION_IN_FLIGHT_SECONDS", 120),
            escrow_release_interval_seconds: parse_or("ESCROW_RELEASE_INTERVAL_SECONDS", 300),
            admin_phones,
        })
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_seconds)
    }

    /// Get database URL (useful for logging masked version)
    pub fn database_url_masked(&self) -> String {
        let Some(url) = &self.database_url else {
            return "<in-memory>".to_string();
        };
        // Mask password in database URL for logging
        if let Some(at_pos) = url.find('@') {
            if let Some(colon_pos) = url[..at_pos].rfind(':') {
                let prefix = &url[..colon_pos + 1];
                let suffix = &url[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
        url.clone()
    }
}
