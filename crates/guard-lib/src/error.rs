// crates/guard-lib/src/error.rs

//! Error taxonomy for the session engine.
//!
//! Only [`AuthFailure`] ever reaches callers of the orchestrator; the other
//! types stay inside the engine or surface at construction time.
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Fatal configuration problems, raised while building the engine
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Signing secret is not configured")]
    MissingSecret,

    #[error("Signing secret must be at least {min} bytes (got {actual})")]
    SecretTooShort { min: usize, actual: usize },

    #[error("Invalid duration for {field}: {value:?} (expected e.g. \"15m\" or \"7d\")")]
    InvalidTtl { field: &'static str, value: String },

    #[error("Unsupported signing algorithm: {0}")]
    InvalidAlgorithm(String),

    #[error("Invalid setting {field}: {reason}")]
    InvalidLimit {
        field: &'static str,
        reason: &'static str,
    },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("Background maintenance requires a running Tokio runtime")]
    NoRuntime,
}

/// Failure reported by a storage backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage operation {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

/// Access-token verification and signing errors
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,

    #[error("Token not yet valid")]
    NotYetValid,

    #[error("Invalid token: {0}")]
    Invalid(jsonwebtoken::errors::Error),

    #[error("Failed to sign token: {0}")]
    Signing(jsonwebtoken::errors::Error),
}

/// Outcome of a failed authentication, safe to show to a client.
///
/// Messages never reveal whether the username exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("Too many login attempts. Please try again later.")]
    TooManyAttempts {
        locked_until: Option<DateTime<Utc>>,
    },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authentication failed")]
    Unavailable,
}

impl AuthFailure {
    /// Get the error code for this failure
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthFailure::InvalidCredentials => "AUTH_001",
            AuthFailure::TooManyAttempts { .. } => "AUTH_003",
            AuthFailure::Unavailable => "AUTH_500",
        }
    }

    /// Whether the client may retry immediately
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AuthFailure::TooManyAttempts { .. })
    }
}

impl From<StorageError> for AuthFailure {
    fn from(_: StorageError) -> Self {
        AuthFailure::Unavailable
    }
}
