//! Error types for trialscope-core

use thiserror::Error;

/// Main error type for the trialscope-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Unknown username/email or wrong password
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Account exists but has been deactivated
    #[error("account is inactive")]
    AccountInactive,

    /// Too many failed login attempts within the lockout window
    #[error("account is temporarily locked after too many failed login attempts")]
    AccountLocked,

    /// Session token unknown or past its expiry
    #[error("session expired or unknown")]
    SessionExpired,

    /// Entity lookup failed
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    /// Malformed input (identifier format, out-of-range enum value, weak password)
    #[error("validation error: {0}")]
    Validation(String),

    /// Uniqueness or required-child constraint violated
    #[error("constraint violation: {0}")]
    Constraint(String),
}

/// Result type alias for trialscope-core
pub type Result<T> = std::result::Result<T, Error>;
