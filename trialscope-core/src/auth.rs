//! Password hashing and session token generation
//!
//! Passwords are stored as `salt$digest` where the digest is a hex-encoded
//! SHA-256 over `salt || password`. Session tokens are opaque random
//! strings; their validity lives entirely in the `user_sessions` table.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}${}", salt, digest(&salt, password))
}

/// Verify a password against a stored `salt$digest` hash.
///
/// Malformed stored hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, expected)) => digest(salt, password) == expected,
        None => false,
    }
}

/// Generate an opaque session token.
pub fn generate_session_token() -> String {
    // Two UUIDs worth of randomness; format is opaque to callers.
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// Check password strength: minimum length plus at least one letter and
/// one digit.
pub fn validate_password(password: &str, min_length: usize) -> Result<()> {
    if password.chars().count() < min_length {
        return Err(Error::Validation(format!(
            "password must be at least {} characters",
            min_length
        )));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(Error::Validation(
            "password must contain at least one digit".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_alphabetic()) {
        return Err(Error::Validation(
            "password must contain at least one letter".to_string(),
        ));
    }
    Ok(())
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("s3cret-pw");
        assert!(verify_password("s3cret-pw", &hash));
        assert!(!verify_password("wrong-pw1", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same-password1");
        let b = hash_password("same-password1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-valid-hash"));
        assert!(!verify_password("anything", ""));
    }

    #[test]
    fn test_token_uniqueness() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_password_policy() {
        assert!(validate_password("abc12345", 8).is_ok());
        // Too short
        assert!(validate_password("ab1", 8).is_err());
        // No digit
        assert!(validate_password("abcdefgh", 8).is_err());
        // No letter
        assert!(validate_password("12345678", 8).is_err());
    }
}
