//! Password hashing and reset token utilities.
//!
//! Passwords are hashed with Argon2id. Hashing and verification are CPU-bound, so
//! handlers run them inside `tokio::task::spawn_blocking`.
//!
//! Reset tokens are random, URL-safe strings handed to the user; only their SHA-256
//! digest is persisted, so a database leak does not expose usable tokens.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::prelude::*;
use sha2::{Digest, Sha256};

use crate::errors::Error;

/// Number of random bytes in a password reset token.
const RESET_TOKEN_BYTES: usize = 32;

/// Hash a string using Argon2id with a random salt.
pub fn hash_string(input: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(input.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal {
            operation: format!("Failed to hash password: {e}"),
        })
}

/// Verify a string against an Argon2 hash.
///
/// Returns `Ok(false)` for a mismatch; `Err` only when the stored hash itself is
/// malformed.
pub fn verify_string(input: &str, hash: &str) -> Result<bool, Error> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| Error::Internal {
        operation: format!("Stored password hash is invalid: {e}"),
    })?;

    Ok(Argon2::default().verify_password(input.as_bytes(), &parsed_hash).is_ok())
}

/// Generate a random password reset token.
///
/// The token is the plaintext sent to the user; persist only [`reset_token_digest`]
/// of it.
pub fn generate_reset_token() -> String {
    let mut token_bytes = [0u8; RESET_TOKEN_BYTES];
    rand::rng().fill(&mut token_bytes);
    URL_SAFE_NO_PAD.encode(token_bytes)
}

/// SHA-256 digest of a reset token, hex-encoded. This is the only form that touches
/// the database.
pub fn reset_token_digest(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_round_trip() {
        let hash = hash_string("correct horse battery staple").unwrap();

        assert!(hash.starts_with("$argon2"));
        assert!(verify_string("correct horse battery staple", &hash).unwrap());
        assert!(!verify_string("wrong password", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let first = hash_string("same input").unwrap();
        let second = hash_string("same input").unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(verify_string("anything", "not-a-phc-string").is_err());
    }

    #[test]
    fn test_reset_token_shape() {
        let token = generate_reset_token();

        // 32 bytes base64url without padding
        assert_eq!(token.len(), 43);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_reset_tokens_are_unique() {
        assert_ne!(generate_reset_token(), generate_reset_token());
    }

    #[test]
    fn test_reset_token_digest_is_stable_hex() {
        let digest = reset_token_digest("some-token");

        assert_eq!(digest, reset_token_digest("some-token"));
        assert_ne!(digest, reset_token_digest("other-token"));
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
