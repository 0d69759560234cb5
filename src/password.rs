//! Argon2id password hashing.
//!
//! Hashes are stored in PHC string format so parameters travel with the hash
//! and can be upgraded without a migration.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Hash a plaintext password with a fresh random salt.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow::anyhow!("Failed to hash password: {err}"))?;
    Ok(hash.to_string())
}

/// Verify a plaintext password against a stored PHC hash.
///
/// A mismatch is `Ok(false)`; only malformed hashes surface as errors.
///
/// # Errors
/// Returns an error if the stored hash cannot be parsed.
pub fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(password_hash)
        .map_err(|err| anyhow::anyhow!("Invalid password hash: {err}"))
        .context("Stored password hash is malformed")?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(anyhow::anyhow!("Failed to verify password: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_roundtrip() -> Result<()> {
        let hash = hash_password("correct horse battery staple")?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse battery staple", &hash)?);
        Ok(())
    }

    #[test]
    fn test_wrong_password_is_not_an_error() -> Result<()> {
        let hash = hash_password("first")?;
        assert!(!verify_password("second", &hash)?);
        Ok(())
    }

    #[test]
    fn test_hashes_are_salted() -> Result<()> {
        let a = hash_password("same input")?;
        let b = hash_password("same input")?;
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }
}
