//! At-rest sealing for TOTP secrets and recovery codes.
//!
//! Values are encrypted with ChaCha20-Poly1305 under a key derived from the
//! application key. The AAD binds each ciphertext to its owning user and
//! purpose, so a row copied between users or columns fails to open.

use anyhow::Result;
use base64ct::{Base64UrlUnpadded, Encoding};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// AAD context for the per-user TOTP secret column.
pub const TOTP_SECRET_CONTEXT: &str = "totp-secret";

/// AAD context for the per-user recovery codes column.
pub const RECOVERY_CODES_CONTEXT: &str = "recovery-codes";

/// Derive the 32-byte sealing key from the configured application key.
#[must_use]
pub fn derive_key(app_key: &str) -> [u8; 32] {
    Sha256::digest(app_key.as_bytes()).into()
}

/// Encrypt `plaintext` for `user_id` under `context`.
/// Returns `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if encryption fails.
#[allow(deprecated)]
pub fn seal(key: &[u8; 32], plaintext: &[u8], user_id: i64, context: &str) -> Result<Vec<u8>> {
    let key = Key::from_slice(key);
    let cipher = ChaCha20Poly1305::new(key);

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = construct_aad(user_id, context);
    let payload = Payload {
        msg: plaintext,
        aad: &aad,
    };

    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|e| anyhow::anyhow!("Encryption failure: {e}"))?;

    let mut result = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt sealed data produced by [`seal`].
/// Expects `data` to be `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if decryption fails or if ciphertext is too short.
#[allow(deprecated)]
pub fn open(key: &[u8; 32], data: &[u8], user_id: i64, context: &str) -> Result<Vec<u8>> {
    if data.len() < 12 {
        return Err(anyhow::anyhow!("Invalid ciphertext length"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);

    let key = Key::from_slice(key);
    let cipher = ChaCha20Poly1305::new(key);

    let aad = construct_aad(user_id, context);
    let payload = Payload {
        msg: ciphertext,
        aad: &aad,
    };

    let plaintext = cipher
        .decrypt(nonce, payload)
        .map_err(|e| anyhow::anyhow!("Decryption failure: {e}"))?;

    Ok(plaintext)
}

/// Seal a UTF-8 string into a base64url column value.
///
/// # Errors
/// Returns an error if encryption fails.
pub fn seal_string(key: &[u8; 32], plaintext: &str, user_id: i64, context: &str) -> Result<String> {
    let sealed = seal(key, plaintext.as_bytes(), user_id, context)?;
    Ok(Base64UrlUnpadded::encode_string(&sealed))
}

/// Open a base64url column value back into a UTF-8 string.
///
/// # Errors
/// Returns an error if decoding or decryption fails.
pub fn open_string(key: &[u8; 32], encoded: &str, user_id: i64, context: &str) -> Result<String> {
    let sealed = Base64UrlUnpadded::decode_vec(encoded)
        .map_err(|e| anyhow::anyhow!("Invalid sealed value encoding: {e}"))?;
    let plaintext = open(key, &sealed, user_id, context)?;
    String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("Sealed value is not UTF-8: {e}"))
}

fn construct_aad(user_id: i64, context: &str) -> Vec<u8> {
    // AAD = "context:v1|user_id"
    format!("{context}:v1|{user_id}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_seal_open_roundtrip() {
        let key = derive_key("app-key-under-test");
        let secret = b"JBSWY3DPEHPK3PXP";

        let sealed = seal(&key, secret, 42, TOTP_SECRET_CONTEXT).unwrap();
        assert_ne!(sealed.as_slice(), secret.as_slice());
        assert!(sealed.len() > secret.len());

        let opened = open(&key, &sealed, 42, TOTP_SECRET_CONTEXT).unwrap();
        assert_eq!(opened, secret);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_open_fails_for_other_user() {
        let key = derive_key("app-key-under-test");
        let sealed = seal(&key, b"secret", 1, TOTP_SECRET_CONTEXT).unwrap();

        let result = open(&key, &sealed, 2, TOTP_SECRET_CONTEXT);
        assert!(result.is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_open_fails_across_contexts() {
        let key = derive_key("app-key-under-test");
        let sealed = seal(&key, b"secret", 1, TOTP_SECRET_CONTEXT).unwrap();

        let result = open(&key, &sealed, 1, RECOVERY_CODES_CONTEXT);
        assert!(result.is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used, clippy::indexing_slicing)]
    fn test_open_fails_tampered_ciphertext() {
        let key = derive_key("app-key-under-test");
        let mut sealed = seal(&key, b"secret", 1, TOTP_SECRET_CONTEXT).unwrap();

        // Tamper with last byte
        let len = sealed.len();
        if let Some(byte) = sealed.get_mut(len - 1) {
            *byte ^= 0xFF;
        }

        let result = open(&key, &sealed, 1, TOTP_SECRET_CONTEXT);
        assert!(result.is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_string_wrappers_roundtrip() {
        let key = derive_key("app-key-under-test");
        let column = seal_string(&key, "ABCD-EFGH-JKLM", 7, RECOVERY_CODES_CONTEXT).unwrap();
        let opened = open_string(&key, &column, 7, RECOVERY_CODES_CONTEXT).unwrap();
        assert_eq!(opened, "ABCD-EFGH-JKLM");
    }
}
