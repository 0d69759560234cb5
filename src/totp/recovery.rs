//! Recovery code generation and normalization helpers.
//!
//! Recovery codes are one-time fallbacks for when the authenticator app is
//! unavailable. The batch is sealed at rest so it can be re-displayed to the
//! account owner; a used code is removed from the batch.

use anyhow::{Context, Result};
use rand::{rngs::OsRng, RngCore};

const RECOVERY_CODE_COUNT: usize = 8;
const RECOVERY_CODE_LEN: usize = 12;
const RECOVERY_CODE_GROUP_SIZE: usize = 4;
const RECOVERY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a fresh batch of display-formatted recovery codes.
#[must_use]
pub fn generate_recovery_codes() -> Vec<String> {
    let mut rng = OsRng;
    (0..RECOVERY_CODE_COUNT)
        .map(|_| generate_code(&mut rng))
        .collect()
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; RECOVERY_CODE_LEN];
    rng.fill_bytes(&mut bytes);

    // Alphabet length divides 256, so the modulo is unbiased.
    let normalized: String = bytes
        .iter()
        .map(|byte| RECOVERY_CODE_ALPHABET[*byte as usize % RECOVERY_CODE_ALPHABET.len()] as char)
        .collect();

    // A freshly generated code always has the exact length.
    format_recovery_code(&normalized).unwrap_or(normalized)
}

/// Normalize user input for comparison: strip separators, uppercase, and
/// reject anything outside the code alphabet.
///
/// # Errors
/// Returns an error if the input is not a plausible recovery code.
pub fn normalize_recovery_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != RECOVERY_CODE_LEN {
        return Err(anyhow::anyhow!("invalid recovery code length"));
    }

    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| RECOVERY_CODE_ALPHABET.contains(ch))
    {
        return Err(anyhow::anyhow!("invalid recovery code characters"));
    }

    Ok(normalized)
}

/// Format a normalized recovery code for display.
///
/// # Errors
/// Returns an error if the input length is wrong.
pub fn format_recovery_code(normalized: &str) -> Result<String> {
    if normalized.len() != RECOVERY_CODE_LEN {
        return Err(anyhow::anyhow!("invalid recovery code length"));
    }
    let mut out = String::with_capacity(RECOVERY_CODE_LEN + 2);
    for (idx, chunk) in normalized
        .as_bytes()
        .chunks(RECOVERY_CODE_GROUP_SIZE)
        .enumerate()
    {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).context("invalid recovery code chunk")?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_batch_shape() {
        let codes = generate_recovery_codes();
        assert_eq!(codes.len(), RECOVERY_CODE_COUNT);
        for code in &codes {
            assert_eq!(code.len(), RECOVERY_CODE_LEN + 2);
            assert_eq!(code.matches('-').count(), 2);
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_normalize_accepts_display_format() {
        let normalized = normalize_recovery_code("abcd-efgh-jklm").unwrap();
        assert_eq!(normalized, "ABCDEFGHJKLM");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_normalize_rejects_ambiguous_characters() {
        // 0, 1, I and O are not in the alphabet.
        assert!(normalize_recovery_code("ABCD-EFGH-JKL0").is_err());
        assert!(normalize_recovery_code("ABCD-EFGH-JKLI").is_err());
    }

    #[test]
    fn test_normalize_rejects_wrong_length() {
        assert!(normalize_recovery_code("ABCD-EFGH").is_err());
        assert!(normalize_recovery_code("").is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_format_groups_of_four() {
        assert_eq!(
            format_recovery_code("ABCDEFGHJKLM").unwrap(),
            "ABCD-EFGH-JKLM"
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_generated_codes_normalize_to_themselves() {
        for code in generate_recovery_codes() {
            let normalized = normalize_recovery_code(&code).unwrap();
            assert_eq!(format_recovery_code(&normalized).unwrap(), code);
        }
    }
}
