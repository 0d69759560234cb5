//! TOTP enrollment and code verification.

use anyhow::{anyhow, Result};
use totp_rs::{Algorithm, Secret, TOTP};

/// Material handed to the user during two-factor enrollment.
#[derive(Debug)]
pub struct TotpEnrollment {
    pub secret_base32: String,
    pub otpauth_url: String,
    pub qr_png_base64: String,
}

/// Generate a fresh TOTP secret plus the otpauth URL and QR data URL for it.
///
/// # Errors
/// Returns an error if secret generation or QR rendering fails.
pub fn start_enrollment(issuer: &str, account_email: &str) -> Result<TotpEnrollment> {
    let secret_base32 = match Secret::generate_secret().to_encoded() {
        Secret::Encoded(value) => value,
        Secret::Raw(_) => return Err(anyhow!("Secret encoding failed")),
    };
    provisioning(&secret_base32, issuer, account_email)
}

/// Rebuild the otpauth URL and QR data URL for an existing base32 secret.
///
/// # Errors
/// Returns an error if the secret does not decode or QR rendering fails.
pub fn provisioning(
    secret_base32: &str,
    issuer: &str,
    account_email: &str,
) -> Result<TotpEnrollment> {
    let secret_bytes = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| anyhow!("Secret decode error: {e}"))?;

    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret_bytes,
        Some(issuer.to_string()),
        account_email.to_string(),
    )
    .map_err(|e| anyhow!("TOTP init error: {e}"))?;

    let qr = totp
        .get_qr_base64()
        .map_err(|e| anyhow!("QR gen error: {e}"))?;
    let qr = format!("data:image/png;base64,{qr}");

    Ok(TotpEnrollment {
        secret_base32: totp.get_secret_base32(),
        otpauth_url: totp.get_url(),
        qr_png_base64: qr,
    })
}

/// Check a submitted code against a stored base32 secret.
///
/// Invalid secrets and clock errors count as a failed check rather than
/// surfacing to the caller.
#[must_use]
pub fn verify_code(secret_base32: &str, code: &str) -> bool {
    let secret_bytes = match Secret::Encoded(secret_base32.to_string()).to_bytes() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let totp = match TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret_bytes,
        None,
        "user".to_string(), // label doesn't matter for check
    ) {
        Ok(totp) => totp,
        Err(_) => return false,
    };

    totp.check_current(code.trim()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_enrollment_material_is_consistent() {
        let enrollment = start_enrollment("Eniro", "user@example.com").unwrap();

        assert!(!enrollment.secret_base32.is_empty());
        assert!(enrollment.otpauth_url.starts_with("otpauth://totp/"));
        assert!(enrollment.otpauth_url.contains("issuer=Eniro"));
        assert!(enrollment.qr_png_base64.starts_with("data:image/png;base64,"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_current_code_verifies() {
        let enrollment = start_enrollment("Eniro", "user@example.com").unwrap();

        let secret_bytes = Secret::Encoded(enrollment.secret_base32.clone())
            .to_bytes()
            .unwrap();
        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            None,
            "user".to_string(),
        )
        .unwrap();
        let code = totp.generate_current().unwrap();

        assert!(verify_code(&enrollment.secret_base32, &code));
        assert!(verify_code(&enrollment.secret_base32, &format!(" {code} ")));
        assert!(!verify_code(&enrollment.secret_base32, "not-a-code"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_provisioning_reuses_stored_secret() {
        let enrollment = start_enrollment("Eniro", "user@example.com").unwrap();
        let rebuilt = provisioning(&enrollment.secret_base32, "Eniro", "user@example.com").unwrap();

        assert_eq!(rebuilt.secret_base32, enrollment.secret_base32);
        assert_eq!(rebuilt.otpauth_url, enrollment.otpauth_url);
    }

    #[test]
    fn test_garbage_secret_fails_closed() {
        assert!(!verify_code("not base32!!", "123456"));
    }
}
