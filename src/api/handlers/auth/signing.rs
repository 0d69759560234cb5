//! Signed email-verification links and SPA URL rewriting.
//!
//! The canonical API link is
//! `/api/auth/email/verify/{id}/{hash}?expires={unix}&signature={hmac}`
//! where `hash` is the hex SHA-256 of the user's email and `signature` an
//! HMAC-SHA256 over `{id}.{hash}.{expires}` under the app key. Outbound
//! emails carry the same query parameters reattached to the frontend path.

use anyhow::{anyhow, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use url::form_urlencoded;

use super::state::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

/// Links for one verification email: the signed API URL and its SPA rewrite.
#[derive(Debug)]
pub(super) struct VerificationLinks {
    pub(super) api_url: String,
    pub(super) spa_url: String,
}

/// Hex SHA-256 of the (normalized) email, embedded in verification links.
pub(super) fn email_hash(email: &str) -> String {
    hex_encode(&Sha256::digest(email.as_bytes()))
}

/// Sign `{id}.{hash}.{expires}` with the app key.
pub(super) fn sign_verification(
    app_key: &str,
    user_id: i64,
    email_hash: &str,
    expires: i64,
) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(app_key.as_bytes())
        .map_err(|err| anyhow!("invalid signing key: {err}"))?;
    mac.update(format!("{user_id}.{email_hash}.{expires}").as_bytes());
    Ok(hex_encode(&mac.finalize().into_bytes()))
}

/// Constant-time check of an incoming signature against a fresh computation.
pub(super) fn signature_matches(
    app_key: &str,
    user_id: i64,
    email_hash: &str,
    expires: i64,
    candidate: &str,
) -> bool {
    let Ok(expected) = sign_verification(app_key, user_id, email_hash, expires) else {
        return false;
    };
    constant_time_eq(expected.as_bytes(), candidate.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Build both verification links with a fresh expiry.
pub(super) fn build_verification_links(
    config: &AuthConfig,
    user_id: i64,
    email: &str,
) -> Result<VerificationLinks> {
    let hash = email_hash(email);
    let expires = Utc::now().timestamp() + config.verification_ttl_minutes() * 60;
    let signature = sign_verification(config.app_key(), user_id, &hash, expires)?;

    let api_url = format!(
        "/api/auth/email/verify/{user_id}/{hash}?expires={expires}&signature={signature}"
    );
    let spa_url = rewrite_to_spa(config.frontend_base_url(), &api_url)
        .ok_or_else(|| anyhow!("failed to rewrite verification link"))?;

    Ok(VerificationLinks { api_url, spa_url })
}

/// Reattach the signed query parameters to the SPA verification path.
///
/// Pure string transformation: the last two path segments (`id`, `hash`) and
/// the query string are carried over untouched.
pub(super) fn rewrite_to_spa(frontend_base_url: &str, api_url: &str) -> Option<String> {
    let (path, query) = match api_url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (api_url, None),
    };

    let mut segments = path.trim_end_matches('/').rsplit('/');
    let hash = segments.next().filter(|s| !s.is_empty())?;
    let id = segments.next().filter(|s| !s.is_empty())?;

    let base = frontend_base_url.trim_end_matches('/');
    let mut rewritten = format!("{base}/email/verify/{id}/{hash}");
    if let Some(query) = query {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    Some(rewritten)
}

/// Frontend link for password-reset emails; the raw token travels only here.
pub(super) fn reset_password_url(frontend_base_url: &str, token: &str, email: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    let encoded_email: String = form_urlencoded::byte_serialize(email.as_bytes()).collect();
    format!("{base}/password/reset?token={token}&email={encoded_email}")
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    const APP_KEY: &str = "test-app-key";

    fn config() -> AuthConfig {
        AuthConfig::new(
            "https://app.example.com".to_string(),
            SecretString::from(APP_KEY.to_string()),
        )
    }

    #[test]
    fn email_hash_is_hex_sha256() {
        let hash = email_hash("alice@example.com");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, email_hash("alice@example.com"));
        assert_ne!(hash, email_hash("bob@example.com"));
    }

    #[test]
    fn signature_round_trip() -> Result<()> {
        let hash = email_hash("alice@example.com");
        let signature = sign_verification(APP_KEY, 7, &hash, 1_700_000_000)?;
        assert!(signature_matches(APP_KEY, 7, &hash, 1_700_000_000, &signature));
        Ok(())
    }

    #[test]
    fn signature_rejects_tampering() -> Result<()> {
        let hash = email_hash("alice@example.com");
        let signature = sign_verification(APP_KEY, 7, &hash, 1_700_000_000)?;

        assert!(!signature_matches(APP_KEY, 8, &hash, 1_700_000_000, &signature));
        assert!(!signature_matches(APP_KEY, 7, &hash, 1_700_000_001, &signature));
        assert!(!signature_matches(
            APP_KEY,
            7,
            &email_hash("bob@example.com"),
            1_700_000_000,
            &signature
        ));
        assert!(!signature_matches(APP_KEY, 7, &hash, 1_700_000_000, "deadbeef"));
        Ok(())
    }

    #[test]
    fn build_links_share_query_parameters() -> Result<()> {
        let links = build_verification_links(&config(), 7, "alice@example.com")?;
        assert!(links.api_url.starts_with("/api/auth/email/verify/7/"));
        assert!(links
            .spa_url
            .starts_with("https://app.example.com/email/verify/7/"));

        let api_query = links.api_url.split_once('?').map(|(_, q)| q);
        let spa_query = links.spa_url.split_once('?').map(|(_, q)| q);
        assert_eq!(api_query, spa_query);
        assert!(api_query.is_some_and(|q| q.contains("expires=") && q.contains("signature=")));
        Ok(())
    }

    #[test]
    fn rewrite_keeps_id_hash_and_query() {
        let rewritten = rewrite_to_spa(
            "https://app.example.com/",
            "/api/auth/email/verify/42/abcdef?expires=123&signature=beef",
        );
        assert_eq!(
            rewritten.as_deref(),
            Some("https://app.example.com/email/verify/42/abcdef?expires=123&signature=beef")
        );
    }

    #[test]
    fn rewrite_rejects_malformed_paths() {
        assert!(rewrite_to_spa("https://app.example.com", "/").is_none());
        assert!(rewrite_to_spa("https://app.example.com", "").is_none());
    }

    #[test]
    fn reset_url_percent_encodes_email() {
        let url = reset_password_url("https://app.example.com", "tok123", "josé@x.com");
        assert_eq!(
            url,
            "https://app.example.com/password/reset?token=tok123&email=jos%C3%A9%40x.com"
        );
    }
}
