//! Session cookie plumbing: kinds, tokens, and Set-Cookie values.
//!
//! One cookie carries both session kinds. Challenge tokens are prefixed with
//! `2fa_` so the kind is recoverable from the cookie alone, then verified
//! against the stored row.

use anyhow::Result;
use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION},
    HeaderMap, HeaderValue,
};
use sqlx::PgConnection;

use super::state::AuthConfig;
use super::storage;

pub(super) const SESSION_COOKIE_NAME: &str = "eniro_session";

/// Prefix for two-factor challenge session tokens.
pub(crate) const CHALLENGE_TOKEN_PREFIX: &str = "2fa_";

/// Session kinds used to gate the two-factor login flow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum SessionKind {
    /// Full session with normal access.
    Full,
    /// Password accepted, TOTP challenge still pending.
    TwoFactorChallenge,
}

impl SessionKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::TwoFactorChallenge => "two_factor_challenge",
        }
    }

    pub(crate) fn from_db(value: &str) -> Self {
        if value == "two_factor_challenge" {
            Self::TwoFactorChallenge
        } else {
            Self::Full
        }
    }

    /// Classify a session token by its prefix.
    pub(crate) fn from_token(token: &str) -> Self {
        if token.starts_with(CHALLENGE_TOKEN_PREFIX) {
            Self::TwoFactorChallenge
        } else {
            Self::Full
        }
    }
}

/// Create a session row and return the raw token plus its cookie max-age.
pub(super) async fn issue_session(
    conn: &mut PgConnection,
    config: &AuthConfig,
    user_id: i64,
    kind: SessionKind,
    remember: bool,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<(String, i64)> {
    let ttl_seconds = match kind {
        SessionKind::TwoFactorChallenge => config.challenge_ttl_seconds(),
        SessionKind::Full if remember => config.remember_ttl_seconds(),
        SessionKind::Full => config.session_ttl_seconds(),
    };
    let token = storage::insert_session(
        conn,
        user_id,
        kind,
        remember,
        ttl_seconds,
        ip_address,
        user_agent,
    )
    .await?;
    Ok((token, ttl_seconds))
}

/// Build a secure `HttpOnly` cookie for the session token.
pub(super) fn session_cookie(
    config: &AuthConfig,
    token: &str,
    max_age_seconds: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    // Only mark cookies secure when the frontend is served over HTTPS.
    let secure = config.session_cookie_secure();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = config.session_cookie_secure();
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Read the session token from the Authorization header or cookie jar.
pub(super) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(AUTHORIZATION)?;
    let value = header.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config(frontend: &str) -> AuthConfig {
        AuthConfig::new(
            frontend.to_string(),
            SecretString::from("test-app-key".to_string()),
        )
    }

    #[test]
    fn session_kind_from_token_classifies_prefix() {
        assert_eq!(
            SessionKind::from_token(&format!("{CHALLENGE_TOKEN_PREFIX}token")),
            SessionKind::TwoFactorChallenge
        );
        assert_eq!(SessionKind::from_token("plain"), SessionKind::Full);
    }

    #[test]
    fn session_kind_round_trips_through_db_column() {
        for kind in [SessionKind::Full, SessionKind::TwoFactorChallenge] {
            assert_eq!(SessionKind::from_db(kind.as_str()), kind);
        }
    }

    #[test]
    fn cookie_is_secure_only_for_https_frontend() -> anyhow::Result<()> {
        let secure = session_cookie(&config("https://app.example.com"), "token", 60)?;
        assert!(secure.to_str()?.contains("; Secure"));
        assert!(secure.to_str()?.contains("HttpOnly"));
        assert!(secure.to_str()?.contains("SameSite=Lax"));

        let insecure = session_cookie(&config("http://localhost:5173"), "token", 60)?;
        assert!(!insecure.to_str()?.contains("; Secure"));
        Ok(())
    }

    #[test]
    fn clear_cookie_zeroes_max_age() -> anyhow::Result<()> {
        let cleared = clear_session_cookie(&config("http://localhost:5173"))?;
        assert!(cleared.to_str()?.contains("Max-Age=0"));
        assert!(cleared.to_str()?.starts_with("eniro_session=;"));
        Ok(())
    }

    #[test]
    fn extract_token_prefers_bearer_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-auth"));
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("eniro_session=from-cookie"),
        );
        assert_eq!(
            extract_session_token(&headers),
            Some("from-auth".to_string())
        );
    }

    #[test]
    fn extract_token_parses_cookie_pairs() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("other=1; eniro_session=the-token; more=2"),
        );
        assert_eq!(
            extract_session_token(&headers),
            Some("the-token".to_string())
        );
    }

    #[test]
    fn extract_token_ignores_empty_values() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("eniro_session="),
        );
        assert_eq!(extract_session_token(&headers), None);
    }
}
