//! Auth state and configuration shared across handlers.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use super::rate_limit::RateLimiter;
use crate::totp::crypto::derive_key;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_REMEMBER_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_CHALLENGE_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_PASSWORD_CONFIRM_TTL_SECONDS: i64 = 3 * 60 * 60;
const DEFAULT_VERIFICATION_TTL_MINUTES: i64 = 60;
const DEFAULT_TOTP_ISSUER: &str = "Eniro";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    app_key: SecretString,
    totp_issuer: String,
    session_ttl_seconds: i64,
    remember_ttl_seconds: i64,
    challenge_ttl_seconds: i64,
    password_confirm_ttl_seconds: i64,
    verification_ttl_minutes: i64,
    sealing_key: [u8; 32],
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String, app_key: SecretString) -> Self {
        let sealing_key = derive_key(app_key.expose_secret());
        Self {
            frontend_base_url,
            app_key,
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            remember_ttl_seconds: DEFAULT_REMEMBER_TTL_SECONDS,
            challenge_ttl_seconds: DEFAULT_CHALLENGE_TTL_SECONDS,
            password_confirm_ttl_seconds: DEFAULT_PASSWORD_CONFIRM_TTL_SECONDS,
            verification_ttl_minutes: DEFAULT_VERIFICATION_TTL_MINUTES,
            sealing_key,
        }
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: String) -> Self {
        self.totp_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_remember_ttl_seconds(mut self, seconds: i64) -> Self {
        self.remember_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_challenge_ttl_seconds(mut self, seconds: i64) -> Self {
        self.challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_password_confirm_ttl_seconds(mut self, seconds: i64) -> Self {
        self.password_confirm_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verification_ttl_minutes(mut self, minutes: i64) -> Self {
        self.verification_ttl_minutes = minutes;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(super) fn app_key(&self) -> &str {
        self.app_key.expose_secret()
    }

    pub(super) fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }

    pub(super) fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    pub(super) fn remember_ttl_seconds(&self) -> i64 {
        self.remember_ttl_seconds
    }

    pub(super) fn challenge_ttl_seconds(&self) -> i64 {
        self.challenge_ttl_seconds
    }

    pub(super) fn password_confirm_ttl_seconds(&self) -> i64 {
        self.password_confirm_ttl_seconds
    }

    pub(super) fn verification_ttl_minutes(&self) -> i64 {
        self.verification_ttl_minutes
    }

    /// Key used to seal TOTP secrets and recovery codes at rest.
    pub(super) fn sealing_key(&self) -> &[u8; 32] {
        &self.sealing_key
    }

    pub(super) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

/// Shared auth state: configuration plus the rate limiter seam.
pub struct AuthState {
    config: AuthConfig,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            config,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::rate_limit::NoopRateLimiter;

    fn config(frontend: &str) -> AuthConfig {
        AuthConfig::new(
            frontend.to_string(),
            SecretString::from("test-app-key".to_string()),
        )
    }

    #[test]
    fn cookie_secure_follows_frontend_scheme() {
        assert!(config("https://app.example.com").session_cookie_secure());
        assert!(!config("http://localhost:5173").session_cookie_secure());
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = config("https://app.example.com")
            .with_session_ttl_seconds(60)
            .with_remember_ttl_seconds(120)
            .with_challenge_ttl_seconds(30)
            .with_password_confirm_ttl_seconds(90)
            .with_verification_ttl_minutes(5)
            .with_totp_issuer("Example".to_string());

        assert_eq!(config.session_ttl_seconds(), 60);
        assert_eq!(config.remember_ttl_seconds(), 120);
        assert_eq!(config.challenge_ttl_seconds(), 30);
        assert_eq!(config.password_confirm_ttl_seconds(), 90);
        assert_eq!(config.verification_ttl_minutes(), 5);
        assert_eq!(config.totp_issuer(), "Example");
    }

    #[test]
    fn sealing_key_is_stable_per_app_key() {
        let a = config("https://app.example.com");
        let b = config("https://app.example.com");
        assert_eq!(a.sealing_key(), b.sealing_key());
    }

    #[test]
    fn state_exposes_config_and_limiter() {
        let state = AuthState::new(config("https://app.example.com"), Arc::new(NoopRateLimiter));
        assert!(state.config().session_cookie_secure());
        let _ = state.rate_limiter();
    }
}
