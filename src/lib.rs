//! # Eniro (Session Authentication for Single-Page Apps)
//!
//! `eniro` is a cookie-session authentication service paired with a headless
//! client layer that mirrors the browser side of the contract.
//!
//! ## Server
//!
//! The axum API covers the full account lifecycle: registration, login with
//! optional TOTP two-factor, email verification via signed links, password
//! reset, password confirmation for sensitive actions, and profile updates.
//!
//! - **Sessions:** Opaque bearer tokens delivered as `HttpOnly` cookies. The
//!   database stores only a SHA-256 digest of the token.
//! - **Envelopes:** Every auth endpoint answers with a uniform JSON envelope
//!   (`success`, `message`, optional `user`) so SPA clients can switch on a
//!   single shape.
//! - **Two-factor:** TOTP secrets and recovery codes are sealed at rest with
//!   ChaCha20-Poly1305 under the application key. Login with two-factor
//!   enabled hands out a short-lived challenge session instead of a full one.
//! - **Email:** Verification and reset mail goes through a transactional
//!   outbox drained by a background worker, with links rewritten to point at
//!   the frontend SPA.
//!
//! ## Client
//!
//! The [`client`] module implements the SPA-side state machine: an auth store,
//! a navigation guard, and an HTTP layer that handles CSRF double-submit and
//! transparent password-confirmation retries.

pub mod api;
pub mod cli;
pub mod client;
pub mod password;
pub mod totp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        // Should be a hex string (full SHA-1 is 40 chars, but could be short)
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
