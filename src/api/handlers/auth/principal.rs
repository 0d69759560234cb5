//! Session principals and the request gates built on them.

use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use chrono::Utc;
use sqlx::PgPool;
use tracing::error;

use super::envelope;
use super::session::{extract_session_token, SessionKind};
use super::state::AuthConfig;
use super::storage::{find_session_with_user, SessionRecord, UserRecord};
use super::utils::hash_session_token;

/// An authenticated request context: the session row plus its account.
pub(crate) struct Principal {
    pub(crate) session: SessionRecord,
    pub(crate) user: UserRecord,
}

/// Resolve the presented token into a principal of the given kind.
///
/// Returns `Ok(None)` when the cookie is missing, invalid, expired, or of a
/// different kind than the token prefix claims.
async fn resolve(
    headers: &HeaderMap,
    pool: &PgPool,
    kind: SessionKind,
) -> Result<Option<Principal>, StatusCode> {
    let Some(token) = extract_session_token(headers) else {
        return Ok(None);
    };
    if SessionKind::from_token(&token) != kind {
        return Ok(None);
    }
    // Only the hash is stored; never compare raw tokens against the database.
    let token_hash = hash_session_token(&token);
    match find_session_with_user(pool, &token_hash).await {
        Ok(Some((session, user))) => {
            // Prefix and stored kind must agree before the row is trusted.
            if session.kind != kind {
                return Ok(None);
            }
            Ok(Some(Principal { session, user }))
        }
        Ok(None) => Ok(None),
        Err(err) => {
            error!("Failed to lookup session: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Resolve a full session, if one is presented.
pub(crate) async fn current_user(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<Option<Principal>, StatusCode> {
    resolve(headers, pool, SessionKind::Full).await
}

/// Resolve a pending two-factor challenge session, if one is presented.
pub(super) async fn current_challenge(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<Option<Principal>, StatusCode> {
    resolve(headers, pool, SessionKind::TwoFactorChallenge).await
}

/// Gate for authenticated endpoints: full session or a 401 envelope.
pub(super) async fn require_user(headers: &HeaderMap, pool: &PgPool) -> Result<Principal, Response> {
    match current_user(headers, pool).await {
        Ok(Some(principal)) => Ok(principal),
        Ok(None) => Err(envelope::unauthenticated()),
        Err(_) => Err(envelope::server_error("Authentication failed")),
    }
}

/// Whether the session's password confirmation is still fresh.
pub(super) fn password_confirmed_recently(session: &SessionRecord, config: &AuthConfig) -> bool {
    session.password_confirmed_at.is_some_and(|confirmed_at| {
        let age = Utc::now().signed_duration_since(confirmed_at);
        age.num_seconds() < config.password_confirm_ttl_seconds()
    })
}

/// Gate for sensitive endpoints: full session plus a recent password
/// confirmation, else a 423 envelope.
pub(super) async fn require_confirmed(
    headers: &HeaderMap,
    pool: &PgPool,
    config: &AuthConfig,
) -> Result<Principal, Response> {
    let principal = require_user(headers, pool).await?;
    if !password_confirmed_recently(&principal.session, config) {
        return Err(envelope::confirmation_required());
    }
    Ok(principal)
}

/// Gate for guest-only endpoints: a live full session answers 400.
///
/// A pending challenge session does not count; re-login replaces it.
pub(super) async fn reject_authenticated(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<(), Response> {
    match current_user(headers, pool).await {
        Ok(Some(_)) => Err(envelope::already_authenticated()),
        Ok(None) => Ok(()),
        Err(_) => Err(envelope::server_error("Authentication failed")),
    }
}
