//! Signed email verification links and the resend endpoint.
//!
//! Links are minted by `signing` and verified here without any stored
//! state: the HMAC covers the user id, the email hash, and the expiry.

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::envelope::{self, AuthEnvelope};
use super::principal;
use super::rate_limit::{verification_key, RateLimitAction, RateLimitDecision};
use super::register::VERIFY_EMAIL_TEMPLATE;
use super::signing::{build_verification_links, email_hash, signature_matches};
use super::state::AuthState;
use super::storage::{enqueue_email, mark_email_verified};
use super::utils::extract_client_ip;

const INVALID_LINK: &str = "The verification link is invalid or has expired.";

#[derive(Debug, Default, Deserialize)]
pub struct VerifyEmailQuery {
    #[serde(default)]
    expires: i64,
    #[serde(default)]
    signature: String,
}

/// Consumes a signed verification link for the signed-in user.
#[utoipa::path(
    get,
    path = "/api/auth/email/verify/{id}/{hash}",
    params(
        ("id" = i64, Path, description = "User id the link was minted for"),
        ("hash" = String, Path, description = "Hex SHA-256 of the email address"),
        ("expires" = i64, Query, description = "Unix expiry timestamp"),
        ("signature" = String, Query, description = "Hex HMAC over id, hash, and expiry")
    ),
    responses(
        (status = 200, description = "Email verified or already verified", body = AuthEnvelope),
        (status = 401, description = "Unauthenticated", body = AuthEnvelope),
        (status = 422, description = "Invalid or expired link", body = AuthEnvelope),
        (status = 429, description = "Rate limited", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    headers: HeaderMap,
    Path((user_id, hash)): Path<(i64, String)>,
    query: Query<VerifyEmailQuery>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let principal = match principal::require_user(&headers, &pool).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    let client_ip = extract_client_ip(&headers);
    let bucket = verification_key(Some(principal.user.id), client_ip.as_deref());
    if let RateLimitDecision::Limited {
        retry_after_seconds,
    } = auth_state
        .rate_limiter()
        .check(RateLimitAction::EmailVerification, &bucket)
    {
        return envelope::throttled(retry_after_seconds);
    }

    // A link minted for someone else never verifies this session's user.
    if user_id != principal.user.id {
        return invalid_link();
    }
    if query.expires < Utc::now().timestamp() {
        return invalid_link();
    }
    if hash != email_hash(&principal.user.email) {
        return invalid_link();
    }
    if !signature_matches(
        auth_state.config().app_key(),
        user_id,
        &hash,
        query.expires,
        &query.signature,
    ) {
        return invalid_link();
    }

    match mark_email_verified(&pool, principal.user.id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(AuthEnvelope::ok("Email verified successfully")),
        )
            .into_response(),
        Ok(false) => (
            StatusCode::OK,
            Json(AuthEnvelope::ok("Email already verified")),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to mark email verified: {err}");
            envelope::server_error("Email verification failed")
        }
    }
}

/// Queues a fresh verification email for the signed-in user.
#[utoipa::path(
    post,
    path = "/api/auth/email/verification-notification",
    responses(
        (status = 200, description = "Link sent or email already verified", body = AuthEnvelope),
        (status = 401, description = "Unauthenticated", body = AuthEnvelope),
        (status = 429, description = "Rate limited", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let principal = match principal::require_user(&headers, &pool).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    let client_ip = extract_client_ip(&headers);
    let bucket = verification_key(Some(principal.user.id), client_ip.as_deref());
    if let RateLimitDecision::Limited {
        retry_after_seconds,
    } = auth_state
        .rate_limiter()
        .check(RateLimitAction::EmailVerification, &bucket)
    {
        return envelope::throttled(retry_after_seconds);
    }

    if principal.user.email_verified() {
        return (
            StatusCode::OK,
            Json(AuthEnvelope::ok("Email already verified")),
        )
            .into_response();
    }

    let links = match build_verification_links(
        auth_state.config(),
        principal.user.id,
        &principal.user.email,
    ) {
        Ok(links) => links,
        Err(err) => {
            error!("Failed to build verification links: {err}");
            return envelope::server_error("Failed to send verification link");
        }
    };

    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(err) => {
            error!("Failed to acquire connection: {err}");
            return envelope::server_error("Failed to send verification link");
        }
    };
    let payload = json!({
        "name": principal.user.name,
        "verify_url": links.spa_url,
        "api_url": links.api_url,
    });
    if let Err(err) = enqueue_email(
        &mut conn,
        Some(principal.user.id),
        &principal.user.email,
        VERIFY_EMAIL_TEMPLATE,
        &payload,
    )
    .await
    {
        error!("Failed to enqueue verification email: {err}");
        return envelope::server_error("Failed to send verification link");
    }

    (
        StatusCode::OK,
        Json(AuthEnvelope::ok("Verification link sent")),
    )
        .into_response()
}

fn invalid_link() -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(AuthEnvelope::error(INVALID_LINK)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_link_is_422() {
        assert_eq!(invalid_link().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn query_defaults_fail_closed() {
        let query = VerifyEmailQuery::default();
        assert_eq!(query.expires, 0);
        assert!(query.signature.is_empty());
        assert!(query.expires < Utc::now().timestamp());
    }
}
