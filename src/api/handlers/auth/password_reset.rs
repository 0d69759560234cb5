//! Password reset request and completion.
//!
//! The forgot endpoint answers the same envelope whether or not the account
//! exists. Raw reset tokens travel only in the emailed link; the table holds
//! their SHA-256 digest.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::password::hash_password;

use super::envelope::{self, AuthEnvelope};
use super::principal;
use super::signing::reset_password_url;
use super::state::AuthState;
use super::storage::{
    delete_password_reset_token, delete_sessions_for_user, enqueue_email,
    find_password_reset_token, find_user_by_email, update_password, upsert_password_reset_token,
};
use super::types::{ForgotPasswordRequest, ResetPasswordRequest};
use super::utils::{generate_reset_token, hash_reset_token, normalize_email};
use super::validation::{
    validate_email_shape, validate_password_pair, FieldErrors, VALIDATION_FAILED,
};

const RESET_LINK_SENT: &str = "Password reset link sent";
const INVALID_TOKEN: &str = "This password reset token is invalid.";
const RESET_TOKEN_TTL_MINUTES: i64 = 60;
const RESET_PASSWORD_TEMPLATE: &str = "reset_password";

/// Sends a reset link when the account exists. The response does not reveal
/// whether it did.
#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset link sent if the account exists", body = AuthEnvelope),
        (status = 400, description = "Already authenticated", body = AuthEnvelope),
        (status = 422, description = "Validation failure", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Response {
    if let Err(response) = principal::reject_authenticated(&headers, &pool).await {
        return response;
    }

    let Some(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(AuthEnvelope::error("Missing payload")),
        )
            .into_response();
    };

    let email = normalize_email(&request.email);
    let mut field_errors = FieldErrors::new();
    validate_email_shape(&mut field_errors, &email);
    if !field_errors.is_empty() {
        return envelope::validation_failed(VALIDATION_FAILED, field_errors.into_map());
    }

    let user = match find_user_by_email(&pool, &email).await {
        Ok(Some(user)) => user,
        // Same envelope as the success path: no account enumeration.
        Ok(None) => return reset_link_sent(),
        Err(err) => {
            error!("Failed to lookup user for password reset: {err}");
            return envelope::server_error("Failed to send password reset link");
        }
    };

    let token = match generate_reset_token() {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to generate reset token: {err}");
            return envelope::server_error("Failed to send password reset link");
        }
    };
    let token_hash = hash_reset_token(&token);
    if let Err(err) = upsert_password_reset_token(&pool, &email, &token_hash).await {
        error!("Failed to store reset token: {err}");
        return envelope::server_error("Failed to send password reset link");
    }

    let reset_url = reset_password_url(auth_state.config().frontend_base_url(), &token, &email);
    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(err) => {
            error!("Failed to acquire connection: {err}");
            return envelope::server_error("Failed to send password reset link");
        }
    };
    let payload = json!({
        "name": user.name,
        "reset_url": reset_url,
    });
    if let Err(err) = enqueue_email(
        &mut conn,
        Some(user.id),
        &email,
        RESET_PASSWORD_TEMPLATE,
        &payload,
    )
    .await
    {
        error!("Failed to enqueue reset email: {err}");
        return envelope::server_error("Failed to send password reset link");
    }

    reset_link_sent()
}

/// Completes a reset: token digest, email, and TTL must all line up. Every
/// other session of the account is revoked.
#[utoipa::path(
    post,
    path = "/api/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset", body = AuthEnvelope),
        (status = 400, description = "Already authenticated", body = AuthEnvelope),
        (status = 422, description = "Invalid token or validation failure", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    _auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Response {
    if let Err(response) = principal::reject_authenticated(&headers, &pool).await {
        return response;
    }

    let Some(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(AuthEnvelope::error("Missing payload")),
        )
            .into_response();
    };

    let email = normalize_email(&request.email);
    let mut field_errors = FieldErrors::new();
    validate_email_shape(&mut field_errors, &email);
    validate_password_pair(
        &mut field_errors,
        &request.password,
        &request.password_confirmation,
    );
    if request.token.trim().is_empty() {
        field_errors.add("token", "The token field is required.");
    }
    if !field_errors.is_empty() {
        return envelope::validation_failed(VALIDATION_FAILED, field_errors.into_map());
    }

    let record = match find_password_reset_token(&pool, &email).await {
        Ok(Some(record)) => record,
        Ok(None) => return invalid_token(),
        Err(err) => {
            error!("Failed to lookup reset token: {err}");
            return envelope::server_error("Password reset failed");
        }
    };

    let submitted_hash = hash_reset_token(request.token.trim());
    if !digests_match(&record.token_hash, &submitted_hash) {
        return invalid_token();
    }
    let age = Utc::now().signed_duration_since(record.created_at);
    if age > Duration::minutes(RESET_TOKEN_TTL_MINUTES) {
        return invalid_token();
    }

    let user = match find_user_by_email(&pool, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => return invalid_token(),
        Err(err) => {
            error!("Failed to lookup user for reset: {err}");
            return envelope::server_error("Password reset failed");
        }
    };

    let password_hash = match hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err}");
            return envelope::server_error("Password reset failed");
        }
    };

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to begin transaction: {err}");
            return envelope::server_error("Password reset failed");
        }
    };
    if let Err(err) = update_password(&mut tx, user.id, &password_hash).await {
        error!("Failed to update password: {err}");
        return envelope::server_error("Password reset failed");
    }
    if let Err(err) = delete_password_reset_token(&mut tx, &email).await {
        error!("Failed to delete reset token: {err}");
        return envelope::server_error("Password reset failed");
    }
    // A reset proves account ownership; older sessions may be the attacker's.
    if let Err(err) = delete_sessions_for_user(&mut tx, user.id, None).await {
        error!("Failed to revoke sessions: {err}");
        return envelope::server_error("Password reset failed");
    }
    if let Err(err) = tx.commit().await {
        error!("Failed to commit password reset: {err}");
        return envelope::server_error("Password reset failed");
    }

    (
        StatusCode::OK,
        Json(AuthEnvelope::ok("Password reset successfully")),
    )
        .into_response()
}

fn reset_link_sent() -> Response {
    (StatusCode::OK, Json(AuthEnvelope::ok(RESET_LINK_SENT))).into_response()
}

fn invalid_token() -> Response {
    let mut field_errors = FieldErrors::new();
    field_errors.add("email", INVALID_TOKEN);
    envelope::validation_failed(INVALID_TOKEN, field_errors.into_map())
}

fn digests_match(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digests_match_requires_equality() {
        assert!(digests_match(&[1, 2, 3], &[1, 2, 3]));
        assert!(!digests_match(&[1, 2, 3], &[1, 2, 4]));
        assert!(!digests_match(&[1, 2], &[1, 2, 3]));
    }

    #[test]
    fn invalid_token_is_422() {
        assert_eq!(invalid_token().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn reset_link_sent_is_200() {
        assert_eq!(reset_link_sent().status(), StatusCode::OK);
    }
}
