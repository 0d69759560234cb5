//! Profile and password updates for the signed-in account.
//!
//! Both sit behind the recent password confirmation gate. An email change
//! drops the verification stamp and queues a fresh signed link; a password
//! change revokes every other session of the account.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::password::{hash_password, verify_password};

use super::confirm::password_incorrect;
use super::envelope::{self, AuthEnvelope, UserPayload};
use super::principal;
use super::register::{EMAIL_TAKEN, VERIFY_EMAIL_TEMPLATE};
use super::signing::build_verification_links;
use super::state::AuthState;
use super::storage::{
    delete_sessions_for_user, enqueue_email, update_password as store_password, update_profile,
};
use super::types::{UpdatePasswordRequest, UpdateProfileRequest};
use super::utils::normalize_email;
use super::validation::{
    validate_email_shape, validate_name, validate_password_pair, FieldErrors, VALIDATION_FAILED,
};

/// Updates name and email. Changing the email restarts verification.
#[utoipa::path(
    put,
    path = "/api/auth/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = AuthEnvelope),
        (status = 401, description = "Unauthenticated", body = AuthEnvelope),
        (status = 422, description = "Validation failure or email taken", body = AuthEnvelope),
        (status = 423, description = "Password confirmation required", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn update_profile_handler(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<UpdateProfileRequest>>,
) -> Response {
    let principal =
        match principal::require_confirmed(&headers, &pool, auth_state.config()).await {
            Ok(principal) => principal,
            Err(response) => return response,
        };

    let Some(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(AuthEnvelope::error("Missing payload")),
        )
            .into_response();
    };

    let name = request.name.trim().to_string();
    let email = normalize_email(&request.email);
    let mut field_errors = FieldErrors::new();
    validate_name(&mut field_errors, &name);
    validate_email_shape(&mut field_errors, &email);
    if !field_errors.is_empty() {
        return envelope::validation_failed(VALIDATION_FAILED, field_errors.into_map());
    }

    let email_changed = email != principal.user.email;
    let updated = match update_profile(&pool, principal.user.id, &name, &email, email_changed).await
    {
        Ok(Some(user)) => user,
        Ok(None) => {
            let mut field_errors = FieldErrors::new();
            field_errors.add("email", EMAIL_TAKEN);
            return envelope::validation_failed(EMAIL_TAKEN, field_errors.into_map());
        }
        Err(err) => {
            error!("Failed to update profile: {err}");
            return envelope::server_error("Profile update failed");
        }
    };

    if email_changed {
        if let Err(err) = queue_fresh_verification(&pool, &auth_state, &updated).await {
            // The profile change is already committed; the user can resend.
            error!("Failed to enqueue verification email: {err}");
        }
    }

    (
        StatusCode::OK,
        Json(AuthEnvelope::ok_with_user(
            "Profile updated successfully",
            UserPayload::from(&updated),
        )),
    )
        .into_response()
}

async fn queue_fresh_verification(
    pool: &PgPool,
    auth_state: &AuthState,
    user: &super::storage::UserRecord,
) -> anyhow::Result<()> {
    let links = build_verification_links(auth_state.config(), user.id, &user.email)?;
    let payload = json!({
        "name": user.name,
        "verify_url": links.spa_url,
        "api_url": links.api_url,
    });
    let mut conn = pool.acquire().await?;
    enqueue_email(
        &mut conn,
        Some(user.id),
        &user.email,
        VERIFY_EMAIL_TEMPLATE,
        &payload,
    )
    .await
}

/// Changes the password after re-checking the current one. Other sessions
/// are revoked; the current one stays.
#[utoipa::path(
    put,
    path = "/api/auth/password",
    request_body = UpdatePasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = AuthEnvelope),
        (status = 401, description = "Unauthenticated", body = AuthEnvelope),
        (status = 422, description = "Wrong current password or validation failure", body = AuthEnvelope),
        (status = 423, description = "Password confirmation required", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn update_password_handler(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<UpdatePasswordRequest>>,
) -> Response {
    let principal =
        match principal::require_confirmed(&headers, &pool, auth_state.config()).await {
            Ok(principal) => principal,
            Err(response) => return response,
        };

    let Some(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(AuthEnvelope::error("Missing payload")),
        )
            .into_response();
    };

    match verify_password(&request.current_password, &principal.user.password_hash) {
        Ok(true) => {}
        Ok(false) => return password_incorrect(),
        Err(err) => {
            error!("Failed to verify password: {err}");
            return envelope::server_error("Password update failed");
        }
    }

    let mut field_errors = FieldErrors::new();
    validate_password_pair(
        &mut field_errors,
        &request.password,
        &request.password_confirmation,
    );
    if !field_errors.is_empty() {
        return envelope::validation_failed(VALIDATION_FAILED, field_errors.into_map());
    }

    let password_hash = match hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err}");
            return envelope::server_error("Password update failed");
        }
    };

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to begin transaction: {err}");
            return envelope::server_error("Password update failed");
        }
    };
    if let Err(err) = store_password(&mut tx, principal.user.id, &password_hash).await {
        error!("Failed to update password: {err}");
        return envelope::server_error("Password update failed");
    }
    if let Err(err) =
        delete_sessions_for_user(&mut tx, principal.user.id, Some(principal.session.id)).await
    {
        error!("Failed to revoke other sessions: {err}");
        return envelope::server_error("Password update failed");
    }
    if let Err(err) = tx.commit().await {
        error!("Failed to commit password update: {err}");
        return envelope::server_error("Password update failed");
    }

    (
        StatusCode::OK,
        Json(AuthEnvelope::ok("Password updated successfully")),
    )
        .into_response()
}
