//! Step-up password confirmation for sensitive endpoints.
//!
//! A confirmation is stamped onto the session row and stays fresh for the
//! configured window. Gated handlers answer 423 once it goes stale; the
//! client is expected to replay the request after confirming.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::password::verify_password;

use super::envelope::{self, AuthEnvelope};
use super::principal;
use super::state::AuthState;
use super::storage::stamp_password_confirmed;
use super::types::{ConfirmPasswordRequest, ConfirmedPasswordStatusResponse};
use super::validation::FieldErrors;

pub(super) const PASSWORD_INCORRECT: &str = "The provided password is incorrect";

/// Whether the session's password confirmation is still inside the window.
#[utoipa::path(
    get,
    path = "/api/auth/confirmed-password-status",
    responses(
        (status = 200, description = "Confirmation status", body = ConfirmedPasswordStatusResponse),
        (status = 401, description = "Unauthenticated", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn confirmed_password_status(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let principal = match principal::require_user(&headers, &pool).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    let confirmed =
        principal::password_confirmed_recently(&principal.session, auth_state.config());
    (
        StatusCode::OK,
        Json(ConfirmedPasswordStatusResponse { confirmed }),
    )
        .into_response()
}

/// Re-checks the account password and stamps the session.
#[utoipa::path(
    post,
    path = "/api/auth/confirm-password",
    request_body = ConfirmPasswordRequest,
    responses(
        (status = 200, description = "Password confirmed", body = AuthEnvelope),
        (status = 401, description = "Unauthenticated", body = AuthEnvelope),
        (status = 422, description = "Wrong password", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn confirm_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    _auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ConfirmPasswordRequest>>,
) -> Response {
    let principal = match principal::require_user(&headers, &pool).await {
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

    match verify_password(&request.password, &principal.user.password_hash) {
        Ok(true) => {}
        Ok(false) => return password_incorrect(),
        Err(err) => {
            error!("Failed to verify password: {err}");
            return envelope::server_error("Password confirmation failed");
        }
    }

    if let Err(err) = stamp_password_confirmed(&pool, principal.session.id).await {
        error!("Failed to stamp password confirmation: {err}");
        return envelope::server_error("Password confirmation failed");
    }

    (StatusCode::OK, Json(AuthEnvelope::ok("Password confirmed"))).into_response()
}

pub(super) fn password_incorrect() -> Response {
    let mut field_errors = FieldErrors::new();
    field_errors.add("password", PASSWORD_INCORRECT);
    envelope::validation_failed(PASSWORD_INCORRECT, field_errors.into_map())
}
