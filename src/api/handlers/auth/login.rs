//! Login and logout endpoints.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::password::verify_password;

use super::envelope::{self, AuthEnvelope, UserPayload};
use super::principal;
use super::rate_limit::{login_key, RateLimitAction, RateLimitDecision};
use super::session::{
    clear_session_cookie, extract_session_token, issue_session, session_cookie, SessionKind,
};
use super::state::AuthState;
use super::storage::{delete_session, find_user_by_email};
use super::types::LoginRequest;
use super::utils::{extract_client_ip, extract_user_agent, hash_session_token, normalize_email};
use super::validation::{validate_email_shape, FieldErrors, VALIDATION_FAILED};

const CREDENTIALS_MISMATCH: &str = "These credentials do not match our records.";

/// Password login. Two-factor accounts get a challenge session instead of a
/// full one; the envelope carries the `two_factor` marker.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session established or challenge pending", body = AuthEnvelope),
        (status = 400, description = "Already authenticated", body = AuthEnvelope),
        (status = 422, description = "Validation or credential failure", body = AuthEnvelope),
        (status = 429, description = "Rate limited", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
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
    if request.password.is_empty() {
        field_errors.add("password", "The password field is required.");
    }
    if !field_errors.is_empty() {
        return envelope::validation_failed(VALIDATION_FAILED, field_errors.into_map());
    }

    let client_ip = extract_client_ip(&headers);
    let bucket = login_key(&email, client_ip.as_deref());
    if let RateLimitDecision::Limited {
        retry_after_seconds,
    } = auth_state
        .rate_limiter()
        .check(RateLimitAction::Login, &bucket)
    {
        return envelope::throttled(retry_after_seconds);
    }

    let user = match find_user_by_email(&pool, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => return credentials_mismatch(),
        Err(err) => {
            error!("Failed to lookup user for login: {err}");
            return envelope::server_error("Login failed");
        }
    };

    match verify_password(&request.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => return credentials_mismatch(),
        Err(err) => {
            error!("Failed to verify password: {err}");
            return envelope::server_error("Login failed");
        }
    }

    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(err) => {
            error!("Failed to acquire connection for login: {err}");
            return envelope::server_error("Login failed");
        }
    };

    let user_agent = extract_user_agent(&headers);
    let kind = if user.two_factor_enabled() {
        SessionKind::TwoFactorChallenge
    } else {
        SessionKind::Full
    };

    let (token, max_age) = match issue_session(
        &mut conn,
        auth_state.config(),
        user.id,
        kind,
        request.remember,
        client_ip.as_deref(),
        user_agent.as_deref(),
    )
    .await
    {
        Ok(issued) => issued,
        Err(err) => {
            error!("Failed to create session: {err}");
            return envelope::server_error("Login failed");
        }
    };

    let mut response_headers = HeaderMap::new();
    match session_cookie(auth_state.config(), &token, max_age) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return envelope::server_error("Login failed");
        }
    }

    let body = if kind == SessionKind::TwoFactorChallenge {
        AuthEnvelope::two_factor_pending("Two-factor authentication required")
    } else {
        AuthEnvelope::ok_with_user(login_message(user.email_verified()), UserPayload::from(&user))
    };

    (StatusCode::OK, response_headers, Json(body)).into_response()
}

fn login_message(email_verified: bool) -> &'static str {
    if email_verified {
        "Login successful"
    } else {
        "Login successful. Please verify your email address."
    }
}

fn credentials_mismatch() -> Response {
    let mut field_errors = FieldErrors::new();
    field_errors.add("email", CREDENTIALS_MISMATCH);
    envelope::validation_failed(CREDENTIALS_MISMATCH, field_errors.into_map())
}

/// Ends the session. Idempotent: an anonymous call still clears the cookie.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Session cleared", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    if let Some(token) = extract_session_token(&headers) {
        let token_hash = hash_session_token(&token);
        if let Err(err) = delete_session(&pool, &token_hash).await {
            error!("Failed to delete session: {err}");
        }
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (
        StatusCode::OK,
        response_headers,
        Json(AuthEnvelope::ok("Logged out successfully")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_message_depends_on_verification() {
        assert_eq!(login_message(true), "Login successful");
        assert_eq!(
            login_message(false),
            "Login successful. Please verify your email address."
        );
    }

    #[test]
    fn credentials_mismatch_is_422() {
        let response = credentials_mismatch();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
