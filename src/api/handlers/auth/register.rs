//! Account registration.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::password::hash_password;

use super::envelope::{self, AuthEnvelope, UserPayload};
use super::principal;
use super::session::{issue_session, session_cookie, SessionKind};
use super::signing::build_verification_links;
use super::state::AuthState;
use super::storage::{enqueue_email, insert_user};
use super::types::RegisterRequest;
use super::utils::{extract_client_ip, extract_user_agent, normalize_email};
use super::validation::{
    validate_email_shape, validate_name, validate_password_pair, FieldErrors, VALIDATION_FAILED,
};

pub(super) const EMAIL_TAKEN: &str = "The email has already been taken.";
pub(super) const VERIFY_EMAIL_TEMPLATE: &str = "verify_email";

/// Creates the account, queues the verification email, and signs the new
/// user in. Everything lands in one transaction so a failed email enqueue
/// does not leave a half-registered account.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created and signed in", body = AuthEnvelope),
        (status = 400, description = "Already authenticated", body = AuthEnvelope),
        (status = 422, description = "Validation failure or email taken", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
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

    let name = request.name.trim().to_string();
    let email = normalize_email(&request.email);
    let mut field_errors = FieldErrors::new();
    validate_name(&mut field_errors, &name);
    validate_email_shape(&mut field_errors, &email);
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
            return envelope::server_error("Registration failed");
        }
    };

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to begin transaction: {err}");
            return envelope::server_error("Registration failed");
        }
    };

    let user = match insert_user(&mut tx, &name, &email, &password_hash).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            let mut field_errors = FieldErrors::new();
            field_errors.add("email", EMAIL_TAKEN);
            return envelope::validation_failed(EMAIL_TAKEN, field_errors.into_map());
        }
        Err(err) => {
            error!("Failed to insert user: {err}");
            return envelope::server_error("Registration failed");
        }
    };

    let links = match build_verification_links(auth_state.config(), user.id, &user.email) {
        Ok(links) => links,
        Err(err) => {
            error!("Failed to build verification links: {err}");
            return envelope::server_error("Registration failed");
        }
    };
    let payload = json!({
        "name": user.name,
        "verify_url": links.spa_url,
        "api_url": links.api_url,
    });
    if let Err(err) =
        enqueue_email(&mut tx, Some(user.id), &user.email, VERIFY_EMAIL_TEMPLATE, &payload).await
    {
        error!("Failed to enqueue verification email: {err}");
        return envelope::server_error("Registration failed");
    }

    let client_ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);
    let issued = issue_session(
        &mut tx,
        auth_state.config(),
        user.id,
        SessionKind::Full,
        false,
        client_ip.as_deref(),
        user_agent.as_deref(),
    )
    .await;
    let (token, max_age) = match issued {
        Ok(issued) => issued,
        Err(err) => {
            error!("Failed to create session: {err}");
            return envelope::server_error("Registration failed");
        }
    };

    if let Err(err) = tx.commit().await {
        error!("Failed to commit registration: {err}");
        return envelope::server_error("Registration failed");
    }

    let mut response_headers = HeaderMap::new();
    match session_cookie(auth_state.config(), &token, max_age) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return envelope::server_error("Registration failed");
        }
    }

    (
        StatusCode::CREATED,
        response_headers,
        Json(AuthEnvelope::ok_with_user(
            "Registration successful. Please check your email to verify your account.",
            UserPayload::from(&user),
        )),
    )
        .into_response()
}
