//! Two-factor challenge completion and authenticator management.
//!
//! The challenge endpoint promotes a pending login; everything else operates
//! on the authenticated account and sits behind the password-confirmation
//! gate. TOTP secrets and recovery codes are sealed before they touch the
//! database and unsealed per request.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::totp::{
    self,
    crypto::{open_string, seal_string, RECOVERY_CODES_CONTEXT, TOTP_SECRET_CONTEXT},
    recovery::{generate_recovery_codes, normalize_recovery_code},
};

use super::envelope::{self, AuthEnvelope, UserPayload};
use super::principal::{self, Principal};
use super::rate_limit::{two_factor_key, RateLimitAction, RateLimitDecision};
use super::session::{issue_session, session_cookie, SessionKind};
use super::state::AuthState;
use super::storage::{self, UserRecord};
use super::types::{
    TwoFactorChallengeRequest, TwoFactorConfirmRequest, TwoFactorQrCodeResponse,
    TwoFactorSecretKeyResponse,
};
use super::utils::{extract_client_ip, extract_user_agent};
use super::validation::{FieldErrors, VALIDATION_FAILED};

const INVALID_CODE: &str = "The provided two factor authentication code was invalid.";
const NOT_ENABLED: &str = "Two-factor authentication is not enabled";

/// Completes a pending login: swaps the challenge session for a full one
/// once a TOTP code or recovery code checks out.
#[utoipa::path(
    post,
    path = "/api/auth/two-factor-challenge",
    request_body = TwoFactorChallengeRequest,
    responses(
        (status = 200, description = "Challenge passed, session established", body = AuthEnvelope),
        (status = 401, description = "No pending challenge", body = AuthEnvelope),
        (status = 422, description = "Invalid code", body = AuthEnvelope),
        (status = 429, description = "Rate limited", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn two_factor_challenge(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TwoFactorChallengeRequest>>,
) -> Response {
    let principal = match principal::current_challenge(&headers, &pool).await {
        Ok(Some(principal)) => principal,
        Ok(None) => return envelope::unauthenticated(),
        Err(status) => return status.into_response(),
    };

    let Some(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(AuthEnvelope::error("Missing payload")),
        )
            .into_response();
    };

    let code = request.code.as_deref().map(str::trim).unwrap_or_default();
    let recovery_code = request
        .recovery_code
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if code.is_empty() && recovery_code.is_empty() {
        let mut field_errors = FieldErrors::new();
        field_errors.add("code", "The code field is required.");
        return envelope::validation_failed(VALIDATION_FAILED, field_errors.into_map());
    }

    let bucket = two_factor_key(principal.session.id);
    if let RateLimitDecision::Limited {
        retry_after_seconds,
    } = auth_state
        .rate_limiter()
        .check(RateLimitAction::TwoFactor, &bucket)
    {
        return envelope::throttled(retry_after_seconds);
    }

    let mut accepted = false;
    if !code.is_empty() {
        match unseal_secret(&auth_state, &principal.user) {
            Ok(Some(secret)) => accepted = totp::verify_code(&secret, code),
            Ok(None) => return invalid_code(),
            Err(err) => {
                error!("Failed to unseal TOTP secret: {err}");
                return envelope::server_error("Two-factor authentication failed");
            }
        }
    }

    if !accepted && !recovery_code.is_empty() {
        match consume_recovery_code(&auth_state, &pool, &principal.user, recovery_code).await {
            Ok(consumed) => accepted = consumed,
            Err(err) => {
                error!("Failed to consume recovery code: {err}");
                return envelope::server_error("Two-factor authentication failed");
            }
        }
    }

    if !accepted {
        return invalid_code();
    }

    promote_challenge(&headers, &pool, &auth_state, &principal).await
}

/// Swap the challenge session for a full one inside a single transaction.
async fn promote_challenge(
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
    principal: &Principal,
) -> Response {
    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to begin transaction: {err}");
            return envelope::server_error("Two-factor authentication failed");
        }
    };

    if let Err(err) = storage::delete_session_by_id(&mut tx, principal.session.id).await {
        error!("Failed to delete challenge session: {err}");
        return envelope::server_error("Two-factor authentication failed");
    }

    let client_ip = extract_client_ip(headers);
    let user_agent = extract_user_agent(headers);
    let issued = issue_session(
        &mut tx,
        auth_state.config(),
        principal.user.id,
        SessionKind::Full,
        principal.session.remember,
        client_ip.as_deref(),
        user_agent.as_deref(),
    )
    .await;
    let (token, max_age) = match issued {
        Ok(issued) => issued,
        Err(err) => {
            error!("Failed to create session: {err}");
            return envelope::server_error("Two-factor authentication failed");
        }
    };

    if let Err(err) = tx.commit().await {
        error!("Failed to commit session swap: {err}");
        return envelope::server_error("Two-factor authentication failed");
    }

    let mut response_headers = HeaderMap::new();
    match session_cookie(auth_state.config(), &token, max_age) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return envelope::server_error("Two-factor authentication failed");
        }
    }

    (
        StatusCode::OK,
        response_headers,
        Json(AuthEnvelope::ok_with_user(
            "Two-factor authentication successful",
            UserPayload::from(&principal.user),
        )),
    )
        .into_response()
}

/// Begins enrollment: generates a secret and recovery batch, stores both
/// sealed and unconfirmed.
#[utoipa::path(
    post,
    path = "/api/auth/two-factor",
    responses(
        (status = 200, description = "Enrollment started", body = AuthEnvelope),
        (status = 401, description = "Unauthenticated", body = AuthEnvelope),
        (status = 423, description = "Password confirmation required", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn enable_two_factor(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let principal =
        match principal::require_confirmed(&headers, &pool, auth_state.config()).await {
            Ok(principal) => principal,
            Err(response) => return response,
        };

    let enrollment = match totp::start_enrollment(
        auth_state.config().totp_issuer(),
        &principal.user.email,
    ) {
        Ok(enrollment) => enrollment,
        Err(err) => {
            error!("Failed to start TOTP enrollment: {err}");
            return envelope::server_error("Two-factor setup failed");
        }
    };

    let codes = generate_recovery_codes();
    let sealed = seal_enrollment(&auth_state, principal.user.id, &enrollment.secret_base32, &codes);
    let (secret_sealed, codes_sealed) = match sealed {
        Ok(sealed) => sealed,
        Err(err) => {
            error!("Failed to seal TOTP material: {err}");
            return envelope::server_error("Two-factor setup failed");
        }
    };

    if let Err(err) =
        storage::set_two_factor_enrollment(&pool, principal.user.id, &secret_sealed, &codes_sealed)
            .await
    {
        error!("Failed to store TOTP enrollment: {err}");
        return envelope::server_error("Two-factor setup failed");
    }

    (
        StatusCode::OK,
        Json(AuthEnvelope::ok("Two-factor authentication enabled")),
    )
        .into_response()
}

/// Confirms a pending enrollment with a live code.
#[utoipa::path(
    post,
    path = "/api/auth/two-factor/confirm",
    request_body = TwoFactorConfirmRequest,
    responses(
        (status = 200, description = "Enrollment confirmed", body = AuthEnvelope),
        (status = 422, description = "Invalid code", body = AuthEnvelope),
        (status = 423, description = "Password confirmation required", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn confirm_two_factor(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TwoFactorConfirmRequest>>,
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

    let secret = match unseal_secret(&auth_state, &principal.user) {
        Ok(Some(secret)) => secret,
        Ok(None) => return invalid_code(),
        Err(err) => {
            error!("Failed to unseal TOTP secret: {err}");
            return envelope::server_error("Two-factor setup failed");
        }
    };

    if !totp::verify_code(&secret, &request.code) {
        return invalid_code();
    }

    match storage::confirm_two_factor(&pool, principal.user.id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(AuthEnvelope::ok("Two-factor authentication confirmed")),
        )
            .into_response(),
        // Nothing pending: enrollment was never started or already confirmed.
        Ok(false) => invalid_code(),
        Err(err) => {
            error!("Failed to confirm TOTP enrollment: {err}");
            envelope::server_error("Two-factor setup failed")
        }
    }
}

/// Disables two-factor authentication and discards the sealed material.
#[utoipa::path(
    delete,
    path = "/api/auth/two-factor",
    responses(
        (status = 200, description = "Two-factor disabled", body = AuthEnvelope),
        (status = 423, description = "Password confirmation required", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn disable_two_factor(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let principal =
        match principal::require_confirmed(&headers, &pool, auth_state.config()).await {
            Ok(principal) => principal,
            Err(response) => return response,
        };

    if let Err(err) = storage::clear_two_factor(&pool, principal.user.id).await {
        error!("Failed to clear two-factor state: {err}");
        return envelope::server_error("Two-factor update failed");
    }

    (
        StatusCode::OK,
        Json(AuthEnvelope::ok("Two-factor authentication disabled")),
    )
        .into_response()
}

/// Provisioning QR code for the stored secret (pending or confirmed).
#[utoipa::path(
    get,
    path = "/api/auth/two-factor/qr-code",
    responses(
        (status = 200, description = "QR data URL and otpauth URL", body = TwoFactorQrCodeResponse),
        (status = 400, description = "Two-factor not enabled", body = AuthEnvelope),
        (status = 423, description = "Password confirmation required", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn two_factor_qr_code(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let principal =
        match principal::require_confirmed(&headers, &pool, auth_state.config()).await {
            Ok(principal) => principal,
            Err(response) => return response,
        };

    let secret = match unseal_secret(&auth_state, &principal.user) {
        Ok(Some(secret)) => secret,
        Ok(None) => return not_enabled(),
        Err(err) => {
            error!("Failed to unseal TOTP secret: {err}");
            return envelope::server_error("Two-factor lookup failed");
        }
    };

    let enrollment = match totp::provisioning(
        &secret,
        auth_state.config().totp_issuer(),
        &principal.user.email,
    ) {
        Ok(enrollment) => enrollment,
        Err(err) => {
            error!("Failed to render provisioning QR: {err}");
            return envelope::server_error("Two-factor lookup failed");
        }
    };

    (
        StatusCode::OK,
        Json(TwoFactorQrCodeResponse {
            qr_png_base64: enrollment.qr_png_base64,
            otpauth_url: enrollment.otpauth_url,
        }),
    )
        .into_response()
}

/// Base32 secret for manual authenticator entry.
#[utoipa::path(
    get,
    path = "/api/auth/two-factor/secret-key",
    responses(
        (status = 200, description = "Base32 secret", body = TwoFactorSecretKeyResponse),
        (status = 400, description = "Two-factor not enabled", body = AuthEnvelope),
        (status = 423, description = "Password confirmation required", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn two_factor_secret_key(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let principal =
        match principal::require_confirmed(&headers, &pool, auth_state.config()).await {
            Ok(principal) => principal,
            Err(response) => return response,
        };

    match unseal_secret(&auth_state, &principal.user) {
        Ok(Some(secret)) => (
            StatusCode::OK,
            Json(TwoFactorSecretKeyResponse { secret_key: secret }),
        )
            .into_response(),
        Ok(None) => not_enabled(),
        Err(err) => {
            error!("Failed to unseal TOTP secret: {err}");
            envelope::server_error("Two-factor lookup failed")
        }
    }
}

/// Decrypted recovery-code batch. Confirmed enrollments only.
#[utoipa::path(
    get,
    path = "/api/auth/two-factor/recovery-codes",
    responses(
        (status = 200, description = "Recovery codes", body = [String]),
        (status = 400, description = "Two-factor not enabled", body = AuthEnvelope),
        (status = 423, description = "Password confirmation required", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn show_recovery_codes(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let principal =
        match principal::require_confirmed(&headers, &pool, auth_state.config()).await {
            Ok(principal) => principal,
            Err(response) => return response,
        };

    if !principal.user.two_factor_enabled() {
        return not_enabled();
    }

    match unseal_codes(&auth_state, &principal.user) {
        Ok(Some(codes)) => (StatusCode::OK, Json(codes)).into_response(),
        Ok(None) => not_enabled(),
        Err(err) => {
            error!("Failed to unseal recovery codes: {err}");
            envelope::server_error("Two-factor lookup failed")
        }
    }
}

/// Replaces the recovery-code batch with a fresh one.
#[utoipa::path(
    post,
    path = "/api/auth/two-factor/recovery-codes",
    responses(
        (status = 200, description = "Batch regenerated", body = AuthEnvelope),
        (status = 400, description = "Two-factor not enabled", body = AuthEnvelope),
        (status = 423, description = "Password confirmation required", body = AuthEnvelope)
    ),
    tag = "auth"
)]
pub async fn regenerate_recovery_codes(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let principal =
        match principal::require_confirmed(&headers, &pool, auth_state.config()).await {
            Ok(principal) => principal,
            Err(response) => return response,
        };

    if principal.user.two_factor_secret.is_none() {
        return not_enabled();
    }

    let codes = generate_recovery_codes();
    let codes_sealed = match seal_codes(&auth_state, principal.user.id, &codes) {
        Ok(sealed) => sealed,
        Err(err) => {
            error!("Failed to seal recovery codes: {err}");
            return envelope::server_error("Two-factor update failed");
        }
    };

    if let Err(err) = storage::set_recovery_codes(&pool, principal.user.id, &codes_sealed).await {
        error!("Failed to store recovery codes: {err}");
        return envelope::server_error("Two-factor update failed");
    }

    (
        StatusCode::OK,
        Json(AuthEnvelope::ok("Recovery codes regenerated")),
    )
        .into_response()
}

fn unseal_secret(auth_state: &AuthState, user: &UserRecord) -> anyhow::Result<Option<String>> {
    let Some(sealed) = user.two_factor_secret.as_deref() else {
        return Ok(None);
    };
    let secret = open_string(
        auth_state.config().sealing_key(),
        sealed,
        user.id,
        TOTP_SECRET_CONTEXT,
    )?;
    Ok(Some(secret))
}

fn unseal_codes(auth_state: &AuthState, user: &UserRecord) -> anyhow::Result<Option<Vec<String>>> {
    let Some(sealed) = user.two_factor_recovery_codes.as_deref() else {
        return Ok(None);
    };
    let json = open_string(
        auth_state.config().sealing_key(),
        sealed,
        user.id,
        RECOVERY_CODES_CONTEXT,
    )?;
    let codes: Vec<String> = serde_json::from_str(&json)?;
    Ok(Some(codes))
}

fn seal_codes(auth_state: &AuthState, user_id: i64, codes: &[String]) -> anyhow::Result<String> {
    let json = serde_json::to_string(codes)?;
    seal_string(
        auth_state.config().sealing_key(),
        &json,
        user_id,
        RECOVERY_CODES_CONTEXT,
    )
}

fn seal_enrollment(
    auth_state: &AuthState,
    user_id: i64,
    secret_base32: &str,
    codes: &[String],
) -> anyhow::Result<(String, String)> {
    let secret_sealed = seal_string(
        auth_state.config().sealing_key(),
        secret_base32,
        user_id,
        TOTP_SECRET_CONTEXT,
    )?;
    let codes_sealed = seal_codes(auth_state, user_id, codes)?;
    Ok((secret_sealed, codes_sealed))
}

/// Check a submitted recovery code against the sealed batch and, on a match,
/// persist the batch with that code removed. Returns whether a code matched.
async fn consume_recovery_code(
    auth_state: &AuthState,
    pool: &PgPool,
    user: &UserRecord,
    submitted: &str,
) -> anyhow::Result<bool> {
    let Ok(normalized) = normalize_recovery_code(submitted) else {
        return Ok(false);
    };

    let Some(codes) = unseal_codes(auth_state, user)? else {
        return Ok(false);
    };

    let mut matched = None;
    for (index, stored) in codes.iter().enumerate() {
        if let Ok(stored_normalized) = normalize_recovery_code(stored) {
            if constant_time_eq(stored_normalized.as_bytes(), normalized.as_bytes()) {
                matched = Some(index);
            }
        }
    }

    let Some(index) = matched else {
        return Ok(false);
    };

    let mut remaining = codes;
    remaining.remove(index);
    let codes_sealed = seal_codes(auth_state, user.id, &remaining)?;
    storage::set_recovery_codes(pool, user.id, &codes_sealed).await?;
    Ok(true)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn invalid_code() -> Response {
    let mut field_errors = FieldErrors::new();
    field_errors.add("code", INVALID_CODE);
    envelope::validation_failed(INVALID_CODE, field_errors.into_map())
}

fn not_enabled() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(AuthEnvelope::error(NOT_ENABLED)),
    )
        .into_response()
}
