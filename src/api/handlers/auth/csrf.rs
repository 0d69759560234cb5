//! CSRF double-submit cookie: issuing endpoint plus enforcement middleware.

use axum::{
    extract::{Extension, Request},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use super::envelope::AuthEnvelope;
use super::state::AuthState;
use super::utils::generate_session_token;

pub(crate) const XSRF_COOKIE_NAME: &str = "XSRF-TOKEN";
pub(crate) const XSRF_HEADER_NAME: &str = "x-xsrf-token";

/// Issue a fresh readable CSRF cookie for the double-submit check.
#[utoipa::path(
    get,
    path = "/api/csrf-cookie",
    responses(
        (status = 204, description = "CSRF cookie set")
    ),
    tag = "auth"
)]
pub async fn csrf_cookie(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let Ok(token) = generate_session_token() else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    // Readable on purpose: the SPA echoes it back as a header.
    let secure = auth_state.config().session_cookie_secure();
    let mut cookie = format!("{XSRF_COOKIE_NAME}={token}; Path=/; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        headers.insert(axum::http::header::SET_COOKIE, value);
    }
    (StatusCode::NO_CONTENT, headers).into_response()
}

/// Reject mutating requests whose `X-XSRF-TOKEN` header does not match the
/// cookie. Bearer requests pass; they carry no ambient cookie authority.
pub async fn enforce_csrf(request: Request, next: Next) -> Response {
    let mutating = matches!(
        *request.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );
    if !mutating {
        return next.run(request).await;
    }
    if request
        .headers()
        .contains_key(axum::http::header::AUTHORIZATION)
    {
        return next.run(request).await;
    }

    let cookie_token = cookie_value(request.headers(), XSRF_COOKIE_NAME);
    let header_token = request
        .headers()
        .get(XSRF_HEADER_NAME)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let matches = match (cookie_token, header_token) {
        (Some(cookie), Some(header)) => constant_time_eq(cookie.as_bytes(), header.as_bytes()),
        _ => false,
    };

    if matches {
        next.run(request).await
    } else {
        page_expired()
    }
}

fn page_expired() -> Response {
    let status = StatusCode::from_u16(419).unwrap_or(StatusCode::FORBIDDEN);
    (status, Json(AuthEnvelope::error("CSRF token mismatch."))).into_response()
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
