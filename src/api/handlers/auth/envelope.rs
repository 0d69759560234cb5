//! Uniform JSON envelope for auth lifecycle responses.
//!
//! Every auth endpoint answers with the same shape so SPA clients switch on
//! one structure: `{success, message, user?, email_verified?,
//! two_factor_enabled?, two_factor?, errors?, retry_after_seconds?}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use super::storage::UserRecord;

/// Wire projection of an account. The client holds a read-only copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserPayload {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub two_factor_enabled: bool,
}

impl From<&UserRecord> for UserPayload {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            email_verified_at: user.email_verified_at,
            created_at: user.created_at,
            two_factor_enabled: user.two_factor_enabled(),
        }
    }
}

/// Fixed-shape response body shared by the auth endpoints.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthEnvelope {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub two_factor_enabled: Option<bool>,
    /// Marker answered by login when a TOTP challenge must be completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub two_factor: Option<bool>,
    /// Field-level validation messages for 422 responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl AuthEnvelope {
    /// Success envelope with no user attached.
    pub fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            user: None,
            email_verified: None,
            two_factor_enabled: None,
            two_factor: None,
            errors: None,
            retry_after_seconds: None,
        }
    }

    /// Success envelope carrying the user projection and its derived flags.
    pub fn ok_with_user(message: &str, user: UserPayload) -> Self {
        let mut envelope = Self::ok(message);
        envelope.email_verified = Some(user.email_verified_at.is_some());
        envelope.two_factor_enabled = Some(user.two_factor_enabled);
        envelope.user = Some(user);
        envelope
    }

    /// Login answered with the two-factor marker instead of a user.
    pub fn two_factor_pending(message: &str) -> Self {
        let mut envelope = Self::ok(message);
        envelope.two_factor = Some(true);
        envelope
    }

    /// Failure envelope with no field details.
    pub fn error(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            user: None,
            email_verified: None,
            two_factor_enabled: None,
            two_factor: None,
            errors: None,
            retry_after_seconds: None,
        }
    }

    /// Failure envelope with field-level validation messages.
    pub fn with_errors(message: &str, errors: BTreeMap<String, Vec<String>>) -> Self {
        let mut envelope = Self::error(message);
        envelope.errors = Some(errors);
        envelope
    }

    /// Whether the body carries the two-factor challenge marker.
    #[must_use]
    pub fn two_factor_required(&self) -> bool {
        self.two_factor == Some(true)
    }
}

/// 401 envelope for requests that need a session and have none.
pub(crate) fn unauthenticated() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(AuthEnvelope::error("Unauthenticated.")),
    )
        .into_response()
}

/// 400 envelope for guest-only endpoints hit with a live session.
pub(super) fn already_authenticated() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(AuthEnvelope::error("Already authenticated")),
    )
        .into_response()
}

/// 423 envelope for endpoints gated on a recent password confirmation.
pub(super) fn confirmation_required() -> Response {
    (
        StatusCode::LOCKED,
        Json(AuthEnvelope::error("Password confirmation required.")),
    )
        .into_response()
}

/// 429 envelope with a retry hint for throttled requests.
pub(super) fn throttled(retry_after_seconds: u64) -> Response {
    let mut envelope = AuthEnvelope::error("Too many attempts. Please try again later.");
    envelope.retry_after_seconds = Some(retry_after_seconds);
    (StatusCode::TOO_MANY_REQUESTS, Json(envelope)).into_response()
}

/// 422 envelope with field-level messages.
pub(super) fn validation_failed(
    message: &str,
    errors: BTreeMap<String, Vec<String>>,
) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(AuthEnvelope::with_errors(message, errors)),
    )
        .into_response()
}

/// 500 envelope; details stay in the logs.
pub(crate) fn server_error(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(AuthEnvelope::error(message)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user(verified: bool, two_factor: bool) -> UserPayload {
        UserPayload {
            id: 1,
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            email_verified_at: verified.then(Utc::now),
            created_at: Utc::now(),
            two_factor_enabled: two_factor,
        }
    }

    #[test]
    fn ok_with_user_derives_flags() {
        let envelope = AuthEnvelope::ok_with_user("Login successful", sample_user(true, false));
        assert!(envelope.success);
        assert_eq!(envelope.email_verified, Some(true));
        assert_eq!(envelope.two_factor_enabled, Some(false));
        assert!(envelope.user.is_some());
        assert!(!envelope.two_factor_required());
    }

    #[test]
    fn two_factor_pending_has_marker_and_no_user() {
        let envelope = AuthEnvelope::two_factor_pending("Two-factor authentication required");
        assert!(envelope.two_factor_required());
        assert!(envelope.user.is_none());
    }

    #[test]
    fn optional_fields_are_omitted_from_wire() {
        let json = serde_json::to_value(AuthEnvelope::ok("Logged out successfully"))
            .unwrap_or_default();
        let object = json.as_object().cloned().unwrap_or_default();
        assert_eq!(object.len(), 2);
        assert!(object.contains_key("success"));
        assert!(object.contains_key("message"));
    }

    #[test]
    fn envelope_round_trips_without_optionals() {
        let envelope: AuthEnvelope =
            serde_json::from_str(r#"{"success":false,"message":"Unauthenticated."}"#)
                .unwrap_or_else(|_| AuthEnvelope::ok(""));
        assert!(!envelope.success);
        assert_eq!(envelope.message, "Unauthenticated.");
        assert!(envelope.errors.is_none());
    }
}
