//! Wire types for the client side of the auth contract.
//!
//! These mirror the server's JSON bodies without sharing type definitions:
//! the client is written as if it lived in its own crate, talking to the API
//! over the wire alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-only copy of the account as the API projects it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub two_factor_enabled: bool,
}

impl User {
    #[must_use]
    pub fn email_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

/// The uniform envelope every auth endpoint answers with.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_factor_enabled: Option<bool>,
    /// Marker answered by login when a TOTP challenge must be completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_factor: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl AuthResponse {
    /// Whether login parked on a pending two-factor challenge.
    #[must_use]
    pub fn two_factor_required(&self) -> bool {
        self.two_factor == Some(true)
    }
}

/// Body of `GET /api/v1/user` for an authenticated session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CurrentUser {
    pub authenticated: bool,
    pub user: User,
    pub email_verified: bool,
    pub two_factor_enabled: bool,
}

/// Body of `GET /api/auth/confirmed-password-status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfirmedStatus {
    pub confirmed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TwoFactorQrCode {
    pub qr_png_base64: String,
    pub otpauth_url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TwoFactorSecretKey {
    pub secret_key: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
    pub remember: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PasswordReset {
    pub token: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

/// Either a TOTP code or one recovery code, never both.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TwoFactorChallenge {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_code: Option<String>,
}

impl TwoFactorChallenge {
    #[must_use]
    pub fn code(code: &str) -> Self {
        Self {
            code: Some(code.to_string()),
            recovery_code: None,
        }
    }

    #[must_use]
    pub fn recovery_code(recovery_code: &str) -> Self {
        Self {
            code: None,
            recovery_code: Some(recovery_code.to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ProfileUpdate {
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PasswordUpdate {
    pub current_password: String,
    pub password: String,
    pub password_confirmation: String,
}
