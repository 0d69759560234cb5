//! Request and response payloads for the auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::envelope::UserPayload;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Extends the session lifetime when set.
    #[serde(default)]
    pub remember: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

/// Completes a pending two-factor login with either a TOTP code or one
/// recovery code.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TwoFactorChallengeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConfirmPasswordRequest {
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdatePasswordRequest {
    pub current_password: String,
    pub password: String,
    pub password_confirmation: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TwoFactorConfirmRequest {
    pub code: String,
}

/// Body of `GET /api/v1/user` for an authenticated session.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CurrentUserResponse {
    pub authenticated: bool,
    pub user: UserPayload,
    pub email_verified: bool,
    pub two_factor_enabled: bool,
}

/// Body of `GET /api/auth/confirmed-password-status`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConfirmedPasswordStatusResponse {
    pub confirmed: bool,
}

/// Provisioning QR for a pending or confirmed TOTP secret.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TwoFactorQrCodeResponse {
    /// PNG data URL suitable for an `<img src>` attribute.
    pub qr_png_base64: String,
    pub otpauth_url: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TwoFactorSecretKeyResponse {
    pub secret_key: String,
}
