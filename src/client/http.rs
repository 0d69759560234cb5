//! HTTP layer for the headless SPA client.
//!
//! Owns the cookie jar, refreshes the CSRF cookie before every mutating verb
//! and echoes it back as `X-XSRF-TOKEN` (double-submit), and on a 423 from a
//! non-confirmation endpoint suspends on the password-confirmation broker,
//! retrying the original request exactly once after a confirmed outcome.

use crate::client::{
    confirm::{ConfirmationBroker, ConfirmationOutcome, PendingConfirmation},
    types::{
        AuthResponse, ConfirmedStatus, CurrentUser, LoginCredentials, PasswordReset,
        ProfileUpdate, PasswordUpdate, Registration, TwoFactorChallenge, TwoFactorQrCode,
        TwoFactorSecretKey,
    },
};
use reqwest::{
    cookie::{CookieStore, Jar},
    header::ACCEPT,
    Client, Method, StatusCode, Url,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

const XSRF_COOKIE_NAME: &str = "XSRF-TOKEN";
const XSRF_HEADER_NAME: &str = "x-xsrf-token";
const CSRF_COOKIE_PATH: &str = "/api/csrf-cookie";

// 423 on these endpoints must never recurse into another prompt.
const CONFIRMATION_ENDPOINTS: [&str; 2] = [
    "/api/auth/confirm-password",
    "/api/auth/confirmed-password-status",
];

#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a response (connect, timeout, decode).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The API answered with a non-success status.
    #[error("api error ({status}): {}", .envelope.message)]
    Api {
        status: StatusCode,
        envelope: AuthResponse,
    },
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ClientError {
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(_) | Self::Url(_) => None,
        }
    }

    /// True for a 401 envelope, the signal that the session is gone.
    #[must_use]
    pub fn is_unauthenticated(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

fn is_confirmation_endpoint(path: &str) -> bool {
    CONFIRMATION_ENDPOINTS
        .iter()
        .any(|endpoint| path.starts_with(endpoint))
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

async fn decode_error_envelope(response: reqwest::Response) -> AuthResponse {
    let status = response.status();
    response
        .json::<AuthResponse>()
        .await
        .unwrap_or_else(|_| AuthResponse {
            success: false,
            message: format!("HTTP {status}"),
            user: None,
            email_verified: None,
            two_factor_enabled: None,
            two_factor: None,
            errors: None,
            retry_after_seconds: None,
        })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        Ok(response.json::<T>().await?)
    } else {
        Err(ClientError::Api {
            status,
            envelope: decode_error_envelope(response).await,
        })
    }
}

/// Cookie-jar HTTP client speaking the auth API's JSON contract.
pub struct AuthHttpClient {
    http: Client,
    jar: Arc<Jar>,
    base_url: Url,
    broker: Arc<ConfirmationBroker>,
}

impl AuthHttpClient {
    /// Build a client and the prompt stream its broker feeds.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be constructed.
    pub fn new(
        base_url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PendingConfirmation>), ClientError> {
        let (broker, prompts) = ConfirmationBroker::new();
        let client = Self::with_broker(base_url, Arc::new(broker))?;
        Ok((client, prompts))
    }

    /// Build a client over an externally owned broker.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be constructed.
    pub fn with_broker(
        base_url: &str,
        broker: Arc<ConfirmationBroker>,
    ) -> Result<Self, ClientError> {
        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .cookie_provider(jar.clone())
            .user_agent(crate::APP_USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            jar,
            base_url: Url::parse(base_url)?,
            broker,
        })
    }

    /// The broker backing this client's 423 handling.
    #[must_use]
    pub fn broker(&self) -> &Arc<ConfirmationBroker> {
        &self.broker
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path)?)
    }

    /// Current XSRF token as stored in the jar, if any.
    fn xsrf_token(&self) -> Option<String> {
        let cookies = self.jar.cookies(&self.base_url)?;
        let cookies = cookies.to_str().ok()?;
        cookies.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == XSRF_COOKIE_NAME).then(|| value.to_string())
        })
    }

    /// Fetch the CSRF cookie. Failure is logged, not fatal: the request about
    /// to be sent will be judged by the server either way.
    async fn refresh_csrf_cookie(&self) {
        let url = match self.endpoint(CSRF_COOKIE_PATH) {
            Ok(url) => url,
            Err(err) => {
                debug!("csrf cookie URL invalid: {err}");
                return;
            }
        };
        if let Err(err) = self.http.get(url).send().await {
            debug!("csrf cookie fetch failed: {err}");
        }
    }

    async fn send<B>(
        &self,
        method: &Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, ClientError>
    where
        B: Serialize + ?Sized,
    {
        let mutating = is_mutating(method);
        if mutating {
            self.refresh_csrf_cookie().await;
        }

        let mut request = self
            .http
            .request(method.clone(), self.endpoint(path)?)
            .header(ACCEPT, "application/json");

        if mutating {
            if let Some(token) = self.xsrf_token() {
                request = request.header(XSRF_HEADER_NAME, token);
            }
        }

        if let Some(body) = body {
            request = request.json(body);
        }

        Ok(request.send().await?)
    }

    async fn request_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(&method, path, body).await?;
        let status = response.status();

        if status == StatusCode::LOCKED && !is_confirmation_endpoint(path) {
            let envelope = decode_error_envelope(response).await;
            debug!(path, "password confirmation required, prompting");

            if self.broker.request().await == ConfirmationOutcome::Confirmed {
                // Retry exactly once; a second 423 surfaces as-is.
                let retried = self.send(&method, path, body).await?;
                return decode(retried).await;
            }

            // Cancelled or failed confirmation: surface the original 423.
            return Err(ClientError::Api { status, envelope });
        }

        decode(response).await
    }

    // --- auth lifecycle ---

    /// `POST /api/auth/login`
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] on a non-success envelope.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<AuthResponse, ClientError> {
        self.request_json(Method::POST, "/api/auth/login", Some(credentials))
            .await
    }

    /// `POST /api/auth/register`
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] on a non-success envelope.
    pub async fn register(&self, registration: &Registration) -> Result<AuthResponse, ClientError> {
        self.request_json(Method::POST, "/api/auth/register", Some(registration))
            .await
    }

    /// `POST /api/auth/logout`
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] on a non-success envelope.
    pub async fn logout(&self) -> Result<AuthResponse, ClientError> {
        self.request_json(Method::POST, "/api/auth/logout", None::<&()>)
            .await
    }

    /// `GET /api/v1/user`
    ///
    /// # Errors
    /// Returns a 401 [`ClientError::Api`] when no session is present.
    pub async fn current_user(&self) -> Result<CurrentUser, ClientError> {
        self.request_json(Method::GET, "/api/v1/user", None::<&()>)
            .await
    }

    /// `POST /api/auth/two-factor-challenge`
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] on an invalid or expired challenge.
    pub async fn two_factor_challenge(
        &self,
        challenge: &TwoFactorChallenge,
    ) -> Result<AuthResponse, ClientError> {
        self.request_json(
            Method::POST,
            "/api/auth/two-factor-challenge",
            Some(challenge),
        )
        .await
    }

    // --- passwords ---

    /// `POST /api/auth/forgot-password`
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] on a non-success envelope.
    pub async fn forgot_password(&self, email: &str) -> Result<AuthResponse, ClientError> {
        let body = serde_json::json!({ "email": email });
        self.request_json(Method::POST, "/api/auth/forgot-password", Some(&body))
            .await
    }

    /// `POST /api/auth/reset-password`
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] on an invalid or expired token.
    pub async fn reset_password(&self, reset: &PasswordReset) -> Result<AuthResponse, ClientError> {
        self.request_json(Method::POST, "/api/auth/reset-password", Some(reset))
            .await
    }

    /// `GET /api/auth/confirmed-password-status`
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] when anonymous.
    pub async fn confirmed_password_status(&self) -> Result<ConfirmedStatus, ClientError> {
        self.request_json(
            Method::GET,
            "/api/auth/confirmed-password-status",
            None::<&()>,
        )
        .await
    }

    /// `POST /api/auth/confirm-password`
    ///
    /// # Errors
    /// Returns a 422 [`ClientError::Api`] for a wrong password.
    pub async fn confirm_password(&self, password: &str) -> Result<AuthResponse, ClientError> {
        let body = serde_json::json!({ "password": password });
        self.request_json(Method::POST, "/api/auth/confirm-password", Some(&body))
            .await
    }

    /// `PUT /api/auth/password`
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] on validation failure or a stale
    /// confirmation (423).
    pub async fn update_password(
        &self,
        update: &PasswordUpdate,
    ) -> Result<AuthResponse, ClientError> {
        self.request_json(Method::PUT, "/api/auth/password", Some(update))
            .await
    }

    // --- profile ---

    /// `PUT /api/auth/profile`
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] on validation failure or a stale
    /// confirmation (423).
    pub async fn update_profile(
        &self,
        update: &ProfileUpdate,
    ) -> Result<AuthResponse, ClientError> {
        self.request_json(Method::PUT, "/api/auth/profile", Some(update))
            .await
    }

    // --- email verification ---

    /// `GET /api/auth/email/verify/{id}/{hash}` with the signed query.
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] on an invalid or expired signature.
    pub async fn verify_email(
        &self,
        id: i64,
        hash: &str,
        expires: i64,
        signature: &str,
    ) -> Result<AuthResponse, ClientError> {
        let path = format!(
            "/api/auth/email/verify/{id}/{hash}?expires={expires}&signature={signature}"
        );
        self.request_json(Method::GET, &path, None::<&()>).await
    }

    /// `POST /api/auth/email/verification-notification`
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] when anonymous or throttled.
    pub async fn resend_email_verification(&self) -> Result<AuthResponse, ClientError> {
        self.request_json(
            Method::POST,
            "/api/auth/email/verification-notification",
            None::<&()>,
        )
        .await
    }

    // --- two-factor management ---

    /// `POST /api/auth/two-factor`
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] when anonymous or unconfirmed (423).
    pub async fn enable_two_factor(&self) -> Result<AuthResponse, ClientError> {
        self.request_json(Method::POST, "/api/auth/two-factor", None::<&()>)
            .await
    }

    /// `DELETE /api/auth/two-factor`
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] when anonymous or unconfirmed (423).
    pub async fn disable_two_factor(&self) -> Result<AuthResponse, ClientError> {
        self.request_json(Method::DELETE, "/api/auth/two-factor", None::<&()>)
            .await
    }

    /// `POST /api/auth/two-factor/confirm`
    ///
    /// # Errors
    /// Returns a 422 [`ClientError::Api`] for a code that does not match the
    /// pending secret.
    pub async fn confirm_two_factor(&self, code: &str) -> Result<AuthResponse, ClientError> {
        let body = serde_json::json!({ "code": code });
        self.request_json(Method::POST, "/api/auth/two-factor/confirm", Some(&body))
            .await
    }

    /// `GET /api/auth/two-factor/qr-code`
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] when no secret is provisioned.
    pub async fn two_factor_qr_code(&self) -> Result<TwoFactorQrCode, ClientError> {
        self.request_json(Method::GET, "/api/auth/two-factor/qr-code", None::<&()>)
            .await
    }

    /// `GET /api/auth/two-factor/secret-key`
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] when no secret is provisioned.
    pub async fn two_factor_secret_key(&self) -> Result<TwoFactorSecretKey, ClientError> {
        self.request_json(Method::GET, "/api/auth/two-factor/secret-key", None::<&()>)
            .await
    }

    /// `GET /api/auth/two-factor/recovery-codes`
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] unless two-factor is confirmed.
    pub async fn recovery_codes(&self) -> Result<Vec<String>, ClientError> {
        self.request_json(
            Method::GET,
            "/api/auth/two-factor/recovery-codes",
            None::<&()>,
        )
        .await
    }

    /// `POST /api/auth/two-factor/recovery-codes` then fetch the new batch.
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] unless two-factor is confirmed.
    pub async fn regenerate_recovery_codes(&self) -> Result<Vec<String>, ClientError> {
        // Regeneration answers an envelope; the fresh batch needs a second read.
        let _: AuthResponse = self
            .request_json(
                Method::POST,
                "/api/auth/two-factor/recovery-codes",
                None::<&()>,
            )
            .await?;
        self.recovery_codes().await
    }
}
