//! Client-side auth state machine.
//!
//! The store is an explicitly constructed instance over an [`AuthApi`] trait
//! object; it owns no globals. Any task may call it: state sits behind a
//! `Mutex`, the `check_auth` dedup rides an `AtomicBool`, and
//! `is_auth_checked` latches through a `watch` channel so navigation guards
//! can suspend until the first status probe lands.

use crate::client::{
    http::{AuthHttpClient, ClientError},
    types::{
        AuthResponse, CurrentUser, LoginCredentials, Registration, TwoFactorChallenge, User,
    },
};
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard, PoisonError,
};
use tokio::sync::watch;
use tracing::warn;

/// The slice of the API the store drives. Production uses
/// [`AuthHttpClient`]; tests substitute stubs.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, credentials: &LoginCredentials) -> Result<AuthResponse, ClientError>;
    async fn register(&self, registration: &Registration) -> Result<AuthResponse, ClientError>;
    async fn logout(&self) -> Result<AuthResponse, ClientError>;
    async fn current_user(&self) -> Result<CurrentUser, ClientError>;
    async fn two_factor_challenge(
        &self,
        challenge: &TwoFactorChallenge,
    ) -> Result<AuthResponse, ClientError>;
}

#[async_trait]
impl AuthApi for AuthHttpClient {
    async fn login(&self, credentials: &LoginCredentials) -> Result<AuthResponse, ClientError> {
        Self::login(self, credentials).await
    }

    async fn register(&self, registration: &Registration) -> Result<AuthResponse, ClientError> {
        Self::register(self, registration).await
    }

    async fn logout(&self) -> Result<AuthResponse, ClientError> {
        Self::logout(self).await
    }

    async fn current_user(&self) -> Result<CurrentUser, ClientError> {
        Self::current_user(self).await
    }

    async fn two_factor_challenge(
        &self,
        challenge: &TwoFactorChallenge,
    ) -> Result<AuthResponse, ClientError> {
        Self::two_factor_challenge(self, challenge).await
    }
}

/// Observable snapshot of the store.
#[derive(Clone, Debug, Default)]
pub struct AuthState {
    pub user: Option<User>,
    pub is_loading: bool,
    pub error: Option<String>,
    /// Latched true after the first `check_auth` completes; never reset.
    pub is_auth_checked: bool,
    /// Login parked on a TOTP challenge; exclusive with `user`.
    pub requires_two_factor: bool,
}

pub struct AuthStore {
    api: Box<dyn AuthApi>,
    state: Mutex<AuthState>,
    check_in_flight: AtomicBool,
    auth_checked_tx: watch::Sender<bool>,
    auth_checked_rx: watch::Receiver<bool>,
}

impl AuthStore {
    #[must_use]
    pub fn new(api: Box<dyn AuthApi>) -> Self {
        let (auth_checked_tx, auth_checked_rx) = watch::channel(false);
        Self {
            api,
            state: Mutex::new(AuthState::default()),
            check_in_flight: AtomicBool::new(false),
            auth_checked_tx,
            auth_checked_rx,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone of the current state.
    #[must_use]
    pub fn snapshot(&self) -> AuthState {
        self.lock_state().clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.lock_state().user.is_some()
    }

    #[must_use]
    pub fn is_email_verified(&self) -> bool {
        self.lock_state()
            .user
            .as_ref()
            .is_some_and(User::email_verified)
    }

    #[must_use]
    pub fn requires_two_factor(&self) -> bool {
        self.lock_state().requires_two_factor
    }

    /// Receiver on the `is_auth_checked` latch.
    #[must_use]
    pub fn auth_checked(&self) -> watch::Receiver<bool> {
        self.auth_checked_rx.clone()
    }

    /// Suspend until the first `check_auth` has completed.
    pub async fn wait_until_checked(&self) {
        let mut rx = self.auth_checked_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn begin_action(&self) {
        let mut state = self.lock_state();
        state.is_loading = true;
        state.error = None;
    }

    fn mark_auth_checked(&self) {
        self.lock_state().is_auth_checked = true;
        // Latch; repeated sends of `true` leave waiters settled.
        let _ = self.auth_checked_tx.send(true);
    }

    /// Probe `GET /api/v1/user` and reconcile.
    ///
    /// Reentrant-guarded: a call arriving while another is in flight returns
    /// without touching the network. A 401 clears the identity; any other
    /// failure keeps the last-known identity and surfaces a message.
    pub async fn check_auth(&self) {
        if self
            .check_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.lock_state().is_loading = true;
        let result = self.api.current_user().await;

        {
            let mut state = self.lock_state();
            match result {
                Ok(current) => {
                    state.user = Some(current.user);
                    state.requires_two_factor = false;
                    state.error = None;
                }
                Err(err) if err.is_unauthenticated() => {
                    state.user = None;
                    state.requires_two_factor = false;
                }
                Err(err) => {
                    // Transient failure: keep the last-known identity.
                    warn!("auth check failed: {err}");
                    state.error = Some(err.to_string());
                }
            }
            state.is_loading = false;
        }

        self.mark_auth_checked();
        self.check_in_flight.store(false, Ordering::Release);
    }

    /// Run the first status probe once; later calls are no-ops.
    pub async fn initialize(&self) {
        if self.lock_state().is_auth_checked {
            return;
        }
        self.check_auth().await;
    }

    /// `login` transitions anonymous → authenticated | pending-2fa | error.
    ///
    /// # Errors
    /// Propagates the API error after recording it.
    pub async fn login(
        &self,
        credentials: &LoginCredentials,
    ) -> Result<AuthResponse, ClientError> {
        self.begin_action();
        let result = self.api.login(credentials).await;

        let mut state = self.lock_state();
        match &result {
            Ok(response) if response.two_factor_required() => {
                state.requires_two_factor = true;
                state.user = None;
            }
            Ok(response) => {
                state.user = response.user.clone();
                state.requires_two_factor = false;
            }
            Err(err) => {
                state.error = Some(err.to_string());
                state.user = None;
            }
        }
        state.is_loading = false;
        drop(state);

        result
    }

    /// Complete a pending two-factor login.
    ///
    /// # Errors
    /// Propagates the API error; the pending-2fa flag survives so the user
    /// can retry with another code.
    pub async fn two_factor_challenge(
        &self,
        challenge: &TwoFactorChallenge,
    ) -> Result<AuthResponse, ClientError> {
        self.begin_action();
        let result = self.api.two_factor_challenge(challenge).await;

        let mut state = self.lock_state();
        match &result {
            Ok(response) => {
                state.user = response.user.clone();
                state.requires_two_factor = false;
            }
            Err(err) => {
                state.error = Some(err.to_string());
            }
        }
        state.is_loading = false;
        drop(state);

        result
    }

    /// `register` authenticates directly; verification is a user flag.
    ///
    /// # Errors
    /// Propagates the API error after recording it.
    pub async fn register(
        &self,
        registration: &Registration,
    ) -> Result<AuthResponse, ClientError> {
        self.begin_action();
        let result = self.api.register(registration).await;

        let mut state = self.lock_state();
        match &result {
            Ok(response) => {
                state.user = response.user.clone();
                state.requires_two_factor = false;
            }
            Err(err) => {
                state.error = Some(err.to_string());
                state.user = None;
            }
        }
        state.is_loading = false;
        drop(state);

        result
    }

    /// Clear the local identity, network outcome notwithstanding.
    /// `is_auth_checked` stays latched.
    pub async fn logout(&self) {
        self.begin_action();
        let result = self.api.logout().await;

        if let Err(err) = result {
            warn!("logout request failed: {err}");
        }

        let mut state = self.lock_state();
        state.user = None;
        state.requires_two_factor = false;
        state.is_loading = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::types::AuthResponse;
    use reqwest::StatusCode;
    use std::sync::atomic::AtomicUsize;

    fn sample_user(verified: bool) -> User {
        User {
            id: 7,
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            email_verified_at: verified.then(chrono::Utc::now),
            created_at: chrono::Utc::now(),
            two_factor_enabled: false,
        }
    }

    fn envelope_with_user(user: User) -> AuthResponse {
        AuthResponse {
            success: true,
            message: "Login successful".to_string(),
            email_verified: Some(user.email_verified_at.is_some()),
            two_factor_enabled: Some(user.two_factor_enabled),
            user: Some(user),
            two_factor: None,
            errors: None,
            retry_after_seconds: None,
        }
    }

    fn two_factor_envelope() -> AuthResponse {
        AuthResponse {
            success: true,
            message: "Two-factor authentication required".to_string(),
            user: None,
            email_verified: None,
            two_factor_enabled: None,
            two_factor: Some(true),
            errors: None,
            retry_after_seconds: None,
        }
    }

    fn api_error(status: StatusCode) -> ClientError {
        ClientError::Api {
            status,
            envelope: AuthResponse {
                success: false,
                message: format!("HTTP {status}"),
                user: None,
                email_verified: None,
                two_factor_enabled: None,
                two_factor: None,
                errors: None,
                retry_after_seconds: None,
            },
        }
    }

    /// Scripted stub: every call answers from the configured slots.
    #[derive(Default)]
    struct StubApi {
        current_user: Mutex<Option<Result<CurrentUser, ClientError>>>,
        login: Mutex<Option<Result<AuthResponse, ClientError>>>,
        logout: Mutex<Option<Result<AuthResponse, ClientError>>>,
        challenge: Mutex<Option<Result<AuthResponse, ClientError>>>,
        register: Mutex<Option<Result<AuthResponse, ClientError>>>,
        current_user_calls: AtomicUsize,
    }

    impl StubApi {
        fn take<T>(slot: &Mutex<Option<Result<T, ClientError>>>) -> Result<T, ClientError> {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .unwrap_or_else(|| Err(api_error(StatusCode::INTERNAL_SERVER_ERROR)))
        }
    }

    #[async_trait]
    impl AuthApi for StubApi {
        async fn login(&self, _: &LoginCredentials) -> Result<AuthResponse, ClientError> {
            Self::take(&self.login)
        }

        async fn register(&self, _: &Registration) -> Result<AuthResponse, ClientError> {
            Self::take(&self.register)
        }

        async fn logout(&self) -> Result<AuthResponse, ClientError> {
            Self::take(&self.logout)
        }

        async fn current_user(&self) -> Result<CurrentUser, ClientError> {
            self.current_user_calls.fetch_add(1, Ordering::SeqCst);
            Self::take(&self.current_user)
        }

        async fn two_factor_challenge(
            &self,
            _: &TwoFactorChallenge,
        ) -> Result<AuthResponse, ClientError> {
            Self::take(&self.challenge)
        }
    }

    fn credentials() -> LoginCredentials {
        LoginCredentials {
            email: "ada@example.com".to_string(),
            password: "correct horse".to_string(),
            remember: true,
        }
    }

    #[tokio::test]
    async fn login_success_authenticates() -> anyhow::Result<()> {
        let api = StubApi::default();
        *api.login.lock().unwrap() = Some(Ok(envelope_with_user(sample_user(true))));

        let store = AuthStore::new(Box::new(api));
        let response = store.login(&credentials()).await?;

        assert_eq!(response.user.as_ref().map(|u| u.email.as_str()), Some("ada@example.com"));
        let state = store.snapshot();
        assert!(state.user.is_some());
        assert!(!state.requires_two_factor);
        assert!(!state.is_loading);
        assert!(state.error.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn login_with_two_factor_parks_pending() -> anyhow::Result<()> {
        let api = StubApi::default();
        *api.login.lock().unwrap() = Some(Ok(two_factor_envelope()));

        let store = AuthStore::new(Box::new(api));
        let response = store.login(&credentials()).await?;

        assert!(response.two_factor_required());
        let state = store.snapshot();
        assert!(state.user.is_none());
        assert!(state.requires_two_factor);
        Ok(())
    }

    #[tokio::test]
    async fn login_failure_records_error() -> anyhow::Result<()> {
        let api = StubApi::default();
        *api.login.lock().unwrap() = Some(Err(api_error(StatusCode::UNPROCESSABLE_ENTITY)));

        let store = AuthStore::new(Box::new(api));
        assert!(store.login(&credentials()).await.is_err());

        let state = store.snapshot();
        assert!(state.user.is_none());
        assert!(state.error.is_some());
        assert!(!state.is_loading);
        Ok(())
    }

    #[tokio::test]
    async fn challenge_success_clears_pending() -> anyhow::Result<()> {
        let api = StubApi::default();
        *api.login.lock().unwrap() = Some(Ok(two_factor_envelope()));
        *api.challenge.lock().unwrap() = Some(Ok(envelope_with_user(sample_user(true))));

        let store = AuthStore::new(Box::new(api));
        store.login(&credentials()).await?;
        store
            .two_factor_challenge(&TwoFactorChallenge::code("123456"))
            .await?;

        let state = store.snapshot();
        assert!(state.user.is_some());
        assert!(!state.requires_two_factor);
        Ok(())
    }

    #[tokio::test]
    async fn failed_challenge_keeps_pending() -> anyhow::Result<()> {
        let api = StubApi::default();
        *api.login.lock().unwrap() = Some(Ok(two_factor_envelope()));
        *api.challenge.lock().unwrap() = Some(Err(api_error(StatusCode::UNPROCESSABLE_ENTITY)));

        let store = AuthStore::new(Box::new(api));
        store.login(&credentials()).await?;
        assert!(store
            .two_factor_challenge(&TwoFactorChallenge::code("000000"))
            .await
            .is_err());

        let state = store.snapshot();
        assert!(state.user.is_none());
        assert!(state.requires_two_factor, "user should be able to retry");
        Ok(())
    }

    #[tokio::test]
    async fn check_auth_401_clears_identity() -> anyhow::Result<()> {
        let api = StubApi::default();
        *api.login.lock().unwrap() = Some(Ok(envelope_with_user(sample_user(true))));
        *api.current_user.lock().unwrap() = Some(Err(api_error(StatusCode::UNAUTHORIZED)));

        let store = AuthStore::new(Box::new(api));
        store.login(&credentials()).await?;
        store.check_auth().await;

        let state = store.snapshot();
        assert!(state.user.is_none());
        assert!(state.is_auth_checked);
        Ok(())
    }

    #[tokio::test]
    async fn check_auth_transient_failure_keeps_identity() -> anyhow::Result<()> {
        let api = StubApi::default();
        *api.login.lock().unwrap() = Some(Ok(envelope_with_user(sample_user(true))));
        *api.current_user.lock().unwrap() = Some(Err(api_error(StatusCode::INTERNAL_SERVER_ERROR)));

        let store = AuthStore::new(Box::new(api));
        store.login(&credentials()).await?;
        store.check_auth().await;

        let state = store.snapshot();
        assert!(state.user.is_some(), "500 must not log the user out");
        assert!(state.error.is_some());
        assert!(state.is_auth_checked);
        Ok(())
    }

    #[tokio::test]
    async fn logout_clears_identity_on_network_failure() -> anyhow::Result<()> {
        let api = StubApi::default();
        *api.login.lock().unwrap() = Some(Ok(envelope_with_user(sample_user(true))));
        *api.logout.lock().unwrap() = Some(Err(api_error(StatusCode::INTERNAL_SERVER_ERROR)));

        let store = AuthStore::new(Box::new(api));
        store.login(&credentials()).await?;
        store.check_auth().await;
        store.logout().await;

        let state = store.snapshot();
        assert!(state.user.is_none());
        assert!(!state.requires_two_factor);
        assert!(state.is_auth_checked, "logout must not reset the latch");
        Ok(())
    }

    #[tokio::test]
    async fn register_authenticates_directly() -> anyhow::Result<()> {
        let api = StubApi::default();
        *api.register.lock().unwrap() = Some(Ok(envelope_with_user(sample_user(false))));

        let store = AuthStore::new(Box::new(api));
        store
            .register(&Registration {
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                password: "correct horse".to_string(),
                password_confirmation: "correct horse".to_string(),
            })
            .await?;

        let state = store.snapshot();
        assert!(state.user.is_some());
        assert!(!state.user.as_ref().is_some_and(User::email_verified));
        Ok(())
    }
}
