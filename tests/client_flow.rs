//! End-to-end exercises of the client stack: store, navigation guard, and
//! password-confirmation broker cooperating the way an SPA shell would use
//! them, with the API stubbed at the `AuthApi` seam.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use eniro::client::{
    confirm::{ConfirmationBroker, ConfirmationOutcome},
    guard::{GuardDecision, NavigationGuard, RedirectTarget, RouteMeta},
    http::ClientError,
    store::{AuthApi, AuthStore},
    types::{AuthResponse, CurrentUser, LoginCredentials, Registration, TwoFactorChallenge, User},
};
use reqwest::StatusCode;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use tokio::time::{sleep, timeout, Duration};

fn sample_user(verified: bool) -> User {
    User {
        id: 42,
        name: "Ada".to_string(),
        email: "ada@example.com".to_string(),
        email_verified_at: verified.then(Utc::now),
        created_at: Utc::now(),
        two_factor_enabled: false,
    }
}

fn envelope(user: Option<User>, two_factor: bool) -> AuthResponse {
    AuthResponse {
        success: true,
        message: if two_factor {
            "Two-factor authentication required".to_string()
        } else {
            "Login successful".to_string()
        },
        email_verified: user.as_ref().map(|u| u.email_verified_at.is_some()),
        two_factor_enabled: user.as_ref().map(|u| u.two_factor_enabled),
        user,
        two_factor: two_factor.then_some(true),
        errors: None,
        retry_after_seconds: None,
    }
}

fn unauthenticated() -> ClientError {
    ClientError::Api {
        status: StatusCode::UNAUTHORIZED,
        envelope: AuthResponse {
            success: false,
            message: "Unauthenticated.".to_string(),
            user: None,
            email_verified: None,
            two_factor_enabled: None,
            two_factor: None,
            errors: None,
            retry_after_seconds: None,
        },
    }
}

/// Scripted API: two-factor login flow with a slow status probe so the
/// dedup window is observable.
#[derive(Default)]
struct ScriptedApi {
    logged_in: AtomicBool,
    two_factor_enabled: AtomicBool,
    current_user_calls: Arc<AtomicUsize>,
    probe_delay_ms: AtomicUsize,
}

#[async_trait]
impl AuthApi for ScriptedApi {
    async fn login(&self, _: &LoginCredentials) -> Result<AuthResponse, ClientError> {
        if self.two_factor_enabled.load(Ordering::SeqCst) {
            Ok(envelope(None, true))
        } else {
            self.logged_in.store(true, Ordering::SeqCst);
            Ok(envelope(Some(sample_user(true)), false))
        }
    }

    async fn register(&self, _: &Registration) -> Result<AuthResponse, ClientError> {
        self.logged_in.store(true, Ordering::SeqCst);
        Ok(envelope(Some(sample_user(false)), false))
    }

    async fn logout(&self) -> Result<AuthResponse, ClientError> {
        self.logged_in.store(false, Ordering::SeqCst);
        Ok(envelope(None, false))
    }

    async fn current_user(&self) -> Result<CurrentUser, ClientError> {
        self.current_user_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.probe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.logged_in.load(Ordering::SeqCst) {
            let user = sample_user(true);
            Ok(CurrentUser {
                authenticated: true,
                email_verified: user.email_verified_at.is_some(),
                two_factor_enabled: user.two_factor_enabled,
                user,
            })
        } else {
            Err(unauthenticated())
        }
    }

    async fn two_factor_challenge(
        &self,
        challenge: &TwoFactorChallenge,
    ) -> Result<AuthResponse, ClientError> {
        if challenge.code.as_deref() == Some("123456") {
            self.logged_in.store(true, Ordering::SeqCst);
            Ok(envelope(Some(sample_user(true)), false))
        } else {
            Err(ClientError::Api {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                envelope: AuthResponse {
                    success: false,
                    message: "The provided code was invalid.".to_string(),
                    user: None,
                    email_verified: None,
                    two_factor_enabled: None,
                    two_factor: None,
                    errors: None,
                    retry_after_seconds: None,
                },
            })
        }
    }
}

fn credentials() -> LoginCredentials {
    LoginCredentials {
        email: "ada@example.com".to_string(),
        password: "correct horse".to_string(),
        remember: false,
    }
}

#[tokio::test]
async fn navigation_waits_for_bootstrap() -> Result<()> {
    let store = Arc::new(AuthStore::new(Box::new(ScriptedApi::default())));
    let guard = NavigationGuard::new(store.clone());

    // Before the first probe the guard must suspend, not decide.
    let pending = timeout(
        Duration::from_millis(50),
        guard.before_each(RouteMeta::requires_auth()),
    )
    .await;
    assert!(pending.is_err(), "guard must block until the first probe");

    store.initialize().await;

    let decision = timeout(
        Duration::from_secs(1),
        guard.before_each(RouteMeta::requires_auth()),
    )
    .await?;
    assert_eq!(decision, GuardDecision::Redirect(RedirectTarget::Login));
    Ok(())
}

#[tokio::test]
async fn two_factor_login_walks_the_guarded_routes() -> Result<()> {
    let api = ScriptedApi::default();
    api.two_factor_enabled.store(true, Ordering::SeqCst);

    let store = Arc::new(AuthStore::new(Box::new(api)));
    let guard = NavigationGuard::new(store.clone());
    store.initialize().await;

    // Anonymous: the login page is open, the challenge page is not.
    assert_eq!(
        guard.before_each(RouteMeta::requires_guest()).await,
        GuardDecision::Allow
    );
    assert_eq!(
        guard.before_each(RouteMeta::two_factor()).await,
        GuardDecision::Redirect(RedirectTarget::Login)
    );

    // Login parks on the challenge; every other route funnels there.
    let response = store.login(&credentials()).await?;
    assert!(response.two_factor_required());
    assert_eq!(
        guard.before_each(RouteMeta::requires_guest()).await,
        GuardDecision::Redirect(RedirectTarget::TwoFactorAuthentication)
    );
    assert_eq!(
        guard.before_each(RouteMeta::two_factor()).await,
        GuardDecision::Allow
    );

    // A bad code keeps the challenge pending.
    assert!(store
        .two_factor_challenge(&TwoFactorChallenge::code("000000"))
        .await
        .is_err());
    assert!(store.requires_two_factor());

    // The right code lands the session and opens the dashboard.
    store
        .two_factor_challenge(&TwoFactorChallenge::code("123456"))
        .await?;
    assert_eq!(
        guard.before_each(RouteMeta::requires_auth()).await,
        GuardDecision::Allow
    );
    assert_eq!(
        guard.before_each(RouteMeta::requires_guest()).await,
        GuardDecision::Redirect(RedirectTarget::Dashboard)
    );
    Ok(())
}

#[tokio::test]
async fn unverified_registration_funnels_to_verification() -> Result<()> {
    let store = Arc::new(AuthStore::new(Box::new(ScriptedApi::default())));
    let guard = NavigationGuard::new(store.clone());
    store.initialize().await;

    store
        .register(&Registration {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            password: "correct horse".to_string(),
            password_confirmation: "correct horse".to_string(),
        })
        .await?;

    // Registered but unverified: authenticated, pinned to the verify page.
    assert_eq!(
        guard.before_each(RouteMeta::requires_auth()).await,
        GuardDecision::Redirect(RedirectTarget::EmailVerification)
    );
    assert_eq!(
        guard.before_each(RouteMeta::email_verification()).await,
        GuardDecision::Allow
    );
    Ok(())
}

#[tokio::test]
async fn concurrent_checks_probe_once() -> Result<()> {
    let api = ScriptedApi::default();
    api.probe_delay_ms.store(100, Ordering::SeqCst);
    let probes = api.current_user_calls.clone();

    let store = Arc::new(AuthStore::new(Box::new(api)));

    let first = {
        let store = store.clone();
        tokio::spawn(async move { store.check_auth().await })
    };
    let second = {
        let store = store.clone();
        tokio::spawn(async move { store.check_auth().await })
    };
    first.await?;
    second.await?;

    assert_eq!(probes.load(Ordering::SeqCst), 1, "dedup must hold");
    assert!(store.snapshot().is_auth_checked);
    Ok(())
}

#[tokio::test]
async fn logout_clears_identity_and_reopens_guest_routes() -> Result<()> {
    let store = Arc::new(AuthStore::new(Box::new(ScriptedApi::default())));
    let guard = NavigationGuard::new(store.clone());
    store.initialize().await;

    store.login(&credentials()).await?;
    assert!(store.is_authenticated());

    store.logout().await;
    assert!(!store.is_authenticated());
    assert!(
        store.snapshot().is_auth_checked,
        "logout must not reset the bootstrap latch"
    );
    assert_eq!(
        guard.before_each(RouteMeta::requires_guest()).await,
        GuardDecision::Allow
    );
    assert_eq!(
        guard.before_each(RouteMeta::requires_auth()).await,
        GuardDecision::Redirect(RedirectTarget::Login)
    );
    Ok(())
}

#[tokio::test]
async fn broker_drives_a_prompt_loop() -> Result<()> {
    let (broker, mut prompts) = ConfirmationBroker::new();
    let broker = Arc::new(broker);

    // A stand-in for the UI shell: confirm the first prompt, cancel the rest.
    let ui = {
        let broker = broker.clone();
        tokio::spawn(async move {
            let mut first = true;
            while let Some(prompt) = prompts.recv().await {
                let outcome = if first {
                    ConfirmationOutcome::Confirmed
                } else {
                    ConfirmationOutcome::Cancelled
                };
                first = false;
                broker.resolve(&prompt.id, outcome);
            }
        })
    };

    assert_eq!(broker.request().await, ConfirmationOutcome::Confirmed);
    assert_eq!(broker.request().await, ConfirmationOutcome::Cancelled);
    assert_eq!(broker.pending_count(), 0);

    drop(broker);
    ui.await?;
    Ok(())
}
