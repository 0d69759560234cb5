//! Navigation guard.
//!
//! Runs before every route change. The first call of a session suspends on
//! the store's auth-checked latch so routing never races the initial status
//! probe; after that the latch is already settled and the guard is
//! synchronous in practice.

use crate::client::store::{AuthState, AuthStore};
use std::sync::Arc;

/// Where the guard sends a request it refuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectTarget {
    Login,
    Dashboard,
    EmailVerification,
    TwoFactorAuthentication,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(RedirectTarget),
}

/// Per-route metadata the guard evaluates against the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteMeta {
    pub requires_auth: bool,
    pub requires_guest: bool,
    /// The email-verification landing route itself.
    pub is_email_verification: bool,
    /// The two-factor challenge route itself.
    pub is_two_factor: bool,
}

impl RouteMeta {
    /// A route with no auth requirements at all.
    #[must_use]
    pub const fn public() -> Self {
        Self {
            requires_auth: false,
            requires_guest: false,
            is_email_verification: false,
            is_two_factor: false,
        }
    }

    #[must_use]
    pub const fn requires_auth() -> Self {
        Self {
            requires_auth: true,
            ..Self::public()
        }
    }

    #[must_use]
    pub const fn requires_guest() -> Self {
        Self {
            requires_guest: true,
            ..Self::public()
        }
    }

    /// The verification landing route: needs a session, shows the prompt.
    #[must_use]
    pub const fn email_verification() -> Self {
        Self {
            requires_auth: true,
            is_email_verification: true,
            ..Self::public()
        }
    }

    /// The two-factor challenge route: guest-side, pending login only.
    #[must_use]
    pub const fn two_factor() -> Self {
        Self {
            requires_guest: true,
            is_two_factor: true,
            ..Self::public()
        }
    }
}

pub struct NavigationGuard {
    store: Arc<AuthStore>,
}

impl NavigationGuard {
    #[must_use]
    pub fn new(store: Arc<AuthStore>) -> Self {
        Self { store }
    }

    /// Decide whether `route` may be entered, suspending until the first
    /// status probe has completed.
    pub async fn before_each(&self, route: RouteMeta) -> GuardDecision {
        self.store.wait_until_checked().await;
        Self::evaluate(&self.store.snapshot(), route)
    }

    // The rules run in a fixed order; the first match wins.
    fn evaluate(state: &AuthState, route: RouteMeta) -> GuardDecision {
        let authenticated = state.user.is_some();
        let verified = state
            .user
            .as_ref()
            .is_some_and(|user| user.email_verified_at.is_some());

        if route.requires_auth && !authenticated {
            return GuardDecision::Redirect(RedirectTarget::Login);
        }
        if authenticated && !verified && !route.is_email_verification {
            return GuardDecision::Redirect(RedirectTarget::EmailVerification);
        }
        if authenticated && verified && route.is_email_verification {
            return GuardDecision::Redirect(RedirectTarget::Dashboard);
        }
        if route.requires_guest && authenticated {
            return GuardDecision::Redirect(RedirectTarget::Dashboard);
        }
        if state.requires_two_factor && !route.is_two_factor {
            return GuardDecision::Redirect(RedirectTarget::TwoFactorAuthentication);
        }
        if !state.requires_two_factor && route.is_two_factor {
            return GuardDecision::Redirect(RedirectTarget::Login);
        }

        GuardDecision::Allow
    }
}
