//! Session authentication handlers and supporting modules.
//!
//! The surface mirrors a SPA-first session flow: cookie sessions with
//! optional bearer tokens, a uniform JSON envelope on every response, and a
//! two-factor challenge that parks the login on a short-lived session until
//! a TOTP or recovery code lands.
//!
//! ## Gates
//!
//! - **Guest endpoints** (login, register, password reset) answer 400 when a
//!   full session is already present.
//! - **Session endpoints** answer 401 without one.
//! - **Confirmed endpoints** (profile, password change, all 2FA management)
//!   additionally require a password confirmation within the configured
//!   window and answer 423 once it goes stale.
//!
//! ## Secrets at rest
//!
//! TOTP secrets and recovery-code batches are sealed with a key derived from
//! the application key before they reach the database. Session and reset
//! tokens are stored as SHA-256 digests only.

pub(crate) mod confirm;
pub(crate) mod csrf;
pub(crate) mod envelope;
pub(crate) mod login;
pub(crate) mod password_reset;
pub(crate) mod principal;
pub(crate) mod profile;
mod rate_limit;
pub(crate) mod register;
pub(crate) mod session;
mod signing;
mod state;
mod storage;
pub(crate) mod two_factor;
pub(crate) mod types;
mod utils;
mod validation;
pub(crate) mod verification;

pub use rate_limit::{NoopRateLimiter, RateLimiter, SlidingWindowRateLimiter};
pub use state::{AuthConfig, AuthState};
