//! Headless SPA client for the auth API.
//!
//! Four pieces cooperate here:
//!
//! - [`http::AuthHttpClient`]: the wire layer. Cookie jar, CSRF double-submit
//!   on every mutating verb, and a single transparent retry after a password
//!   confirmation when the API answers 423.
//! - [`confirm::ConfirmationBroker`]: the suspend/resume handshake between
//!   the HTTP layer and whatever renders the password prompt.
//! - [`store::AuthStore`]: the mirrored auth state and its transitions.
//! - [`guard::NavigationGuard`]: route gating from the store's flags.
//!
//! None of it renders anything; a UI drives the broker's prompt stream and
//! reads the store's snapshots.

pub mod confirm;
pub mod guard;
pub mod http;
pub mod store;
pub mod types;
