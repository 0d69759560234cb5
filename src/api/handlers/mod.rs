//! API route handlers.
//!
//! `auth` carries the whole session lifecycle; `me` exposes the status probe
//! the SPA reconciles against; `health` and `root` sit outside the
//! authenticated surface.

pub mod auth;
pub mod health;
pub mod me;
pub mod root;
