//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{server::Args, Action};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let app_key = matches
        .get_one::<String>("app-key")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --app-key")?;
    let frontend_base_url = matches
        .get_one::<String>("frontend-base-url")
        .cloned()
        .context("missing required argument: --frontend-base-url")?;
    let totp_issuer = matches
        .get_one::<String>("totp-issuer")
        .cloned()
        .unwrap_or_else(|| "Eniro".to_string());

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url,
        app_key,
        totp_issuer,
        session_ttl_seconds: matches
            .get_one::<i64>("session-ttl-seconds")
            .copied()
            .unwrap_or(604_800),
        remember_ttl_seconds: matches
            .get_one::<i64>("remember-ttl-seconds")
            .copied()
            .unwrap_or(2_592_000),
        challenge_ttl_seconds: matches
            .get_one::<i64>("challenge-ttl-seconds")
            .copied()
            .unwrap_or(600),
        password_confirm_ttl_seconds: matches
            .get_one::<i64>("password-confirm-ttl-seconds")
            .copied()
            .unwrap_or(10_800),
        verification_ttl_minutes: matches
            .get_one::<i64>("verification-ttl-minutes")
            .copied()
            .unwrap_or(60),
        email_outbox_poll_seconds: matches
            .get_one::<u64>("email-outbox-poll-seconds")
            .copied()
            .unwrap_or(5),
        email_outbox_batch_size: matches
            .get_one::<usize>("email-outbox-batch-size")
            .copied()
            .unwrap_or(10),
        email_outbox_max_attempts: matches
            .get_one::<u32>("email-outbox-max-attempts")
            .copied()
            .unwrap_or(5),
        email_outbox_backoff_base_seconds: matches
            .get_one::<u64>("email-outbox-backoff-base-seconds")
            .copied()
            .unwrap_or(5),
        email_outbox_backoff_max_seconds: matches
            .get_one::<u64>("email-outbox-backoff-max-seconds")
            .copied()
            .unwrap_or(300),
    }))
}
