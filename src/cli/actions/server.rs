use crate::api;
use anyhow::Result;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub app_key: SecretString,
    pub totp_issuer: String,
    pub session_ttl_seconds: i64,
    pub remember_ttl_seconds: i64,
    pub challenge_ttl_seconds: i64,
    pub password_confirm_ttl_seconds: i64,
    pub verification_ttl_minutes: i64,
    pub email_outbox_poll_seconds: u64,
    pub email_outbox_batch_size: usize,
    pub email_outbox_max_attempts: u32,
    pub email_outbox_backoff_base_seconds: u64,
    pub email_outbox_backoff_max_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = api::handlers::auth::AuthConfig::new(args.frontend_base_url, args.app_key)
        .with_totp_issuer(args.totp_issuer)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_remember_ttl_seconds(args.remember_ttl_seconds)
        .with_challenge_ttl_seconds(args.challenge_ttl_seconds)
        .with_password_confirm_ttl_seconds(args.password_confirm_ttl_seconds)
        .with_verification_ttl_minutes(args.verification_ttl_minutes);

    let email_config = api::EmailWorkerConfig::new()
        .with_poll_interval_seconds(args.email_outbox_poll_seconds)
        .with_batch_size(args.email_outbox_batch_size)
        .with_max_attempts(args.email_outbox_max_attempts)
        .with_backoff_base_seconds(args.email_outbox_backoff_base_seconds)
        .with_backoff_max_seconds(args.email_outbox_backoff_max_seconds);

    api::new(args.port, args.dsn, auth_config, email_config).await
}
