//! Database helpers for accounts, sessions, reset tokens, and the email
//! outbox.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgConnection, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::session::{SessionKind, CHALLENGE_TOKEN_PREFIX};
use super::utils::{generate_session_token, hash_session_token, is_unique_violation};

/// Account row as stored. Wire responses use the projection in `envelope`.
#[derive(Clone, Debug)]
pub(crate) struct UserRecord {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) email: String,
    pub(crate) email_verified_at: Option<DateTime<Utc>>,
    pub(crate) password_hash: String,
    pub(crate) two_factor_secret: Option<String>,
    pub(crate) two_factor_recovery_codes: Option<String>,
    pub(crate) two_factor_confirmed_at: Option<DateTime<Utc>>,
    pub(crate) created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Two-factor counts as enabled only once the user confirmed a code.
    pub(crate) fn two_factor_enabled(&self) -> bool {
        self.two_factor_secret.is_some() && self.two_factor_confirmed_at.is_some()
    }

    pub(crate) fn email_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

/// Session row resolved from a cookie token hash.
#[derive(Clone, Debug)]
pub(crate) struct SessionRecord {
    pub(crate) id: Uuid,
    pub(crate) user_id: i64,
    pub(crate) kind: SessionKind,
    pub(crate) remember: bool,
    pub(crate) password_confirmed_at: Option<DateTime<Utc>>,
    pub(crate) expires_at: DateTime<Utc>,
}

fn user_from_row(row: &PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        email_verified_at: row.get("email_verified_at"),
        password_hash: row.get("password_hash"),
        two_factor_secret: row.get("two_factor_secret"),
        two_factor_recovery_codes: row.get("two_factor_recovery_codes"),
        two_factor_confirmed_at: row.get("two_factor_confirmed_at"),
        created_at: row.get("created_at"),
    }
}

/// Insert a new account inside the caller's transaction.
///
/// Returns `Ok(None)` when the email is already taken.
pub(super) async fn insert_user(
    conn: &mut PgConnection,
    name: &str,
    email: &str,
    password_hash: &str,
) -> Result<Option<UserRecord>> {
    let query = r"
        INSERT INTO users (name, email, password_hash)
        VALUES ($1, $2, $3)
        RETURNING id, name, email, email_verified_at, password_hash,
                  two_factor_secret, two_factor_recovery_codes,
                  two_factor_confirmed_at, created_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&mut *conn)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(Some(user_from_row(&row))),
        Err(err) if is_unique_violation(&err) => Ok(None),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

pub(super) async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRecord>> {
    let query = r"
        SELECT id, name, email, email_verified_at, password_hash,
               two_factor_secret, two_factor_recovery_codes,
               two_factor_confirmed_at, created_at
        FROM users
        WHERE email = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;

    Ok(row.map(|row| user_from_row(&row)))
}

pub(super) async fn find_user_by_id(pool: &PgPool, user_id: i64) -> Result<Option<UserRecord>> {
    let query = r"
        SELECT id, name, email, email_verified_at, password_hash,
               two_factor_secret, two_factor_recovery_codes,
               two_factor_confirmed_at, created_at
        FROM users
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by id")?;

    Ok(row.map(|row| user_from_row(&row)))
}

/// Insert a session row and return the raw cookie token.
///
/// Generates a random token, stores only its hash, and retries on the
/// (astronomically unlikely) hash collision.
pub(super) async fn insert_session(
    conn: &mut PgConnection,
    user_id: i64,
    kind: SessionKind,
    remember: bool,
    ttl_seconds: i64,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<String> {
    let query = r"
        INSERT INTO sessions
            (id, user_id, token_hash, kind, ip_address, user_agent, remember, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW() + ($8 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = match kind {
            SessionKind::Full => generate_session_token()?,
            SessionKind::TwoFactorChallenge => {
                format!("{CHALLENGE_TOKEN_PREFIX}{}", generate_session_token()?)
            }
        };
        let token_hash = hash_session_token(&token);
        let result = sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(token_hash)
            .bind(kind.as_str())
            .bind(ip_address)
            .bind(user_agent)
            .bind(remember)
            .bind(ttl_seconds)
            .execute(&mut *conn)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

/// Resolve an unexpired session and its owning account by token hash.
pub(super) async fn find_session_with_user(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<(SessionRecord, UserRecord)>> {
    let query = r"
        SELECT
            sessions.id AS session_id,
            sessions.user_id,
            sessions.kind,
            sessions.remember,
            sessions.password_confirmed_at,
            sessions.expires_at,
            users.id,
            users.name,
            users.email,
            users.email_verified_at,
            users.password_hash,
            users.two_factor_secret,
            users.two_factor_recovery_codes,
            users.two_factor_confirmed_at,
            users.created_at
        FROM sessions
        JOIN users ON users.id = sessions.user_id
        WHERE sessions.token_hash = $1
          AND sessions.expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    Ok(row.map(|row| {
        let session = SessionRecord {
            id: row.get("session_id"),
            user_id: row.get("user_id"),
            kind: SessionKind::from_db(row.get::<String, _>("kind").as_str()),
            remember: row.get("remember"),
            password_confirmed_at: row.get("password_confirmed_at"),
            expires_at: row.get("expires_at"),
        };
        let user = user_from_row(&row);
        (session, user)
    }))
}

pub(super) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = "DELETE FROM sessions WHERE token_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

pub(super) async fn delete_session_by_id(conn: &mut PgConnection, session_id: Uuid) -> Result<()> {
    let query = "DELETE FROM sessions WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session_id)
        .execute(&mut *conn)
        .instrument(span)
        .await
        .context("failed to delete session by id")?;
    Ok(())
}

/// Revoke a user's sessions, optionally sparing the current one.
pub(super) async fn delete_sessions_for_user(
    conn: &mut PgConnection,
    user_id: i64,
    keep_session_id: Option<Uuid>,
) -> Result<u64> {
    let query = r"
        DELETE FROM sessions
        WHERE user_id = $1
          AND ($2::uuid IS NULL OR id <> $2)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(keep_session_id)
        .execute(&mut *conn)
        .instrument(span)
        .await
        .context("failed to revoke user sessions")?;
    Ok(result.rows_affected())
}

/// Stamp the session as recently password-confirmed.
pub(super) async fn stamp_password_confirmed(pool: &PgPool, session_id: Uuid) -> Result<()> {
    let query = "UPDATE sessions SET password_confirmed_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to stamp password confirmation")?;
    Ok(())
}

/// Mark the account verified. Returns false when it already was.
pub(super) async fn mark_email_verified(pool: &PgPool, user_id: i64) -> Result<bool> {
    let query = r"
        UPDATE users
        SET email_verified_at = NOW(), updated_at = NOW()
        WHERE id = $1
          AND email_verified_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to mark email verified")?;
    Ok(result.rows_affected() > 0)
}

/// Update name/email, clearing the verification stamp on email change.
///
/// Returns `Ok(None)` when the new email is already taken.
pub(super) async fn update_profile(
    pool: &PgPool,
    user_id: i64,
    name: &str,
    email: &str,
    clear_verification: bool,
) -> Result<Option<UserRecord>> {
    let query = r"
        UPDATE users
        SET name = $2,
            email = $3,
            email_verified_at = CASE WHEN $4 THEN NULL ELSE email_verified_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, name, email, email_verified_at, password_hash,
                  two_factor_secret, two_factor_recovery_codes,
                  two_factor_confirmed_at, created_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(name)
        .bind(email)
        .bind(clear_verification)
        .fetch_optional(pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(row.map(|row| user_from_row(&row))),
        Err(err) if is_unique_violation(&err) => Ok(None),
        Err(err) => Err(err).context("failed to update profile"),
    }
}

pub(super) async fn update_password(
    conn: &mut PgConnection,
    user_id: i64,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_hash = $2, updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut *conn)
        .instrument(span)
        .await
        .context("failed to update password")?;
    Ok(())
}

/// One active reset token per email; a new request overwrites the old token.
pub(super) async fn upsert_password_reset_token(
    pool: &PgPool,
    email: &str,
    token_hash: &[u8],
) -> Result<()> {
    let query = r"
        INSERT INTO password_reset_tokens (email, token_hash)
        VALUES ($1, $2)
        ON CONFLICT (email)
        DO UPDATE SET token_hash = EXCLUDED.token_hash, created_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert password reset token")?;
    Ok(())
}

pub(super) struct ResetTokenRecord {
    pub(super) token_hash: Vec<u8>,
    pub(super) created_at: DateTime<Utc>,
}

pub(super) async fn find_password_reset_token(
    pool: &PgPool,
    email: &str,
) -> Result<Option<ResetTokenRecord>> {
    let query = "SELECT token_hash, created_at FROM password_reset_tokens WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup password reset token")?;

    Ok(row.map(|row| ResetTokenRecord {
        token_hash: row.get("token_hash"),
        created_at: row.get("created_at"),
    }))
}

pub(super) async fn delete_password_reset_token(
    conn: &mut PgConnection,
    email: &str,
) -> Result<()> {
    let query = "DELETE FROM password_reset_tokens WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .execute(&mut *conn)
        .instrument(span)
        .await
        .context("failed to delete password reset token")?;
    Ok(())
}

/// Store freshly sealed TOTP material, pending confirmation.
pub(super) async fn set_two_factor_enrollment(
    pool: &PgPool,
    user_id: i64,
    secret_sealed: &str,
    codes_sealed: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET two_factor_secret = $2,
            two_factor_recovery_codes = $3,
            two_factor_confirmed_at = NULL,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(secret_sealed)
        .bind(codes_sealed)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to store two-factor enrollment")?;
    Ok(())
}

/// Confirm a pending enrollment. Returns false when nothing was pending.
pub(super) async fn confirm_two_factor(pool: &PgPool, user_id: i64) -> Result<bool> {
    let query = r"
        UPDATE users
        SET two_factor_confirmed_at = NOW(), updated_at = NOW()
        WHERE id = $1
          AND two_factor_secret IS NOT NULL
          AND two_factor_confirmed_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to confirm two-factor enrollment")?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn clear_two_factor(pool: &PgPool, user_id: i64) -> Result<()> {
    let query = r"
        UPDATE users
        SET two_factor_secret = NULL,
            two_factor_recovery_codes = NULL,
            two_factor_confirmed_at = NULL,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to clear two-factor settings")?;
    Ok(())
}

/// Replace the sealed recovery-code batch (regeneration or code burn).
pub(super) async fn set_recovery_codes(
    pool: &PgPool,
    user_id: i64,
    codes_sealed: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET two_factor_recovery_codes = $2, updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(codes_sealed)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to store recovery codes")?;
    Ok(())
}

/// Queue an email for the outbox worker.
pub(super) async fn enqueue_email(
    conn: &mut PgConnection,
    user_id: Option<i64>,
    to_email: &str,
    template: &str,
    payload: &serde_json::Value,
) -> Result<()> {
    let payload_text =
        serde_json::to_string(payload).context("failed to serialize email payload")?;

    let query = r"
        INSERT INTO email_outbox (id, user_id, to_email, template, payload_json)
        VALUES ($1, $2, $3, $4, $5::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(to_email)
        .bind(template)
        .bind(payload_text)
        .execute(&mut *conn)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;
    Ok(())
}
