//! Database helpers for MFA state: settings, email OTPs, backup codes, and
//! login challenges. One-time-use semantics are enforced with conditional
//! updates, never read-then-write.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{OtpPurpose, TotpState};

/// Per-user MFA settings row.
#[derive(Clone, Debug)]
pub struct MfaSettingsRecord {
    pub totp_state: TotpState,
    pub totp_secret: Option<String>,
    pub email_otp_enabled: bool,
    pub backup_codes_generated: bool,
    pub enforced: bool,
}

impl Default for MfaSettingsRecord {
    fn default() -> Self {
        Self {
            totp_state: TotpState::NotConfigured,
            totp_secret: None,
            email_otp_enabled: false,
            backup_codes_generated: false,
            enforced: false,
        }
    }
}

/// One email OTP row as the engine sees it.
#[derive(Clone, Debug)]
pub(crate) struct EmailOtpRecord {
    pub id: Uuid,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub attempts_remaining: i32,
}

/// Load the user's MFA settings (defaults when no row exists yet).
pub(crate) async fn load_mfa_settings(pool: &PgPool, user_id: Uuid) -> Result<MfaSettingsRecord> {
    let query = r"
        SELECT totp_state, totp_secret, email_otp_enabled,
               backup_codes_generated, enforced
        FROM mfa_settings
        WHERE user_id = $1
          AND deleted_at IS NULL
        LIMIT 1
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
        .context("failed to load MFA settings")?;
    Ok(row.map_or_else(MfaSettingsRecord::default, |row| {
        let state: String = row.get("totp_state");
        MfaSettingsRecord {
            totp_state: TotpState::from_str(&state).unwrap_or(TotpState::NotConfigured),
            totp_secret: row.get("totp_secret"),
            email_otp_enabled: row.get("email_otp_enabled"),
            backup_codes_generated: row.get("backup_codes_generated"),
            enforced: row.get("enforced"),
        }
    }))
}

/// Upsert TOTP state and secret together; they transition as a pair.
pub(crate) async fn upsert_totp(
    pool: &PgPool,
    user_id: Uuid,
    state: TotpState,
    secret: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        INSERT INTO mfa_settings (id, user_id, totp_state, totp_secret, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $5)
        ON CONFLICT (user_id) DO UPDATE
        SET totp_state = $3,
            totp_secret = $4,
            updated_at = $5
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(state.as_str())
        .bind(secret)
        .bind(now)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert TOTP state")?;
    Ok(())
}

/// Flip a boolean MFA flag (email OTP enabled, backup codes generated,
/// enforced). Column names are fixed at the call site, never user input.
async fn set_flag(
    pool: &PgPool,
    user_id: Uuid,
    column: &'static str,
    value: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = format!(
        r"
        INSERT INTO mfa_settings (id, user_id, {column}, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $4)
        ON CONFLICT (user_id) DO UPDATE
        SET {column} = $3,
            updated_at = $4
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    sqlx::query(&query)
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(value)
        .bind(now)
        .execute(pool)
        .instrument(span)
        .await
        .with_context(|| format!("failed to set MFA flag {column}"))?;
    Ok(())
}

pub(crate) async fn set_email_otp_enabled(
    pool: &PgPool,
    user_id: Uuid,
    enabled: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    set_flag(pool, user_id, "email_otp_enabled", enabled, now).await
}

pub(crate) async fn set_backup_codes_generated(
    pool: &PgPool,
    user_id: Uuid,
    generated: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    set_flag(pool, user_id, "backup_codes_generated", generated, now).await
}

pub(crate) async fn set_enforced(
    pool: &PgPool,
    user_id: Uuid,
    enforced: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    set_flag(pool, user_id, "enforced", enforced, now).await
}

/// Invalidate prior unconsumed OTPs for the same user/purpose; a new send
/// always supersedes the old code.
pub(crate) async fn invalidate_unconsumed_otps(
    pool: &PgPool,
    user_id: Uuid,
    purpose: OtpPurpose,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE email_otps
        SET invalidated_at = $3
        WHERE user_id = $1
          AND purpose = $2
          AND NOT consumed
          AND invalidated_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(purpose.as_str())
        .bind(now)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to invalidate prior OTPs")?;
    Ok(())
}

pub(crate) async fn insert_email_otp(
    pool: &PgPool,
    user_id: Uuid,
    purpose: OtpPurpose,
    code_hash: &str,
    expires_at: DateTime<Utc>,
    attempts: i32,
    now: DateTime<Utc>,
) -> Result<Uuid> {
    let query = r"
        INSERT INTO email_otps (
            id, user_id, code_hash, purpose, expires_at,
            consumed, attempts_remaining, created_at
        )
        VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(code_hash)
        .bind(purpose.as_str())
        .bind(expires_at)
        .bind(attempts)
        .bind(now)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to insert email OTP")?;
    Ok(row.get("id"))
}

/// Latest live OTP for the user/purpose, expired or not — the engine
/// decides how to treat expiry so it can audit it distinctly.
pub(crate) async fn current_email_otp(
    pool: &PgPool,
    user_id: Uuid,
    purpose: OtpPurpose,
) -> Result<Option<EmailOtpRecord>> {
    let query = r"
        SELECT id, code_hash, expires_at, attempts_remaining
        FROM email_otps
        WHERE user_id = $1
          AND purpose = $2
          AND NOT consumed
          AND invalidated_at IS NULL
          AND deleted_at IS NULL
        ORDER BY created_at DESC
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(purpose.as_str())
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load current email OTP")?;
    Ok(row.map(|row| EmailOtpRecord {
        id: row.get("id"),
        code_hash: row.get("code_hash"),
        expires_at: row.get("expires_at"),
        attempts_remaining: row.get("attempts_remaining"),
    }))
}

/// Burn one verification attempt. Returns the attempts left afterwards, or
/// `None` if the OTP had none to spend (already exhausted).
pub(crate) async fn spend_otp_attempt(pool: &PgPool, otp_id: Uuid) -> Result<Option<i32>> {
    let query = r"
        UPDATE email_otps
        SET attempts_remaining = attempts_remaining - 1
        WHERE id = $1
          AND attempts_remaining > 0
        RETURNING attempts_remaining
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(otp_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to spend OTP attempt")?;
    Ok(row.map(|row| row.get("attempts_remaining")))
}

/// Consume an OTP on successful verification (atomic, single winner).
pub(crate) async fn consume_otp(
    pool: &PgPool,
    otp_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool> {
    let query = r"
        UPDATE email_otps
        SET consumed = TRUE,
            consumed_at = $2
        WHERE id = $1
          AND NOT consumed
          AND invalidated_at IS NULL
          AND expires_at > $2
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(otp_id)
        .bind(now)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume email OTP")?;
    Ok(row.is_some())
}

pub(crate) async fn invalidate_otp(pool: &PgPool, otp_id: Uuid, now: DateTime<Utc>) -> Result<()> {
    let query = r"
        UPDATE email_otps
        SET invalidated_at = $2
        WHERE id = $1
          AND invalidated_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(otp_id)
        .bind(now)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to invalidate email OTP")?;
    Ok(())
}

/// Replace the user's backup-code pool in one transaction: retire every
/// unused code from prior batches and write the fresh batch. Commit-or-
/// nothing, so a mid-batch failure never leaves a partial pool behind.
pub(crate) async fn replace_backup_codes(
    pool: &PgPool,
    user_id: Uuid,
    code_hashes: &[String],
    now: DateTime<Utc>,
) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to begin backup code replacement")?;

    let invalidate = r"
        UPDATE backup_codes
        SET invalidated_at = $2
        WHERE user_id = $1
          AND NOT used
          AND invalidated_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = invalidate
    );
    sqlx::query(invalidate)
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to invalidate backup codes")?;

    let insert = r"
        INSERT INTO backup_codes (id, user_id, code_hash, used, created_at)
        VALUES ($1, $2, $3, FALSE, $4)
    ";
    for hash in code_hashes {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = insert
        );
        sqlx::query(insert)
            .bind(Uuid::now_v7())
            .bind(user_id)
            .bind(hash)
            .bind(now)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert backup code")?;
    }

    tx.commit()
        .await
        .context("failed to commit backup code replacement")?;
    Ok(())
}

/// Unused, non-invalidated code hashes for verification.
pub(crate) async fn unused_backup_codes(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<(Uuid, String)>> {
    let query = r"
        SELECT id, code_hash
        FROM backup_codes
        WHERE user_id = $1
          AND NOT used
          AND invalidated_at IS NULL
          AND deleted_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list backup codes")?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get("id"), row.get("code_hash")))
        .collect())
}

/// Mark one backup code used (atomic, single winner).
pub(crate) async fn consume_backup_code(
    pool: &PgPool,
    code_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool> {
    let query = r"
        UPDATE backup_codes
        SET used = TRUE,
            used_at = $2
        WHERE id = $1
          AND NOT used
          AND invalidated_at IS NULL
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(code_id)
        .bind(now)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume backup code")?;
    Ok(row.is_some())
}

pub(crate) async fn count_unused_backup_codes(pool: &PgPool, user_id: Uuid) -> Result<i64> {
    let query = r"
        SELECT COUNT(*) AS count
        FROM backup_codes
        WHERE user_id = $1
          AND NOT used
          AND invalidated_at IS NULL
          AND deleted_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count backup codes")?;
    Ok(row.get("count"))
}

/// Mint a short-lived MFA challenge for a login attempt.
pub(crate) async fn insert_challenge(
    pool: &PgPool,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Uuid> {
    let query = r"
        INSERT INTO mfa_challenges (id, user_id, expires_at, consumed, created_at)
        VALUES ($1, $2, $3, FALSE, $4)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(expires_at)
        .bind(now)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to insert MFA challenge")?;
    Ok(row.get("id"))
}

/// Consume the user's live challenge; fails when none is open or it expired.
pub(crate) async fn consume_challenge(
    pool: &PgPool,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool> {
    let query = r"
        UPDATE mfa_challenges
        SET consumed = TRUE,
            consumed_at = $2
        WHERE user_id = $1
          AND NOT consumed
          AND expires_at > $2
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(now)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume MFA challenge")?;
    Ok(row.is_some())
}
