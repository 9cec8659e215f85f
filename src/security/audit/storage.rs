//! Database helpers for the append-only audit tables.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{MfaAuditAction, NewLoginAttempt};

/// Insert one login-attempt row and return its id.
pub(crate) async fn insert_login_attempt(
    pool: &PgPool,
    attempt: &NewLoginAttempt,
    risk_score: f64,
    flagged_suspicious: bool,
    attempted_at: DateTime<Utc>,
) -> Result<Uuid> {
    let query = r"
        INSERT INTO login_attempts (
            id, identifier, user_id, succeeded, failure_reason,
            ip_address, user_agent, device_fingerprint,
            risk_score, flagged_suspicious, triggered_lockout,
            attempted_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE, $11, $11)
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
        .bind(&attempt.identifier)
        .bind(attempt.user_id)
        .bind(attempt.succeeded)
        .bind(attempt.failure_reason.map(super::FailureReason::as_str))
        .bind(&attempt.ip_address)
        .bind(attempt.user_agent.as_deref())
        .bind(attempt.device_fingerprint.as_deref())
        .bind(risk_score)
        .bind(flagged_suspicious)
        .bind(attempted_at)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to insert login attempt")?;
    Ok(row.get("id"))
}

/// Set `triggered_lockout` on the attempt that tipped the threshold.
pub(crate) async fn mark_triggered_lockout(pool: &PgPool, attempt_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE login_attempts
        SET triggered_lockout = TRUE
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(attempt_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to flag lockout-triggering attempt")?;
    Ok(())
}

/// Append one MFA audit row.
pub(crate) async fn insert_mfa_audit(
    pool: &PgPool,
    user_id: Uuid,
    action: MfaAuditAction,
    metadata: Value,
    created_at: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        INSERT INTO mfa_audit_log (id, user_id, action, metadata, created_at)
        VALUES ($1, $2, $3, $4::jsonb, $5)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let metadata_text =
        serde_json::to_string(&metadata).context("failed to serialize MFA audit metadata")?;
    sqlx::query(query)
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(action.as_str())
        .bind(metadata_text)
        .bind(created_at)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert MFA audit row")?;
    Ok(())
}

/// Failed attempts for a user since `window_start`.
pub(crate) async fn count_failed_for_user(
    pool: &PgPool,
    user_id: Uuid,
    window_start: DateTime<Utc>,
) -> Result<i64> {
    let query = r"
        SELECT COUNT(*) AS count
        FROM login_attempts
        WHERE user_id = $1
          AND NOT succeeded
          AND attempted_at >= $2
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
        .bind(window_start)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count failed attempts for user")?;
    Ok(row.get("count"))
}

/// Failed attempts from an IP since `window_start`, any identifier.
pub(crate) async fn count_failed_for_ip(
    pool: &PgPool,
    ip_address: &str,
    window_start: DateTime<Utc>,
) -> Result<i64> {
    let query = r"
        SELECT COUNT(*) AS count
        FROM login_attempts
        WHERE ip_address = $1
          AND NOT succeeded
          AND attempted_at >= $2
          AND deleted_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(ip_address)
        .bind(window_start)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count failed attempts for ip")?;
    Ok(row.get("count"))
}

/// All attempts from an IP since `window_start` (risk signal).
pub(crate) async fn count_attempts_for_ip(
    pool: &PgPool,
    ip_address: &str,
    window_start: DateTime<Utc>,
) -> Result<i64> {
    let query = r"
        SELECT COUNT(*) AS count
        FROM login_attempts
        WHERE ip_address = $1
          AND attempted_at >= $2
          AND deleted_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(ip_address)
        .bind(window_start)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count attempts for ip")?;
    Ok(row.get("count"))
}

/// Distinct IPs from the user's successful logins since `window_start`.
pub(crate) async fn successful_ips_for_user(
    pool: &PgPool,
    user_id: Uuid,
    window_start: DateTime<Utc>,
) -> Result<Vec<String>> {
    let query = r"
        SELECT DISTINCT ip_address
        FROM login_attempts
        WHERE user_id = $1
          AND succeeded
          AND attempted_at >= $2
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
        .bind(window_start)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list known ips")?;
    Ok(rows
        .into_iter()
        .map(|row| row.get::<String, _>("ip_address"))
        .collect())
}

/// Distinct user agents from the user's successful logins since `window_start`.
pub(crate) async fn successful_agents_for_user(
    pool: &PgPool,
    user_id: Uuid,
    window_start: DateTime<Utc>,
) -> Result<Vec<String>> {
    let query = r"
        SELECT DISTINCT user_agent
        FROM login_attempts
        WHERE user_id = $1
          AND succeeded
          AND user_agent IS NOT NULL
          AND attempted_at >= $2
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
        .bind(window_start)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list known user agents")?;
    Ok(rows
        .into_iter()
        .map(|row| row.get::<String, _>("user_agent"))
        .collect())
}
