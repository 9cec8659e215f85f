//! Database helpers for user sessions.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{SessionRecord, TerminationReason};

const SESSION_COLUMNS: &str = r"
    id, user_id, device_name, ip_address, user_agent, device_fingerprint,
    created_at, last_activity, expires_at, is_active
";

fn session_from_row(row: &sqlx::postgres::PgRow) -> SessionRecord {
    SessionRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        device_name: row.get("device_name"),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        device_fingerprint: row.get("device_fingerprint"),
        created_at: row.get("created_at"),
        last_activity: row.get("last_activity"),
        expires_at: row.get("expires_at"),
        is_active: row.get("is_active"),
    }
}

pub(crate) struct NewSession<'a> {
    pub user_id: Uuid,
    pub token_hash: &'a str,
    pub device_name: Option<&'a str>,
    pub ip_address: &'a str,
    pub user_agent: Option<&'a str>,
    pub device_fingerprint: Option<&'a str>,
    pub expires_at: DateTime<Utc>,
}

pub(crate) async fn insert_session(
    pool: &PgPool,
    session: NewSession<'_>,
    now: DateTime<Utc>,
) -> Result<SessionRecord> {
    let query = format!(
        r"
        INSERT INTO user_sessions (
            id, user_id, token_hash, device_name, ip_address, user_agent,
            device_fingerprint, created_at, last_activity, expires_at, is_active
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, $9, TRUE)
        RETURNING {SESSION_COLUMNS}
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(Uuid::now_v7())
        .bind(session.user_id)
        .bind(session.token_hash)
        .bind(session.device_name)
        .bind(session.ip_address)
        .bind(session.user_agent)
        .bind(session.device_fingerprint)
        .bind(now)
        .bind(session.expires_at)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to insert session")?;
    Ok(session_from_row(&row))
}

pub(crate) async fn load_session(
    pool: &PgPool,
    session_id: Uuid,
) -> Result<Option<SessionRecord>> {
    let query = format!(
        r"
        SELECT {SESSION_COLUMNS}
        FROM user_sessions
        WHERE id = $1
          AND deleted_at IS NULL
        LIMIT 1
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(session_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load session")?;
    Ok(row.as_ref().map(session_from_row))
}

/// Active sessions for a user, most recently active first.
pub(crate) async fn active_sessions(pool: &PgPool, user_id: Uuid) -> Result<Vec<SessionRecord>> {
    let query = format!(
        r"
        SELECT {SESSION_COLUMNS}
        FROM user_sessions
        WHERE user_id = $1
          AND is_active
          AND deleted_at IS NULL
        ORDER BY last_activity DESC
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list active sessions")?;
    Ok(rows.iter().map(session_from_row).collect())
}

pub(crate) async fn count_active_sessions(pool: &PgPool, user_id: Uuid) -> Result<i64> {
    let query = r"
        SELECT COUNT(*) AS count
        FROM user_sessions
        WHERE user_id = $1
          AND is_active
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
        .context("failed to count active sessions")?;
    Ok(row.get("count"))
}

/// The least-recently-active session, the eviction candidate.
pub(crate) async fn oldest_active_session(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<SessionRecord>> {
    let query = format!(
        r"
        SELECT {SESSION_COLUMNS}
        FROM user_sessions
        WHERE user_id = $1
          AND is_active
          AND deleted_at IS NULL
        ORDER BY last_activity ASC
        LIMIT 1
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load oldest active session")?;
    Ok(row.as_ref().map(session_from_row))
}

/// Slide the session forward. Conditional on being active and unexpired, so
/// a touch can never revive a dead session.
pub(crate) async fn touch_session(
    pool: &PgPool,
    session_id: Uuid,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<bool> {
    let query = r"
        UPDATE user_sessions
        SET last_activity = $2,
            expires_at = $3
        WHERE id = $1
          AND is_active
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
        .bind(session_id)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to touch session")?;
    Ok(row.is_some())
}

/// Terminate one session. Conditional on `is_active`, idempotent.
pub(crate) async fn terminate_session(
    pool: &PgPool,
    session_id: Uuid,
    reason: TerminationReason,
    now: DateTime<Utc>,
) -> Result<bool> {
    let query = r"
        UPDATE user_sessions
        SET is_active = FALSE,
            terminated_at = $2,
            termination_reason = $3
        WHERE id = $1
          AND is_active
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(session_id)
        .bind(now)
        .bind(reason.as_str())
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to terminate session")?;
    Ok(row.is_some())
}

/// Terminate every active session for the user except `keep`.
pub(crate) async fn terminate_all_except(
    pool: &PgPool,
    user_id: Uuid,
    keep: Uuid,
    reason: TerminationReason,
    now: DateTime<Utc>,
) -> Result<u64> {
    let query = r"
        UPDATE user_sessions
        SET is_active = FALSE,
            terminated_at = $3,
            termination_reason = $4
        WHERE user_id = $1
          AND id <> $2
          AND is_active
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(keep)
        .bind(now)
        .bind(reason.as_str())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to terminate other sessions")?;
    Ok(result.rows_affected())
}

/// Close every expired session still marked active. Conditional, so
/// concurrent sweepers and lazy closers never double-count.
pub(crate) async fn sweep_expired(pool: &PgPool, now: DateTime<Utc>) -> Result<u64> {
    let query = r"
        UPDATE user_sessions
        SET is_active = FALSE,
            terminated_at = $1,
            termination_reason = $2
        WHERE is_active
          AND expires_at < $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(now)
        .bind(TerminationReason::Expired.as_str())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to sweep expired sessions")?;
    Ok(result.rows_affected())
}
