//! Database helpers for lockout episodes.
//!
//! A partial unique index on `(user_id) WHERE is_active` guards the
//! one-active-episode invariant; concurrent escalations surface as a
//! SQLSTATE 23505 which callers treat as "someone else already escalated".

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{LockoutEpisode, LockoutType, ReleaseReason};
use crate::security::is_unique_violation;

const EPISODE_COLUMNS: &str = r"
    id, user_id, lockout_type, level, lockout_start, lockout_end,
    duration_minutes, failed_attempt_count, triggering_ip,
    is_manual, locked_by, released_at, is_active
";

pub(crate) struct NewEpisode {
    pub user_id: Uuid,
    pub lockout_type: LockoutType,
    pub level: i32,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub failed_attempt_count: i32,
    pub triggering_ip: Option<String>,
    pub is_manual: bool,
    pub locked_by: Option<Uuid>,
}

pub(crate) enum InsertEpisodeError {
    /// The partial unique index rejected a second active episode.
    AlreadyActive,
    Other(anyhow::Error),
}

fn episode_from_row(row: &sqlx::postgres::PgRow) -> LockoutEpisode {
    let lockout_type: String = row.get("lockout_type");
    LockoutEpisode {
        id: row.get("id"),
        user_id: row.get("user_id"),
        lockout_type: LockoutType::from_str(&lockout_type).unwrap_or(LockoutType::Automatic),
        level: row.get("level"),
        start: row.get("lockout_start"),
        end: row.get("lockout_end"),
        duration_minutes: row.get("duration_minutes"),
        failed_attempt_count: row.get("failed_attempt_count"),
        triggering_ip: row.get("triggering_ip"),
        is_manual: row.get("is_manual"),
        locked_by: row.get("locked_by"),
        released_at: row.get("released_at"),
        is_active: row.get("is_active"),
    }
}

/// The user's active episode, if any.
pub(crate) async fn active_episode(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<LockoutEpisode>> {
    let query = format!(
        r"
        SELECT {EPISODE_COLUMNS}
        FROM lockout_episodes
        WHERE user_id = $1
          AND is_active
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
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load active lockout episode")?;
    Ok(row.as_ref().map(episode_from_row))
}

/// The user's most recent episode regardless of state (escalation input).
pub(crate) async fn latest_episode(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<LockoutEpisode>> {
    let query = format!(
        r"
        SELECT {EPISODE_COLUMNS}
        FROM lockout_episodes
        WHERE user_id = $1
          AND deleted_at IS NULL
        ORDER BY lockout_start DESC
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
        .context("failed to load latest lockout episode")?;
    Ok(row.as_ref().map(episode_from_row))
}

/// Insert a new active episode.
pub(crate) async fn insert_episode(
    pool: &PgPool,
    episode: NewEpisode,
) -> Result<LockoutEpisode, InsertEpisodeError> {
    let query = format!(
        r"
        INSERT INTO lockout_episodes (
            id, user_id, lockout_type, level, lockout_start, lockout_end,
            duration_minutes, failed_attempt_count, triggering_ip,
            is_manual, locked_by, is_active, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE, $5)
        RETURNING {EPISODE_COLUMNS}
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let result = sqlx::query(&query)
        .bind(Uuid::now_v7())
        .bind(episode.user_id)
        .bind(episode.lockout_type.as_str())
        .bind(episode.level)
        .bind(episode.start)
        .bind(episode.end)
        .bind(episode.duration_minutes)
        .bind(episode.failed_attempt_count)
        .bind(episode.triggering_ip.as_deref())
        .bind(episode.is_manual)
        .bind(episode.locked_by)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match result {
        Ok(row) => Ok(episode_from_row(&row)),
        Err(err) if is_unique_violation(&err) => Err(InsertEpisodeError::AlreadyActive),
        Err(err) => Err(InsertEpisodeError::Other(
            anyhow::Error::new(err).context("failed to insert lockout episode"),
        )),
    }
}

/// Close one episode by id. Conditional on `is_active`, so concurrent
/// closers are idempotent.
pub(crate) async fn release_episode(
    pool: &PgPool,
    episode_id: Uuid,
    released_at: DateTime<Utc>,
    reason: ReleaseReason,
    released_by: Option<Uuid>,
) -> Result<bool> {
    let query = r"
        UPDATE lockout_episodes
        SET is_active = FALSE,
            lockout_end = COALESCE(lockout_end, $2),
            released_at = $2,
            release_reason = $3,
            released_by = $4,
            updated_at = $2
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
        .bind(episode_id)
        .bind(released_at)
        .bind(reason.as_str())
        .bind(released_by)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to release lockout episode")?;
    Ok(row.is_some())
}

/// Close whatever episode is active for the user.
pub(crate) async fn release_active(
    pool: &PgPool,
    user_id: Uuid,
    released_at: DateTime<Utc>,
    reason: ReleaseReason,
    released_by: Option<Uuid>,
) -> Result<bool> {
    let query = r"
        UPDATE lockout_episodes
        SET is_active = FALSE,
            lockout_end = COALESCE(lockout_end, $2),
            released_at = $2,
            release_reason = $3,
            released_by = $4,
            updated_at = $2
        WHERE user_id = $1
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
        .bind(user_id)
        .bind(released_at)
        .bind(reason.as_str())
        .bind(released_by)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to release active lockout")?;
    Ok(row.is_some())
}
