//! Database helpers for security settings rows.
//!
//! One global-default row (`user_id IS NULL AND is_global_default`), at most
//! one override row per user. Reads skip soft-deleted rows.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{SecuritySettings, SessionOverflowPolicy};

const SETTINGS_COLUMNS: &str = r"
    max_failed_attempts,
    initial_lockout_minutes,
    max_lockout_minutes,
    lockout_multiplier,
    failed_attempt_window_minutes,
    progressive_lockout_enabled,
    auto_unlock_after_lockout,
    suspicious_activity_threshold,
    max_concurrent_sessions,
    session_timeout_minutes,
    session_overflow_policy,
    device_fingerprinting_enabled
";

fn settings_from_row(row: &sqlx::postgres::PgRow) -> SecuritySettings {
    let policy: String = row.get("session_overflow_policy");
    SecuritySettings {
        max_failed_attempts: row.get("max_failed_attempts"),
        initial_lockout_minutes: row.get("initial_lockout_minutes"),
        max_lockout_minutes: row.get("max_lockout_minutes"),
        lockout_multiplier: row.get("lockout_multiplier"),
        failed_attempt_window_minutes: row.get("failed_attempt_window_minutes"),
        progressive_lockout_enabled: row.get("progressive_lockout_enabled"),
        auto_unlock_after_lockout: row.get("auto_unlock_after_lockout"),
        suspicious_activity_threshold: row.get("suspicious_activity_threshold"),
        max_concurrent_sessions: row.get("max_concurrent_sessions"),
        session_timeout_minutes: row.get("session_timeout_minutes"),
        session_overflow_policy: SessionOverflowPolicy::from_str(&policy)
            .unwrap_or(SessionOverflowPolicy::DenyNew),
        device_fingerprinting_enabled: row.get("device_fingerprinting_enabled"),
    }
}

/// Load the per-user override row, if any.
pub(crate) async fn load_user_override(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<SecuritySettings>> {
    let query = format!(
        r"
        SELECT {SETTINGS_COLUMNS}
        FROM security_settings
        WHERE user_id = $1
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
        .context("failed to load user security settings")?;
    Ok(row.as_ref().map(settings_from_row))
}

/// Load the single global-default row.
pub(crate) async fn load_global_default(pool: &PgPool) -> Result<Option<SecuritySettings>> {
    let query = format!(
        r"
        SELECT {SETTINGS_COLUMNS}
        FROM security_settings
        WHERE is_global_default
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
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load global default security settings")?;
    Ok(row.as_ref().map(settings_from_row))
}

/// Create or replace a user's override row.
pub(crate) async fn upsert_user_override(
    pool: &PgPool,
    user_id: Uuid,
    settings: &SecuritySettings,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        INSERT INTO security_settings (
            id, user_id, is_global_default,
            max_failed_attempts, initial_lockout_minutes, max_lockout_minutes,
            lockout_multiplier, failed_attempt_window_minutes,
            progressive_lockout_enabled, auto_unlock_after_lockout,
            suspicious_activity_threshold, max_concurrent_sessions,
            session_timeout_minutes, session_overflow_policy,
            device_fingerprinting_enabled, created_at, updated_at
        )
        VALUES ($1, $2, FALSE, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
        ON CONFLICT (user_id) WHERE deleted_at IS NULL DO UPDATE
        SET max_failed_attempts = $3,
            initial_lockout_minutes = $4,
            max_lockout_minutes = $5,
            lockout_multiplier = $6,
            failed_attempt_window_minutes = $7,
            progressive_lockout_enabled = $8,
            auto_unlock_after_lockout = $9,
            suspicious_activity_threshold = $10,
            max_concurrent_sessions = $11,
            session_timeout_minutes = $12,
            session_overflow_policy = $13,
            device_fingerprinting_enabled = $14,
            updated_at = $15
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
        .bind(settings.max_failed_attempts)
        .bind(settings.initial_lockout_minutes)
        .bind(settings.max_lockout_minutes)
        .bind(settings.lockout_multiplier)
        .bind(settings.failed_attempt_window_minutes)
        .bind(settings.progressive_lockout_enabled)
        .bind(settings.auto_unlock_after_lockout)
        .bind(settings.suspicious_activity_threshold)
        .bind(settings.max_concurrent_sessions)
        .bind(settings.session_timeout_minutes)
        .bind(settings.session_overflow_policy.as_str())
        .bind(settings.device_fingerprinting_enabled)
        .bind(now)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert user security settings")?;
    Ok(())
}

/// Replace the global default row in place.
pub(crate) async fn update_global_default(
    pool: &PgPool,
    settings: &SecuritySettings,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE security_settings
        SET max_failed_attempts = $1,
            initial_lockout_minutes = $2,
            max_lockout_minutes = $3,
            lockout_multiplier = $4,
            failed_attempt_window_minutes = $5,
            progressive_lockout_enabled = $6,
            auto_unlock_after_lockout = $7,
            suspicious_activity_threshold = $8,
            max_concurrent_sessions = $9,
            session_timeout_minutes = $10,
            session_overflow_policy = $11,
            device_fingerprinting_enabled = $12,
            updated_at = $13
        WHERE is_global_default
          AND deleted_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(settings.max_failed_attempts)
        .bind(settings.initial_lockout_minutes)
        .bind(settings.max_lockout_minutes)
        .bind(settings.lockout_multiplier)
        .bind(settings.failed_attempt_window_minutes)
        .bind(settings.progressive_lockout_enabled)
        .bind(settings.auto_unlock_after_lockout)
        .bind(settings.suspicious_activity_threshold)
        .bind(settings.max_concurrent_sessions)
        .bind(settings.session_timeout_minutes)
        .bind(settings.session_overflow_policy.as_str())
        .bind(settings.device_fingerprinting_enabled)
        .bind(now)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update global default security settings")?;
    Ok(())
}
