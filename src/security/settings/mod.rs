//! Security settings: global defaults plus optional per-user overrides.
//!
//! Exactly one global-default row exists; a user may have at most one
//! override row. Effective settings are resolved as
//! `per_user_row(user_id).unwrap_or(global_default)`. The global default is
//! read on every authentication attempt, so it is cached with a short TTL
//! and the cache is invalidated on any settings write.

pub(crate) mod storage;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::{Arc, RwLock};
use std::time::{Duration as StdDuration, Instant};
use utoipa::ToSchema;
use uuid::Uuid;

use super::clock::Clock;
use super::error::SecurityError;

const GLOBAL_DEFAULT_CACHE_TTL: StdDuration = StdDuration::from_secs(30);

/// What happens when a new session would exceed the concurrent-session limit.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionOverflowPolicy {
    /// Reject the new session.
    DenyNew,
    /// Terminate the least-recently-active session to make room.
    EvictOldest,
}

impl SessionOverflowPolicy {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::DenyNew => "deny_new",
            Self::EvictOldest => "evict_oldest",
        }
    }

    pub(crate) fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "deny_new" => Some(Self::DenyNew),
            "evict_oldest" => Some(Self::EvictOldest),
            _ => None,
        }
    }
}

/// Effective security policy for one user (or the global default).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SecuritySettings {
    pub max_failed_attempts: i32,
    pub initial_lockout_minutes: i64,
    pub max_lockout_minutes: i64,
    pub lockout_multiplier: f64,
    pub failed_attempt_window_minutes: i64,
    pub progressive_lockout_enabled: bool,
    pub auto_unlock_after_lockout: bool,
    pub suspicious_activity_threshold: f64,
    pub max_concurrent_sessions: i32,
    pub session_timeout_minutes: i64,
    pub session_overflow_policy: SessionOverflowPolicy,
    pub device_fingerprinting_enabled: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            initial_lockout_minutes: 15,
            max_lockout_minutes: 24 * 60,
            lockout_multiplier: 2.0,
            failed_attempt_window_minutes: 60,
            progressive_lockout_enabled: true,
            auto_unlock_after_lockout: true,
            suspicious_activity_threshold: 0.7,
            max_concurrent_sessions: 5,
            session_timeout_minutes: 60,
            session_overflow_policy: SessionOverflowPolicy::EvictOldest,
            device_fingerprinting_enabled: true,
        }
    }
}

impl SecuritySettings {
    /// Reject out-of-range fields before anything touches storage.
    ///
    /// # Errors
    /// Returns [`SecurityError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<(), SecurityError> {
        if self.max_failed_attempts < 1 {
            return Err(SecurityError::Validation(
                "max_failed_attempts must be positive".to_string(),
            ));
        }
        if self.initial_lockout_minutes < 1 {
            return Err(SecurityError::Validation(
                "initial_lockout_minutes must be positive".to_string(),
            ));
        }
        if self.max_lockout_minutes < self.initial_lockout_minutes {
            return Err(SecurityError::Validation(
                "max_lockout_minutes must be >= initial_lockout_minutes".to_string(),
            ));
        }
        if self.lockout_multiplier < 1.0 {
            return Err(SecurityError::Validation(
                "lockout_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.failed_attempt_window_minutes < 1 {
            return Err(SecurityError::Validation(
                "failed_attempt_window_minutes must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.suspicious_activity_threshold) {
            return Err(SecurityError::Validation(
                "suspicious_activity_threshold must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.max_concurrent_sessions < 1 {
            return Err(SecurityError::Validation(
                "max_concurrent_sessions must be positive".to_string(),
            ));
        }
        if self.session_timeout_minutes < 1 {
            return Err(SecurityError::Validation(
                "session_timeout_minutes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

struct CachedDefault {
    fetched_at: Instant,
    settings: SecuritySettings,
}

/// Resolves effective settings and maintains the global-default cache.
#[derive(Clone)]
pub struct SettingsResolver {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    cache: Arc<RwLock<Option<CachedDefault>>>,
}

impl SettingsResolver {
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Effective settings for a user: the override row when present, the
    /// global default otherwise. `None` resolves straight to the default
    /// (attempts against unknown identifiers have no user to look up).
    ///
    /// # Errors
    /// Fails closed on storage errors; callers must deny the request.
    pub async fn resolve(&self, user_id: Option<Uuid>) -> Result<SecuritySettings, SecurityError> {
        if let Some(user_id) = user_id {
            if let Some(row) = storage::load_user_override(&self.pool, user_id).await? {
                return Ok(row);
            }
        }
        self.global_default().await
    }

    /// The global default row, cached for [`GLOBAL_DEFAULT_CACHE_TTL`].
    ///
    /// # Errors
    /// Returns a persistence error if the row is missing or unreadable.
    pub async fn global_default(&self) -> Result<SecuritySettings, SecurityError> {
        if let Some(settings) = self.cached_default() {
            return Ok(settings);
        }
        let settings = storage::load_global_default(&self.pool)
            .await?
            .context("global default security settings row is missing")?;
        self.store_default(settings.clone());
        Ok(settings)
    }

    /// Write or replace the per-user override. Admin-only fields are the
    /// caller's concern; this validates ranges and persists.
    ///
    /// # Errors
    /// Validation errors for out-of-range fields, persistence errors otherwise.
    pub async fn update_user_override(
        &self,
        user_id: Uuid,
        settings: &SecuritySettings,
    ) -> Result<(), SecurityError> {
        settings.validate()?;
        let now = self.clock.now();
        storage::upsert_user_override(&self.pool, user_id, settings, now).await?;
        self.invalidate();
        Ok(())
    }

    /// Replace the global default row.
    ///
    /// # Errors
    /// Validation errors for out-of-range fields, persistence errors otherwise.
    pub async fn update_global_default(
        &self,
        settings: &SecuritySettings,
    ) -> Result<(), SecurityError> {
        settings.validate()?;
        let now = self.clock.now();
        storage::update_global_default(&self.pool, settings, now).await?;
        self.invalidate();
        Ok(())
    }

    pub(crate) fn invalidate(&self) {
        let mut guard = self
            .cache
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = None;
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn cached_default(&self) -> Option<SecuritySettings> {
        let guard = self
            .cache
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.as_ref().and_then(|cached| {
            (cached.fetched_at.elapsed() < GLOBAL_DEFAULT_CACHE_TTL)
                .then(|| cached.settings.clone())
        })
    }

    fn store_default(&self, settings: SecuritySettings) {
        let mut guard = self
            .cache
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(CachedDefault {
            fetched_at: Instant::now(),
            settings,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SecuritySettings::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_attempt_threshold() {
        let settings = SecuritySettings {
            max_failed_attempts: 0,
            ..SecuritySettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SecurityError::Validation(_))
        ));
    }

    #[test]
    fn rejects_max_below_initial_lockout() {
        let settings = SecuritySettings {
            initial_lockout_minutes: 60,
            max_lockout_minutes: 30,
            ..SecuritySettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_shrinking_multiplier() {
        let settings = SecuritySettings {
            lockout_multiplier: 0.5,
            ..SecuritySettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let settings = SecuritySettings {
            suspicious_activity_threshold: 1.5,
            ..SecuritySettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn overflow_policy_round_trips() {
        for policy in [
            SessionOverflowPolicy::DenyNew,
            SessionOverflowPolicy::EvictOldest,
        ] {
            assert_eq!(
                SessionOverflowPolicy::from_str(policy.as_str()),
                Some(policy)
            );
        }
        assert_eq!(SessionOverflowPolicy::from_str("bogus"), None);
    }
}
