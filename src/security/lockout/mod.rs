//! Progressive account lockout.
//!
//! The engine consumes attempt history plus effective settings and decides
//! whether a user or source IP is currently locked, and how to escalate when
//! another failure lands. Escalation state (the episode `level`) is explicit
//! on episode rows so `check_user_locked` stays O(1); the failure count is
//! always recomputed from `login_attempts` rows inside the sliding window so
//! there is no counter to drift.

pub mod policy;
pub(crate) mod storage;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::audit::{AuditTrail, LoginAttemptRecord};
use super::clock::Clock;
use super::error::SecurityError;
use super::external::NotificationDispatcher;
use super::settings::SettingsResolver;

/// Failed attempts from one IP within [`IP_WINDOW`] that trigger the
/// IP-scoped gate. Evaluated independently of any user-scoped lockout.
const IP_FAILED_ATTEMPT_LIMIT: i64 = 20;
const IP_WINDOW: Duration = Duration::hours(1);

const SECURITY_ALERT_TEMPLATE: &str = "security_alert_lockout";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LockoutType {
    Automatic,
    Manual,
    SuspiciousActivity,
    PolicyViolation,
}

impl LockoutType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::PolicyViolation => "policy_violation",
        }
    }

    pub(crate) fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "automatic" => Some(Self::Automatic),
            "manual" => Some(Self::Manual),
            "suspicious_activity" => Some(Self::SuspiciousActivity),
            "policy_violation" => Some(Self::PolicyViolation),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    AutomaticTimeout,
    ManualRelease,
    SystemPolicy,
}

impl ReleaseReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::AutomaticTimeout => "automatic_timeout",
            Self::ManualRelease => "manual_release",
            Self::SystemPolicy => "system_policy",
        }
    }
}

/// One lockout episode. Created on escalation, updated only to close or to
/// record a release.
#[derive(Clone, Debug)]
pub struct LockoutEpisode {
    pub id: Uuid,
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
    pub released_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// The answer to "is this subject locked right now".
#[derive(Clone, Debug, Default)]
pub struct LockoutStatus {
    pub locked: bool,
    pub level: Option<i32>,
    pub retry_after_seconds: Option<i64>,
    pub episode_id: Option<Uuid>,
}

impl LockoutStatus {
    fn unlocked() -> Self {
        Self::default()
    }

    fn from_episode(episode: &LockoutEpisode, retry_after_seconds: Option<i64>) -> Self {
        Self {
            locked: true,
            level: Some(episode.level),
            retry_after_seconds,
            episode_id: Some(episode.id),
        }
    }
}

/// Stateful lockout policy engine.
#[derive(Clone)]
pub struct LockoutEngine {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    settings: SettingsResolver,
    audit: AuditTrail,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl LockoutEngine {
    #[must_use]
    pub fn new(
        pool: PgPool,
        clock: Arc<dyn Clock>,
        settings: SettingsResolver,
        audit: AuditTrail,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            pool,
            clock,
            settings,
            audit,
            notifier,
        }
    }

    /// Whether the user is currently locked. Expired episodes are lazily
    /// closed here when auto-unlock is enabled, so lockouts self-heal
    /// without waiting for a sweep; with auto-unlock off the episode keeps
    /// reporting locked until a manual release.
    ///
    /// # Errors
    /// Persistence errors fail closed in callers.
    pub async fn check_user_locked(&self, user_id: Uuid) -> Result<LockoutStatus, SecurityError> {
        let Some(episode) = storage::active_episode(&self.pool, user_id).await? else {
            return Ok(LockoutStatus::unlocked());
        };
        let settings = self.settings.resolve(Some(user_id)).await?;
        let now = self.clock.now();
        match policy::episode_state(episode.end, now, settings.auto_unlock_after_lockout) {
            policy::EpisodeState::Active {
                retry_after_seconds,
            } => Ok(LockoutStatus::from_episode(
                &episode,
                Some(retry_after_seconds),
            )),
            policy::EpisodeState::Expired => {
                // Lazy close; the conditional update makes concurrent
                // closers idempotent.
                storage::release_episode(
                    &self.pool,
                    episode.id,
                    now,
                    ReleaseReason::AutomaticTimeout,
                    None,
                )
                .await?;
                Ok(LockoutStatus::unlocked())
            }
            policy::EpisodeState::ExpiredButHeld | policy::EpisodeState::Indefinite => {
                Ok(LockoutStatus::from_episode(&episode, None))
            }
        }
    }

    /// IP-scoped gate: too many failures from one address within the last
    /// hour blocks the address regardless of which identifiers were tried.
    ///
    /// # Errors
    /// Persistence errors fail closed in callers.
    pub async fn check_ip_blocked(&self, ip_address: &str) -> Result<bool, SecurityError> {
        let window_start = self.clock.now() - IP_WINDOW;
        let failed = self
            .audit
            .failed_attempts_for_ip_since(ip_address, window_start)
            .await?;
        Ok(failed > IP_FAILED_ATTEMPT_LIMIT)
    }

    /// Evaluate a failed attempt against the sliding window, creating or
    /// escalating a lockout episode when the threshold is reached. Returns
    /// the episode created by this call, if any.
    ///
    /// Two concurrent failures may both decide to escalate; the partial
    /// unique index on active episodes makes one of them lose, and the loser
    /// re-reads the winning row instead of failing.
    ///
    /// # Errors
    /// Persistence errors; the caller must fail the login attempt closed.
    pub async fn record_failure(
        &self,
        user_id: Uuid,
        attempt: &LoginAttemptRecord,
        ip_address: &str,
    ) -> Result<Option<LockoutEpisode>, SecurityError> {
        let settings = self.settings.resolve(Some(user_id)).await?;
        let now = self.clock.now();
        let window_start = policy::window_start(&settings, now);

        let failed_in_window = self
            .audit
            .failed_attempts_for_user_since(user_id, window_start)
            .await?;
        if !policy::threshold_reached(&settings, failed_in_window) {
            return Ok(None);
        }

        // Already locked: nothing to escalate, the active episode stands.
        if let Some(active) = storage::active_episode(&self.pool, user_id).await? {
            if policy::episode_state(active.end, now, settings.auto_unlock_after_lockout)
                != policy::EpisodeState::Expired
            {
                return Ok(None);
            }
            // Expired but not yet lazily closed; close it so the new episode
            // can take the active slot.
            storage::release_episode(
                &self.pool,
                active.id,
                now,
                ReleaseReason::AutomaticTimeout,
                None,
            )
            .await?;
        }

        let prior = storage::latest_episode(&self.pool, user_id).await?;
        let level = policy::next_level(
            &settings,
            prior.map(|episode| (episode.level, episode.end, episode.start)),
            window_start,
        );
        let duration = policy::duration_minutes(&settings, level);

        let lockout_type = if attempt.flagged_suspicious {
            LockoutType::SuspiciousActivity
        } else {
            LockoutType::Automatic
        };

        let episode = match storage::insert_episode(
            &self.pool,
            storage::NewEpisode {
                user_id,
                lockout_type,
                level,
                start: now,
                end: Some(now + Duration::minutes(duration)),
                duration_minutes: Some(duration),
                failed_attempt_count: i32::try_from(failed_in_window).unwrap_or(i32::MAX),
                triggering_ip: Some(ip_address.to_string()),
                is_manual: false,
                locked_by: None,
            },
        )
        .await
        {
            Ok(episode) => episode,
            Err(storage::InsertEpisodeError::AlreadyActive) => {
                // Lost the escalation race; the winner's episode is
                // authoritative.
                warn!(%user_id, "concurrent lockout escalation, reusing existing episode");
                return Ok(storage::active_episode(&self.pool, user_id).await?);
            }
            Err(storage::InsertEpisodeError::Other(err)) => return Err(err.into()),
        };

        self.audit.mark_triggered_lockout(attempt.id).await?;

        info!(
            %user_id,
            level = episode.level,
            duration_minutes = duration,
            "account locked out"
        );

        // Security-alert event; delivery is someone else's problem.
        if let Err(err) = self
            .notifier
            .send(
                user_id,
                SECURITY_ALERT_TEMPLATE,
                json!({
                    "level": episode.level,
                    "duration_minutes": duration,
                    "triggering_ip": ip_address,
                }),
            )
            .await
        {
            warn!("failed to dispatch lockout alert: {err}");
        }

        Ok(Some(episode))
    }

    /// A successful login never shrinks the failure window or closes
    /// episodes; only time passing out of the window reduces the count.
    pub fn record_success(&self, user_id: Uuid) {
        tracing::debug!(%user_id, "successful login; lockout history unchanged");
    }

    /// Administrative lockout. An existing active episode is released first
    /// so the active-episode invariant holds.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn manual_lockout(
        &self,
        user_id: Uuid,
        locked_by: Uuid,
        duration_minutes: Option<i64>,
    ) -> Result<LockoutEpisode, SecurityError> {
        let now = self.clock.now();
        if storage::active_episode(&self.pool, user_id).await?.is_some() {
            storage::release_active(
                &self.pool,
                user_id,
                now,
                ReleaseReason::ManualRelease,
                Some(locked_by),
            )
            .await?;
        }
        let episode = match storage::insert_episode(
            &self.pool,
            storage::NewEpisode {
                user_id,
                lockout_type: LockoutType::Manual,
                level: 1,
                start: now,
                end: duration_minutes.map(|minutes| now + Duration::minutes(minutes)),
                duration_minutes,
                failed_attempt_count: 0,
                triggering_ip: None,
                is_manual: true,
                locked_by: Some(locked_by),
            },
        )
        .await
        {
            Ok(episode) => episode,
            Err(storage::InsertEpisodeError::AlreadyActive) => storage::active_episode(&self.pool, user_id)
                .await?
                .ok_or_else(|| {
                    SecurityError::Persistence(anyhow::anyhow!(
                        "active lockout vanished during manual lockout"
                    ))
                })?,
            Err(storage::InsertEpisodeError::Other(err)) => return Err(err.into()),
        };
        warn!(%user_id, %locked_by, "manual lockout applied");
        Ok(episode)
    }

    /// Manual release by an administrator. Returns false when nothing was
    /// active.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn manual_release(
        &self,
        user_id: Uuid,
        released_by: Uuid,
    ) -> Result<bool, SecurityError> {
        let released = storage::release_active(
            &self.pool,
            user_id,
            self.clock.now(),
            ReleaseReason::ManualRelease,
            Some(released_by),
        )
        .await?;
        if released {
            info!(%user_id, %released_by, "lockout manually released");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockout_type_round_trips() {
        for lockout_type in [
            LockoutType::Automatic,
            LockoutType::Manual,
            LockoutType::SuspiciousActivity,
            LockoutType::PolicyViolation,
        ] {
            assert_eq!(
                LockoutType::from_str(lockout_type.as_str()),
                Some(lockout_type)
            );
        }
    }

    #[test]
    fn status_from_episode_carries_level() {
        let episode = LockoutEpisode {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            lockout_type: LockoutType::Automatic,
            level: 3,
            start: Utc::now(),
            end: None,
            duration_minutes: None,
            failed_attempt_count: 5,
            triggering_ip: None,
            is_manual: false,
            locked_by: None,
            released_at: None,
            is_active: true,
        };
        let status = LockoutStatus::from_episode(&episode, Some(60));
        assert!(status.locked);
        assert_eq!(status.level, Some(3));
        assert_eq!(status.retry_after_seconds, Some(60));
    }
}
