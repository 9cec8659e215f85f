//! Append-only audit trail: login attempts and MFA events.
//!
//! Pure data sink; no decision logic lives here. Attempt rows are written
//! exactly once per authentication attempt and never mutated, except for the
//! `triggered_lockout` flag the lockout engine sets on the row that tipped
//! an account over the threshold.

pub(crate) mod risk;
pub(crate) mod storage;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::clock::Clock;
use super::error::SecurityError;

/// Why a login attempt failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    BadCredential,
    Locked,
    Unconfirmed,
    Disabled,
    MfaRequired,
    PolicyBlocked,
    RateLimited,
    Unknown,
}

impl FailureReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::BadCredential => "bad_credential",
            Self::Locked => "locked",
            Self::Unconfirmed => "unconfirmed",
            Self::Disabled => "disabled",
            Self::MfaRequired => "mfa_required",
            Self::PolicyBlocked => "policy_blocked",
            Self::RateLimited => "rate_limited",
            Self::Unknown => "unknown",
        }
    }
}

/// MFA audit actions, one row per event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaAuditAction {
    Enabled,
    Disabled,
    TotpSetup,
    Verified,
    Failed,
    OtpSent,
    OtpVerified,
    OtpFailed,
    OtpExpired,
    BackupUsed,
    BackupFailed,
    BackupRegenerated,
    Bypassed,
    Enforced,
    Suspicious,
    RecoveryStarted,
    RecoveryCompleted,
}

impl MfaAuditAction {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::TotpSetup => "totp_setup",
            Self::Verified => "verified",
            Self::Failed => "failed",
            Self::OtpSent => "otp_sent",
            Self::OtpVerified => "otp_verified",
            Self::OtpFailed => "otp_failed",
            Self::OtpExpired => "otp_expired",
            Self::BackupUsed => "backup_used",
            Self::BackupFailed => "backup_failed",
            Self::BackupRegenerated => "backup_regenerated",
            Self::Bypassed => "bypassed",
            Self::Enforced => "enforced",
            Self::Suspicious => "suspicious",
            Self::RecoveryStarted => "recovery_started",
            Self::RecoveryCompleted => "recovery_completed",
        }
    }
}

/// Everything known about an attempt before it is written.
#[derive(Clone, Debug)]
pub struct NewLoginAttempt {
    /// Email/username as presented; may not resolve to a user.
    pub identifier: String,
    pub user_id: Option<Uuid>,
    pub succeeded: bool,
    pub failure_reason: Option<FailureReason>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
}

/// A persisted attempt row.
#[derive(Clone, Debug)]
pub struct LoginAttemptRecord {
    pub id: Uuid,
    pub risk_score: f64,
    pub flagged_suspicious: bool,
    pub attempted_at: DateTime<Utc>,
}

/// Append-only recorder for attempts and MFA events.
#[derive(Clone)]
pub struct AuditTrail {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl AuditTrail {
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Score and persist one login attempt. A failed write must fail the
    /// calling authentication flow closed; this surfaces as
    /// [`SecurityError::Persistence`].
    ///
    /// # Errors
    /// Persistence errors only; scoring falls back to a moderate risk score.
    pub async fn record_attempt(
        &self,
        attempt: &NewLoginAttempt,
        suspicious_threshold: f64,
    ) -> Result<LoginAttemptRecord, SecurityError> {
        let now = self.clock.now();
        let signals = self.collect_risk_signals(attempt, now).await;
        let risk_score = match signals {
            Ok(signals) => risk::score(&signals),
            Err(err) => {
                // Scoring is advisory; never block the audit write on it.
                tracing::warn!("risk scoring failed, using moderate default: {err}");
                risk::MODERATE_RISK
            }
        };
        let flagged_suspicious = risk_score >= suspicious_threshold;

        let id = storage::insert_login_attempt(
            &self.pool,
            attempt,
            risk_score,
            flagged_suspicious,
            now,
        )
        .await?;

        Ok(LoginAttemptRecord {
            id,
            risk_score,
            flagged_suspicious,
            attempted_at: now,
        })
    }

    /// Flag the attempt row that pushed an account over the lockout threshold.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn mark_triggered_lockout(&self, attempt_id: Uuid) -> Result<(), SecurityError> {
        storage::mark_triggered_lockout(&self.pool, attempt_id).await?;
        Ok(())
    }

    /// Append one MFA audit row.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn log_mfa(
        &self,
        user_id: Uuid,
        action: MfaAuditAction,
        metadata: Value,
    ) -> Result<(), SecurityError> {
        storage::insert_mfa_audit(&self.pool, user_id, action, metadata, self.clock.now()).await?;
        Ok(())
    }

    /// Failed attempts for a user since `window_start` (sliding window reads
    /// come from attempt rows, not a separate counter).
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn failed_attempts_for_user_since(
        &self,
        user_id: Uuid,
        window_start: DateTime<Utc>,
    ) -> Result<i64, SecurityError> {
        Ok(storage::count_failed_for_user(&self.pool, user_id, window_start).await?)
    }

    /// Failed attempts from an IP since `window_start`, across all
    /// identifiers (known or not).
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn failed_attempts_for_ip_since(
        &self,
        ip_address: &str,
        window_start: DateTime<Utc>,
    ) -> Result<i64, SecurityError> {
        Ok(storage::count_failed_for_ip(&self.pool, ip_address, window_start).await?)
    }

    async fn collect_risk_signals(
        &self,
        attempt: &NewLoginAttempt,
        now: DateTime<Utc>,
    ) -> anyhow::Result<risk::RiskSignals> {
        let ip_attempts_last_hour =
            storage::count_attempts_for_ip(&self.pool, &attempt.ip_address, now - Duration::hours(1))
                .await?;

        let Some(user_id) = attempt.user_id else {
            return Ok(risk::RiskSignals {
                resolved_user: false,
                known_ip: false,
                known_agent_family: true,
                recent_failures: 0,
                ip_attempts_last_hour,
            });
        };

        let since = now - Duration::days(30);
        let known_ips = storage::successful_ips_for_user(&self.pool, user_id, since).await?;
        let known_agents = storage::successful_agents_for_user(&self.pool, user_id, since).await?;
        let recent_failures =
            storage::count_failed_for_user(&self.pool, user_id, now - Duration::hours(1)).await?;

        Ok(risk::RiskSignals {
            resolved_user: true,
            known_ip: known_ips.iter().any(|ip| ip == &attempt.ip_address),
            known_agent_family: risk::agent_family_known(
                attempt.user_agent.as_deref(),
                &known_agents,
            ),
            recent_failures,
            ip_attempts_last_hour,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_names_are_stable() {
        assert_eq!(FailureReason::BadCredential.as_str(), "bad_credential");
        assert_eq!(FailureReason::Locked.as_str(), "locked");
        assert_eq!(FailureReason::RateLimited.as_str(), "rate_limited");
    }

    #[test]
    fn mfa_action_names_are_stable() {
        assert_eq!(MfaAuditAction::OtpVerified.as_str(), "otp_verified");
        assert_eq!(MfaAuditAction::BackupRegenerated.as_str(), "backup_regenerated");
        assert_eq!(MfaAuditAction::RecoveryCompleted.as_str(), "recovery_completed");
    }
}
