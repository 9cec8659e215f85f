//! Authentication façade.
//!
//! Walks every login through the same gates in a fixed order:
//! identifier lockout, IP lockout, credential verification, MFA, session
//! issue. Exactly one login-attempt row is written per authentication
//! attempt, reflecting the terminal outcome, and lockout bookkeeping on a
//! bad credential runs synchronously before the response so "wrong
//! password" and "about to be locked" are not distinguishable by latency.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::audit::{AuditTrail, FailureReason, LoginAttemptRecord, NewLoginAttempt};
use super::clock::Clock;
use super::error::{DenyReason, SecurityError};
use super::external::CredentialVerifier;
use super::lockout::LockoutEngine;
use super::mfa::{MfaEngine, MfaFactor};
use super::session::{DeviceInfo, IssuedSession, SessionManager};
use super::settings::SettingsResolver;

/// One authentication request as the transport hands it over.
#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct AuthRequest {
    pub identifier: String,
    pub credential: String,
    #[serde(flatten)]
    pub device: DeviceInfo,
}

/// Terminal outcome of an authentication attempt.
#[derive(Debug)]
pub enum AuthOutcome {
    Allowed {
        session: IssuedSession,
    },
    /// Credential verified, a second factor is still owed.
    RequiresMfa {
        challenge_id: Uuid,
    },
    Denied {
        reason: DenyReason,
        retry_after_seconds: Option<i64>,
    },
}

impl AuthOutcome {
    fn denied(reason: DenyReason) -> Self {
        Self::Denied {
            reason,
            retry_after_seconds: None,
        }
    }
}

/// The façade the authentication flow calls into.
#[derive(Clone)]
pub struct SecurityOrchestrator {
    verifier: Arc<dyn CredentialVerifier>,
    clock: Arc<dyn Clock>,
    settings: SettingsResolver,
    audit: AuditTrail,
    lockout: LockoutEngine,
    mfa: MfaEngine,
    sessions: SessionManager,
}

impl SecurityOrchestrator {
    #[must_use]
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        clock: Arc<dyn Clock>,
        settings: SettingsResolver,
        audit: AuditTrail,
        lockout: LockoutEngine,
        mfa: MfaEngine,
        sessions: SessionManager,
    ) -> Self {
        Self {
            verifier,
            clock,
            settings,
            audit,
            lockout,
            mfa,
            sessions,
        }
    }

    /// Authenticate one request end to end.
    ///
    /// # Errors
    /// `Validation` on malformed input; `Persistence` when storage fails
    /// (the attempt is denied, never allowed through).
    pub async fn authenticate(&self, request: &AuthRequest) -> Result<AuthOutcome, SecurityError> {
        validate_request(request)?;

        let user_id = self
            .verifier
            .resolve(&request.identifier)
            .await
            .map_err(SecurityError::Persistence)?;
        let settings = self.settings.resolve(user_id).await?;
        let threshold = settings.suspicious_activity_threshold;

        // Identifier-scoped lockout, before the credential is even looked at.
        if let Some(uid) = user_id {
            let status = self.lockout.check_user_locked(uid).await?;
            if status.locked {
                self.record(request, user_id, false, Some(FailureReason::Locked), threshold)
                    .await?;
                return Ok(AuthOutcome::Denied {
                    reason: DenyReason::LockedOut,
                    retry_after_seconds: status.retry_after_seconds,
                });
            }
        }

        // IP-scoped gate, independent of whether the identifier resolved.
        if self.lockout.check_ip_blocked(&request.device.ip_address).await? {
            self.record(
                request,
                user_id,
                false,
                Some(FailureReason::RateLimited),
                threshold,
            )
            .await?;
            return Ok(AuthOutcome::denied(DenyReason::IpBlocked));
        }

        let verified = self
            .verifier
            .verify(&request.identifier, &request.credential)
            .await
            .map_err(SecurityError::Persistence)?;

        let Some(uid) = verified else {
            let attempt = self
                .record(
                    request,
                    user_id,
                    false,
                    Some(FailureReason::BadCredential),
                    threshold,
                )
                .await?;
            // Synchronous lockout bookkeeping before responding.
            if let Some(uid) = user_id {
                if let Some(episode) = self
                    .lockout
                    .record_failure(uid, &attempt, &request.device.ip_address)
                    .await?
                {
                    return Ok(AuthOutcome::Denied {
                        reason: DenyReason::LockedOut,
                        retry_after_seconds: retry_after(episode.end, self.clock.now()),
                    });
                }
            }
            return Ok(AuthOutcome::denied(DenyReason::InvalidCredentials));
        };

        if self.mfa.is_required(uid).await? {
            self.record(
                request,
                Some(uid),
                false,
                Some(FailureReason::MfaRequired),
                threshold,
            )
            .await?;
            let challenge_id = self.mfa.begin_challenge(uid).await?;
            return Ok(AuthOutcome::RequiresMfa { challenge_id });
        }

        self.issue_session(request, uid, threshold).await
    }

    /// [`Self::authenticate`] with a caller-supplied deadline. On timeout
    /// the request fails closed and a best-effort attempt row is written
    /// asynchronously so the audit trail is not dropped.
    ///
    /// # Errors
    /// As [`Self::authenticate`]; a timeout surfaces as `Persistence`.
    pub async fn authenticate_with_timeout(
        &self,
        request: &AuthRequest,
        timeout: StdDuration,
    ) -> Result<AuthOutcome, SecurityError> {
        match tokio::time::timeout(timeout, self.authenticate(request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(identifier = %request.identifier, "authentication timed out, denying");
                let audit = self.audit.clone();
                let settings = self.settings.clone();
                let verifier = Arc::clone(&self.verifier);
                let request = request.clone();
                tokio::spawn(async move {
                    let user_id = verifier.resolve(&request.identifier).await.unwrap_or(None);
                    let threshold = match settings.resolve(user_id).await {
                        Ok(settings) => settings.suspicious_activity_threshold,
                        Err(_) => 1.0,
                    };
                    let attempt = NewLoginAttempt {
                        identifier: request.identifier.clone(),
                        user_id,
                        succeeded: false,
                        failure_reason: Some(FailureReason::Unknown),
                        ip_address: request.device.ip_address.clone(),
                        user_agent: request.device.user_agent.clone(),
                        device_fingerprint: request.device.device_fingerprint.clone(),
                    };
                    if let Err(err) = audit.record_attempt(&attempt, threshold).await {
                        warn!("best-effort attempt record after timeout failed: {err}");
                    }
                });
                Err(SecurityError::Persistence(anyhow::anyhow!(
                    "authentication timed out after {timeout:?}"
                )))
            }
        }
    }

    /// Complete a login that required a second factor. Lockout still gates
    /// this step; a verified factor never clears a credential lockout.
    ///
    /// # Errors
    /// `Validation` on malformed input; persistence errors.
    pub async fn verify_mfa(
        &self,
        user_id: Uuid,
        factor: MfaFactor,
        code: &str,
        identifier: &str,
        device: &DeviceInfo,
    ) -> Result<AuthOutcome, SecurityError> {
        if code.trim().is_empty() {
            return Err(SecurityError::Validation("code must not be empty".to_string()));
        }

        let status = self.lockout.check_user_locked(user_id).await?;
        if status.locked {
            return Ok(AuthOutcome::Denied {
                reason: DenyReason::LockedOut,
                retry_after_seconds: status.retry_after_seconds,
            });
        }

        // The factor engines write the per-attempt MFA audit rows.
        if !self.mfa.verify_factor(user_id, factor, code).await? {
            return Ok(AuthOutcome::denied(DenyReason::MfaRequired));
        }
        if !self.mfa.consume_challenge(user_id).await? {
            // Factor was right but the challenge lapsed; back to the start.
            return Ok(AuthOutcome::denied(DenyReason::MfaRequired));
        }

        let settings = self.settings.resolve(Some(user_id)).await?;
        let request = AuthRequest {
            identifier: identifier.to_string(),
            credential: String::new(),
            device: device.clone(),
        };
        self.issue_session(&request, user_id, settings.suspicious_activity_threshold)
            .await
    }

    async fn issue_session(
        &self,
        request: &AuthRequest,
        user_id: Uuid,
        threshold: f64,
    ) -> Result<AuthOutcome, SecurityError> {
        let issued = match self.sessions.create_session(user_id, &request.device).await {
            Ok(issued) => issued,
            Err(SecurityError::PolicyDenied {
                reason: DenyReason::SessionLimit,
                ..
            }) => {
                self.record(
                    request,
                    Some(user_id),
                    false,
                    Some(FailureReason::PolicyBlocked),
                    threshold,
                )
                .await?;
                return Ok(AuthOutcome::denied(DenyReason::SessionLimit));
            }
            Err(err) => return Err(err),
        };

        self.record(request, Some(user_id), true, None, threshold)
            .await?;
        self.lockout.record_success(user_id);
        info!(%user_id, session_id = %issued.session.id, "authentication succeeded");
        Ok(AuthOutcome::Allowed { session: issued })
    }

    async fn record(
        &self,
        request: &AuthRequest,
        user_id: Option<Uuid>,
        succeeded: bool,
        failure_reason: Option<FailureReason>,
        threshold: f64,
    ) -> Result<LoginAttemptRecord, SecurityError> {
        self.audit
            .record_attempt(
                &NewLoginAttempt {
                    identifier: request.identifier.clone(),
                    user_id,
                    succeeded,
                    failure_reason,
                    ip_address: request.device.ip_address.clone(),
                    user_agent: request.device.user_agent.clone(),
                    device_fingerprint: request.device.device_fingerprint.clone(),
                },
                threshold,
            )
            .await
    }
}

fn validate_request(request: &AuthRequest) -> Result<(), SecurityError> {
    if request.identifier.trim().is_empty() {
        return Err(SecurityError::Validation(
            "identifier must not be empty".to_string(),
        ));
    }
    if request.credential.is_empty() {
        return Err(SecurityError::Validation(
            "credential must not be empty".to_string(),
        ));
    }
    if request.device.ip_address.trim().is_empty() {
        return Err(SecurityError::Validation(
            "ip address must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn retry_after(
    end: Option<chrono::DateTime<Utc>>,
    now: chrono::DateTime<Utc>,
) -> Option<i64> {
    end.map(|end| (end - now).num_seconds().max(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(identifier: &str, credential: &str, ip: &str) -> AuthRequest {
        AuthRequest {
            identifier: identifier.to_string(),
            credential: credential.to_string(),
            device: DeviceInfo {
                device_name: None,
                ip_address: ip.to_string(),
                user_agent: None,
                device_fingerprint: None,
            },
        }
    }

    #[test]
    fn empty_identifier_is_rejected() {
        assert!(validate_request(&request("  ", "hunter2", "198.51.100.7")).is_err());
    }

    #[test]
    fn empty_credential_is_rejected() {
        assert!(validate_request(&request("a@example.com", "", "198.51.100.7")).is_err());
    }

    #[test]
    fn missing_ip_is_rejected() {
        assert!(validate_request(&request("a@example.com", "hunter2", "")).is_err());
    }

    #[test]
    fn well_formed_request_passes_validation() {
        assert!(validate_request(&request("a@example.com", "hunter2", "198.51.100.7")).is_ok());
    }

    #[test]
    fn retry_after_clamps_to_zero() {
        let now = Utc::now();
        assert_eq!(retry_after(Some(now - chrono::Duration::minutes(5)), now), Some(0));
        assert_eq!(
            retry_after(Some(now + chrono::Duration::seconds(90)), now),
            Some(90)
        );
        assert_eq!(retry_after(None, now), None);
    }
}
