//! Multi-factor authentication: TOTP, email OTPs, and backup codes.
//!
//! Factor state lives per user in `mfa_settings`; single-use artifacts
//! (OTPs, backup codes, login challenges) live in their own tables with
//! conditional consume updates so each can be used at most once. Every
//! verification attempt appends exactly one `mfa_audit_log` row.

pub(crate) mod codes;
pub(crate) mod storage;
pub(crate) mod totp;

use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::audit::{AuditTrail, MfaAuditAction};
use super::clock::Clock;
use super::error::SecurityError;
use super::external::NotificationDispatcher;
pub use storage::MfaSettingsRecord;
pub use totp::TotpSetupMaterial;

const OTP_TTL: Duration = Duration::minutes(10);
const OTP_MAX_ATTEMPTS: i32 = 5;
const CHALLENGE_TTL: Duration = Duration::minutes(5);
/// Remaining-code count at or below which the user gets a heads-up.
const LOW_BACKUP_CODE_THRESHOLD: i64 = 2;

const OTP_EMAIL_TEMPLATE: &str = "mfa_email_otp";
const LOW_BACKUP_CODES_TEMPLATE: &str = "backup_codes_low";

/// TOTP enrollment lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TotpState {
    NotConfigured,
    /// Secret issued, waiting for the first valid code.
    PendingSetup,
    Active,
}

impl TotpState {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::PendingSetup => "pending_setup",
            Self::Active => "active",
        }
    }

    pub(crate) fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "not_configured" => Some(Self::NotConfigured),
            "pending_setup" => Some(Self::PendingSetup),
            "active" => Some(Self::Active),
            _ => None,
        }
    }
}

/// What an email OTP is for; codes never cross purposes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    LoginMfa,
    Recovery,
}

impl OtpPurpose {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::LoginMfa => "login_mfa",
            Self::Recovery => "recovery",
        }
    }
}

/// Second factors a caller can present.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MfaFactor {
    Totp,
    EmailOtp,
    BackupCode,
}

/// A user's MFA posture, as reported to callers.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct MfaStatus {
    pub totp_state: TotpState,
    pub email_otp_enabled: bool,
    pub backup_codes_remaining: i64,
    pub enforced: bool,
    /// Whether a second factor will be demanded at login.
    pub required: bool,
}

/// Engine for factor enrollment, challenges, and verification.
#[derive(Clone)]
pub struct MfaEngine {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    audit: AuditTrail,
    notifier: Arc<dyn NotificationDispatcher>,
    /// Server-side pepper for code hashing; never persisted.
    pepper: SecretString,
    issuer: String,
}

impl MfaEngine {
    #[must_use]
    pub fn new(
        pool: PgPool,
        clock: Arc<dyn Clock>,
        audit: AuditTrail,
        notifier: Arc<dyn NotificationDispatcher>,
        pepper: SecretString,
        issuer: String,
    ) -> Self {
        Self {
            pool,
            clock,
            audit,
            notifier,
            pepper,
            issuer,
        }
    }

    /// The user's MFA posture.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn status(&self, user_id: Uuid) -> Result<MfaStatus, SecurityError> {
        let settings = storage::load_mfa_settings(&self.pool, user_id).await?;
        let backup_codes_remaining =
            storage::count_unused_backup_codes(&self.pool, user_id).await?;
        Ok(MfaStatus {
            totp_state: settings.totp_state,
            email_otp_enabled: settings.email_otp_enabled,
            backup_codes_remaining,
            enforced: settings.enforced,
            required: mfa_required(&settings),
        })
    }

    /// Whether login must demand a second factor for this user.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn is_required(&self, user_id: Uuid) -> Result<bool, SecurityError> {
        let settings = storage::load_mfa_settings(&self.pool, user_id).await?;
        Ok(mfa_required(&settings))
    }

    /// Begin TOTP enrollment. The secret and QR are returned exactly once;
    /// only the secret is stored, in `pending_setup` state until the user
    /// proves possession with [`Self::confirm_totp`].
    ///
    /// # Errors
    /// `Validation` when TOTP is already active; persistence errors.
    pub async fn setup_totp(
        &self,
        user_id: Uuid,
        account_label: &str,
    ) -> Result<TotpSetupMaterial, SecurityError> {
        let settings = storage::load_mfa_settings(&self.pool, user_id).await?;
        if settings.totp_state == TotpState::Active {
            return Err(SecurityError::Validation(
                "TOTP is already active; disable it before re-enrolling".to_string(),
            ));
        }

        let material = totp::generate_setup(&self.issuer, account_label)?;
        storage::upsert_totp(
            &self.pool,
            user_id,
            TotpState::PendingSetup,
            Some(&material.secret_base32),
            self.clock.now(),
        )
        .await?;
        self.audit
            .log_mfa(user_id, MfaAuditAction::TotpSetup, json!({}))
            .await?;
        Ok(material)
    }

    /// Confirm TOTP enrollment with a first valid code. Returns false (and
    /// stays in `pending_setup`) on a wrong code.
    ///
    /// # Errors
    /// `Validation` when no enrollment is pending; persistence errors.
    pub async fn confirm_totp(&self, user_id: Uuid, code: &str) -> Result<bool, SecurityError> {
        let settings = storage::load_mfa_settings(&self.pool, user_id).await?;
        let (TotpState::PendingSetup, Some(secret)) =
            (settings.totp_state, settings.totp_secret.as_deref())
        else {
            return Err(SecurityError::Validation(
                "no TOTP enrollment pending".to_string(),
            ));
        };

        if !totp::check_code(secret, &self.issuer, code)? {
            self.audit
                .log_mfa(
                    user_id,
                    MfaAuditAction::Failed,
                    json!({"factor": "totp", "phase": "setup_confirmation"}),
                )
                .await?;
            return Ok(false);
        }

        storage::upsert_totp(
            &self.pool,
            user_id,
            TotpState::Active,
            Some(secret),
            self.clock.now(),
        )
        .await?;
        self.audit
            .log_mfa(user_id, MfaAuditAction::Enabled, json!({"factor": "totp"}))
            .await?;
        info!(%user_id, "TOTP activated");
        Ok(true)
    }

    /// Disable TOTP and drop the secret.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn disable_totp(&self, user_id: Uuid) -> Result<(), SecurityError> {
        storage::upsert_totp(
            &self.pool,
            user_id,
            TotpState::NotConfigured,
            None,
            self.clock.now(),
        )
        .await?;
        self.audit
            .log_mfa(user_id, MfaAuditAction::Disabled, json!({"factor": "totp"}))
            .await?;
        Ok(())
    }

    /// Toggle the email OTP factor.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn set_email_otp_enabled(
        &self,
        user_id: Uuid,
        enabled: bool,
    ) -> Result<(), SecurityError> {
        storage::set_email_otp_enabled(&self.pool, user_id, enabled, self.clock.now()).await?;
        let action = if enabled {
            MfaAuditAction::Enabled
        } else {
            MfaAuditAction::Disabled
        };
        self.audit
            .log_mfa(user_id, action, json!({"factor": "email_otp"}))
            .await?;
        Ok(())
    }

    /// Administrative enforcement override: with `enforced` set, login
    /// demands a factor regardless of the user's own flags.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn set_enforced(&self, user_id: Uuid, enforced: bool) -> Result<(), SecurityError> {
        storage::set_enforced(&self.pool, user_id, enforced, self.clock.now()).await?;
        self.audit
            .log_mfa(
                user_id,
                MfaAuditAction::Enforced,
                json!({"enforced": enforced}),
            )
            .await?;
        Ok(())
    }

    /// Issue a fresh email OTP, superseding any prior unconsumed code for
    /// the same purpose, and hand it to the delivery layer.
    ///
    /// # Errors
    /// Persistence errors, and delivery failure (the factor is useless if
    /// the code never leaves the building).
    pub async fn send_email_otp(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
    ) -> Result<(), SecurityError> {
        let now = self.clock.now();
        storage::invalidate_unconsumed_otps(&self.pool, user_id, purpose, now).await?;

        let code = codes::generate_otp_code();
        let hash = codes::hash_code(&code, self.pepper.expose_secret().as_bytes())?;
        let expires_at = now + OTP_TTL;
        storage::insert_email_otp(
            &self.pool,
            user_id,
            purpose,
            &hash,
            expires_at,
            OTP_MAX_ATTEMPTS,
            now,
        )
        .await?;

        self.notifier
            .send(
                user_id,
                OTP_EMAIL_TEMPLATE,
                json!({
                    "code": code,
                    "purpose": purpose.as_str(),
                    "expires_minutes": OTP_TTL.num_minutes(),
                }),
            )
            .await
            .map_err(|err| SecurityError::Persistence(err.context("OTP delivery failed")))?;

        self.audit
            .log_mfa(
                user_id,
                MfaAuditAction::OtpSent,
                json!({"purpose": purpose.as_str()}),
            )
            .await?;
        Ok(())
    }

    /// Verify an email OTP. Fails closed when the code is expired, already
    /// consumed, or out of attempts; a mismatch burns one attempt.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn verify_email_otp(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        code: &str,
    ) -> Result<bool, SecurityError> {
        let now = self.clock.now();
        let Some(otp) = storage::current_email_otp(&self.pool, user_id, purpose).await? else {
            self.audit
                .log_mfa(
                    user_id,
                    MfaAuditAction::OtpFailed,
                    json!({"purpose": purpose.as_str(), "reason": "no_active_code"}),
                )
                .await?;
            return Ok(false);
        };

        if otp.expires_at <= now {
            storage::invalidate_otp(&self.pool, otp.id, now).await?;
            self.audit
                .log_mfa(
                    user_id,
                    MfaAuditAction::OtpExpired,
                    json!({"purpose": purpose.as_str()}),
                )
                .await?;
            return Ok(false);
        }

        if otp.attempts_remaining <= 0 {
            storage::invalidate_otp(&self.pool, otp.id, now).await?;
            self.audit
                .log_mfa(
                    user_id,
                    MfaAuditAction::OtpFailed,
                    json!({"purpose": purpose.as_str(), "reason": "attempts_exhausted"}),
                )
                .await?;
            return Ok(false);
        }

        if codes::verify_code(code, &otp.code_hash, self.pepper.expose_secret().as_bytes())? {
            // Conditional consume; a concurrent winner turns this into a miss.
            if storage::consume_otp(&self.pool, otp.id, now).await? {
                self.audit
                    .log_mfa(
                        user_id,
                        MfaAuditAction::OtpVerified,
                        json!({"purpose": purpose.as_str()}),
                    )
                    .await?;
                return Ok(true);
            }
            self.audit
                .log_mfa(
                    user_id,
                    MfaAuditAction::OtpFailed,
                    json!({"purpose": purpose.as_str(), "reason": "already_consumed"}),
                )
                .await?;
            return Ok(false);
        }

        let remaining = storage::spend_otp_attempt(&self.pool, otp.id).await?;
        if remaining == Some(0) {
            storage::invalidate_otp(&self.pool, otp.id, now).await?;
        }
        self.audit
            .log_mfa(
                user_id,
                MfaAuditAction::OtpFailed,
                json!({
                    "purpose": purpose.as_str(),
                    "reason": "mismatch",
                    "attempts_remaining": remaining.unwrap_or(0),
                }),
            )
            .await?;
        Ok(false)
    }

    /// Generate a fresh batch of backup codes, invalidating every unused
    /// code from prior batches. Plaintext codes are returned exactly once.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn generate_backup_codes(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<String>, SecurityError> {
        let now = self.clock.now();

        let plaintext: Vec<String> = (0..codes::BACKUP_CODE_COUNT)
            .map(|_| codes::generate_backup_code())
            .collect();
        let mut hashes = Vec::with_capacity(plaintext.len());
        for code in &plaintext {
            let normalized = codes::normalize_backup_code(code)?;
            hashes.push(codes::hash_code(
                &normalized,
                self.pepper.expose_secret().as_bytes(),
            )?);
        }
        storage::replace_backup_codes(&self.pool, user_id, &hashes, now).await?;
        storage::set_backup_codes_generated(&self.pool, user_id, true, now).await?;

        self.audit
            .log_mfa(
                user_id,
                MfaAuditAction::BackupRegenerated,
                json!({"count": plaintext.len()}),
            )
            .await?;
        Ok(plaintext)
    }

    /// Verify a backup code, consuming the matching row. A code that loses
    /// a concurrent-consume race counts as a miss.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn verify_backup_code(
        &self,
        user_id: Uuid,
        input: &str,
    ) -> Result<bool, SecurityError> {
        let Ok(normalized) = codes::normalize_backup_code(input) else {
            self.audit
                .log_mfa(
                    user_id,
                    MfaAuditAction::BackupFailed,
                    json!({"reason": "malformed"}),
                )
                .await?;
            return Ok(false);
        };

        let now = self.clock.now();
        let pepper = self.pepper.expose_secret().as_bytes().to_vec();
        for (code_id, stored_hash) in storage::unused_backup_codes(&self.pool, user_id).await? {
            if !codes::verify_code(&normalized, &stored_hash, &pepper)? {
                continue;
            }
            if !storage::consume_backup_code(&self.pool, code_id, now).await? {
                // Someone else spent it between the read and the update.
                break;
            }
            let remaining = storage::count_unused_backup_codes(&self.pool, user_id).await?;
            self.audit
                .log_mfa(
                    user_id,
                    MfaAuditAction::BackupUsed,
                    json!({"remaining": remaining}),
                )
                .await?;
            if remaining <= LOW_BACKUP_CODE_THRESHOLD {
                if let Err(err) = self
                    .notifier
                    .send(
                        user_id,
                        LOW_BACKUP_CODES_TEMPLATE,
                        json!({"remaining": remaining}),
                    )
                    .await
                {
                    warn!("failed to dispatch low-backup-codes notice: {err}");
                }
            }
            return Ok(true);
        }

        self.audit
            .log_mfa(
                user_id,
                MfaAuditAction::BackupFailed,
                json!({"reason": "no_match"}),
            )
            .await?;
        Ok(false)
    }

    /// Verify one presented factor. Exactly one audit row is written per
    /// call, whatever the outcome.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn verify_factor(
        &self,
        user_id: Uuid,
        factor: MfaFactor,
        code: &str,
    ) -> Result<bool, SecurityError> {
        match factor {
            MfaFactor::Totp => self.verify_totp(user_id, code).await,
            MfaFactor::EmailOtp => {
                self.verify_email_otp(user_id, OtpPurpose::LoginMfa, code)
                    .await
            }
            MfaFactor::BackupCode => self.verify_backup_code(user_id, code).await,
        }
    }

    /// Open a short-lived login challenge for a credential-verified user.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn begin_challenge(&self, user_id: Uuid) -> Result<Uuid, SecurityError> {
        let now = self.clock.now();
        let id = storage::insert_challenge(&self.pool, user_id, now + CHALLENGE_TTL, now).await?;
        Ok(id)
    }

    /// Consume the user's open challenge; false when none is live.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn consume_challenge(&self, user_id: Uuid) -> Result<bool, SecurityError> {
        Ok(storage::consume_challenge(&self.pool, user_id, self.clock.now()).await?)
    }

    async fn verify_totp(&self, user_id: Uuid, code: &str) -> Result<bool, SecurityError> {
        let settings = storage::load_mfa_settings(&self.pool, user_id).await?;
        let (TotpState::Active, Some(secret)) =
            (settings.totp_state, settings.totp_secret.as_deref())
        else {
            self.audit
                .log_mfa(
                    user_id,
                    MfaAuditAction::Failed,
                    json!({"factor": "totp", "reason": "not_active"}),
                )
                .await?;
            return Ok(false);
        };

        let valid = totp::check_code(secret, &self.issuer, code)?;
        let action = if valid {
            MfaAuditAction::Verified
        } else {
            MfaAuditAction::Failed
        };
        self.audit
            .log_mfa(user_id, action, json!({"factor": "totp"}))
            .await?;
        Ok(valid)
    }
}

/// Enforced overrides everything; otherwise any enabled primary factor
/// makes MFA mandatory. Backup codes alone never do, they are a fallback.
fn mfa_required(settings: &MfaSettingsRecord) -> bool {
    settings.enforced || settings.totp_state == TotpState::Active || settings.email_otp_enabled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totp_state_round_trips() {
        for state in [
            TotpState::NotConfigured,
            TotpState::PendingSetup,
            TotpState::Active,
        ] {
            assert_eq!(TotpState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(TotpState::from_str("bogus"), None);
    }

    #[test]
    fn otp_purpose_names_are_stable() {
        assert_eq!(OtpPurpose::LoginMfa.as_str(), "login_mfa");
        assert_eq!(OtpPurpose::Recovery.as_str(), "recovery");
    }

    #[test]
    fn mfa_not_required_by_default() {
        assert!(!mfa_required(&MfaSettingsRecord::default()));
    }

    #[test]
    fn active_totp_requires_mfa() {
        let settings = MfaSettingsRecord {
            totp_state: TotpState::Active,
            ..MfaSettingsRecord::default()
        };
        assert!(mfa_required(&settings));
    }

    #[test]
    fn pending_totp_does_not_require_mfa() {
        let settings = MfaSettingsRecord {
            totp_state: TotpState::PendingSetup,
            ..MfaSettingsRecord::default()
        };
        assert!(!mfa_required(&settings));
    }

    #[test]
    fn enforced_overrides_user_flags() {
        let settings = MfaSettingsRecord {
            enforced: true,
            ..MfaSettingsRecord::default()
        };
        assert!(mfa_required(&settings));
    }

    #[test]
    fn email_otp_alone_requires_mfa() {
        let settings = MfaSettingsRecord {
            email_otp_enabled: true,
            ..MfaSettingsRecord::default()
        };
        assert!(mfa_required(&settings));
    }

    use chrono::{DateTime, Utc};
    use std::collections::HashSet;

    const TEST_PEPPER: &[u8] = b"test-pepper";

    /// In-memory mirror of one email OTP row: the same checks
    /// `verify_email_otp` runs, with the storage layer's conditional
    /// updates modeled as plain fields.
    struct InMemoryOtp {
        code_hash: String,
        expires_at: DateTime<Utc>,
        attempts_remaining: i32,
        consumed: bool,
        invalidated: bool,
    }

    impl InMemoryOtp {
        fn issue(code: &str, now: DateTime<Utc>) -> Self {
            Self {
                code_hash: codes::hash_code(code, TEST_PEPPER).expect("hash"),
                expires_at: now + OTP_TTL,
                attempts_remaining: OTP_MAX_ATTEMPTS,
                consumed: false,
                invalidated: false,
            }
        }

        fn verify(&mut self, code: &str, now: DateTime<Utc>) -> bool {
            // consumed or invalidated rows are no longer the current code
            if self.consumed || self.invalidated {
                return false;
            }
            if self.expires_at <= now {
                self.invalidated = true;
                return false;
            }
            if self.attempts_remaining <= 0 {
                self.invalidated = true;
                return false;
            }
            if codes::verify_code(code, &self.code_hash, TEST_PEPPER).expect("verify") {
                self.consumed = true;
                return true;
            }
            self.attempts_remaining -= 1;
            if self.attempts_remaining == 0 {
                self.invalidated = true;
            }
            false
        }
    }

    #[test]
    fn consumed_otp_cannot_be_replayed() {
        let now = Utc::now();
        let mut otp = InMemoryOtp::issue("493021", now);

        assert!(otp.verify("493021", now + Duration::seconds(5)));
        assert!(otp.consumed);
        assert!(!otp.verify("493021", now + Duration::seconds(10)));
    }

    #[test]
    fn wrong_attempts_exhaust_otp_before_expiry() {
        let now = Utc::now();
        let mut otp = InMemoryOtp::issue("493021", now);

        for attempt in 0..OTP_MAX_ATTEMPTS {
            let at = now + Duration::seconds(i64::from(attempt));
            assert!(!otp.verify("000000", at));
        }
        assert!(otp.invalidated);

        // the right code no longer works even though the TTL has not run out
        let before_expiry = now + Duration::minutes(1);
        assert!(before_expiry < otp.expires_at);
        assert!(!otp.verify("493021", before_expiry));
    }

    #[test]
    fn expired_otp_is_rejected_and_invalidated() {
        let now = Utc::now();
        let mut otp = InMemoryOtp::issue("493021", now);

        assert!(!otp.verify("493021", now + OTP_TTL));
        assert!(otp.invalidated);
        assert!(!otp.consumed);
    }

    /// In-memory mirror of the backup code pool: regeneration swaps the
    /// whole batch in one step, and each code verifies at most once.
    struct InMemoryBackupCodes {
        hashes: Vec<String>,
        used: HashSet<usize>,
    }

    impl InMemoryBackupCodes {
        fn new() -> Self {
            Self {
                hashes: Vec::new(),
                used: HashSet::new(),
            }
        }

        fn regenerate(&mut self) -> Vec<String> {
            let plaintext: Vec<String> = (0..codes::BACKUP_CODE_COUNT)
                .map(|_| codes::generate_backup_code())
                .collect();
            let hashes: Vec<String> = plaintext
                .iter()
                .map(|code| {
                    let normalized = codes::normalize_backup_code(code).expect("normalize");
                    codes::hash_code(&normalized, TEST_PEPPER).expect("hash")
                })
                .collect();
            // all-or-nothing swap, never a mix of old and new codes
            self.hashes = hashes;
            self.used.clear();
            plaintext
        }

        fn consume(&mut self, code: &str) -> bool {
            let Ok(normalized) = codes::normalize_backup_code(code) else {
                return false;
            };
            for (idx, hash) in self.hashes.iter().enumerate() {
                if self.used.contains(&idx) {
                    continue;
                }
                if codes::verify_code(&normalized, hash, TEST_PEPPER).expect("verify") {
                    self.used.insert(idx);
                    return true;
                }
            }
            false
        }

        fn unused_count(&self) -> usize {
            self.hashes.len() - self.used.len()
        }
    }

    #[test]
    fn used_backup_code_is_rejected_on_reuse() {
        let mut pool = InMemoryBackupCodes::new();
        let batch = pool.regenerate();

        assert!(pool.consume(&batch[0]));
        assert_eq!(pool.unused_count(), codes::BACKUP_CODE_COUNT - 1);
        assert!(!pool.consume(&batch[0]));
        assert!(pool.consume(&batch[1]));
    }

    #[test]
    fn regeneration_replaces_entire_pool() {
        let mut pool = InMemoryBackupCodes::new();
        let old_batch = pool.regenerate();
        assert!(pool.consume(&old_batch[0]));

        let new_batch = pool.regenerate();
        assert_eq!(pool.hashes.len(), codes::BACKUP_CODE_COUNT);
        assert_eq!(pool.unused_count(), codes::BACKUP_CODE_COUNT);

        assert!(!pool.consume(&old_batch[1]));
        assert!(pool.consume(&new_batch[0]));
    }
}
