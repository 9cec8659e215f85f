//! Concurrent session management.
//!
//! Sessions carry an opaque bearer token returned exactly once at creation;
//! only its SHA-256 hash is stored. The concurrent-session cap is enforced
//! at creation with the configured overflow policy, and expiry is handled
//! twice over: touches refuse expired rows, and a background sweeper closes
//! them for the books.

pub(crate) mod storage;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use super::clock::Clock;
use super::error::{DenyReason, SecurityError};
use super::settings::{SessionOverflowPolicy, SettingsResolver};

const SESSION_TOKEN_BYTES: usize = 32;
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Why a session stopped being active.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    UserRequest,
    Evicted,
    Expired,
    SecurityPolicy,
}

impl TerminationReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::UserRequest => "user_request",
            Self::Evicted => "evicted",
            Self::Expired => "expired",
            Self::SecurityPolicy => "security_policy",
        }
    }
}

/// Device context captured at session creation.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct DeviceInfo {
    pub device_name: Option<String>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
}

/// A persisted session row. The token hash never leaves storage.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_name: Option<String>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Returned once from [`SessionManager::create_session`]; the plaintext
/// token is not recoverable afterwards.
#[derive(Debug)]
pub struct IssuedSession {
    pub session: SessionRecord,
    pub token: String,
}

/// Manages the session lifecycle against the effective per-user settings.
#[derive(Clone)]
pub struct SessionManager {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    settings: SettingsResolver,
}

impl SessionManager {
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>, settings: SettingsResolver) -> Self {
        Self {
            pool,
            clock,
            settings,
        }
    }

    /// Create a session, enforcing the concurrent-session cap. Under
    /// `DenyNew` a full slate rejects the login; under `EvictOldest` the
    /// least-recently-active sessions make room.
    ///
    /// # Errors
    /// `PolicyDenied(SessionLimit)` when the cap is hit under `DenyNew`;
    /// persistence errors.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        device: &DeviceInfo,
    ) -> Result<IssuedSession, SecurityError> {
        let settings = self.settings.resolve(Some(user_id)).await?;
        let max_sessions = i64::from(settings.max_concurrent_sessions);
        let now = self.clock.now();

        let mut active = storage::count_active_sessions(&self.pool, user_id).await?;
        while active >= max_sessions {
            match settings.session_overflow_policy {
                SessionOverflowPolicy::DenyNew => {
                    return Err(SecurityError::denied(DenyReason::SessionLimit));
                }
                SessionOverflowPolicy::EvictOldest => {
                    let Some(oldest) = storage::oldest_active_session(&self.pool, user_id).await?
                    else {
                        break;
                    };
                    storage::terminate_session(
                        &self.pool,
                        oldest.id,
                        TerminationReason::Evicted,
                        now,
                    )
                    .await?;
                    info!(%user_id, session_id = %oldest.id, "evicted oldest session");
                    active = storage::count_active_sessions(&self.pool, user_id).await?;
                }
            }
        }

        let token = generate_token();
        let fingerprint = if settings.device_fingerprinting_enabled {
            device.device_fingerprint.as_deref()
        } else {
            None
        };
        let session = storage::insert_session(
            &self.pool,
            storage::NewSession {
                user_id,
                token_hash: &hash_token(&token),
                device_name: device.device_name.as_deref(),
                ip_address: &device.ip_address,
                user_agent: device.user_agent.as_deref(),
                device_fingerprint: fingerprint,
                expires_at: now + Duration::minutes(settings.session_timeout_minutes),
            },
            now,
        )
        .await?;

        debug!(%user_id, session_id = %session.id, "session created");
        Ok(IssuedSession { session, token })
    }

    /// Record activity, sliding the expiry forward. An expired or already
    /// terminated session cannot be revived.
    ///
    /// # Errors
    /// `Validation` when the session is gone or expired; persistence errors.
    pub async fn touch(&self, session_id: Uuid) -> Result<(), SecurityError> {
        let Some(session) = storage::load_session(&self.pool, session_id).await? else {
            return Err(SecurityError::Validation("session not found".to_string()));
        };
        let settings = self.settings.resolve(Some(session.user_id)).await?;
        let now = self.clock.now();
        let touched = storage::touch_session(
            &self.pool,
            session_id,
            now,
            now + Duration::minutes(settings.session_timeout_minutes),
        )
        .await?;
        if !touched {
            return Err(SecurityError::Validation(
                "session is expired or terminated".to_string(),
            ));
        }
        Ok(())
    }

    /// Active sessions for the user, most recently active first.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<SessionRecord>, SecurityError> {
        Ok(storage::active_sessions(&self.pool, user_id).await?)
    }

    /// Terminate one session on behalf of `requesting_user`. Acting on
    /// another user's session is a permission denial, and so is a missing
    /// session id, so existence is not leaked.
    ///
    /// # Errors
    /// `Authorization` on cross-user or unknown sessions; persistence errors.
    pub async fn terminate(
        &self,
        session_id: Uuid,
        requesting_user: Uuid,
    ) -> Result<(), SecurityError> {
        let Some(session) = storage::load_session(&self.pool, session_id).await? else {
            return Err(SecurityError::Authorization);
        };
        if session.user_id != requesting_user {
            return Err(SecurityError::Authorization);
        }
        storage::terminate_session(
            &self.pool,
            session_id,
            TerminationReason::UserRequest,
            self.clock.now(),
        )
        .await?;
        info!(%requesting_user, %session_id, "session terminated");
        Ok(())
    }

    /// Terminate every session for the user except the current one.
    /// Returns how many were closed.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn terminate_all_others(
        &self,
        user_id: Uuid,
        current_session: Uuid,
    ) -> Result<u64, SecurityError> {
        let terminated = storage::terminate_all_except(
            &self.pool,
            user_id,
            current_session,
            TerminationReason::UserRequest,
            self.clock.now(),
        )
        .await?;
        info!(%user_id, terminated, "terminated other sessions");
        Ok(terminated)
    }

    /// Close expired sessions still marked active. Idempotent and safe to
    /// run concurrently with touches and other sweepers.
    ///
    /// # Errors
    /// Persistence errors.
    pub async fn sweep_expired(&self) -> Result<u64, SecurityError> {
        let swept = storage::sweep_expired(&self.pool, self.clock.now()).await?;
        if swept > 0 {
            debug!(swept, "closed expired sessions");
        }
        Ok(swept)
    }
}

/// Periodic sweeper; runs until the task is dropped at shutdown.
pub async fn run_sweeper(manager: SessionManager) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(err) = manager.sweep_expired().await {
            error!("session sweep failed: {err}");
        }
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 of the bearer token; the only form that touches the database.
pub(crate) fn hash_token(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(!a.contains('+'));
        assert!(!a.contains('/'));
        assert!(!a.contains('='));
    }

    #[test]
    fn token_hash_is_stable_and_distinct_from_token() {
        let token = generate_token();
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
    }

    #[test]
    fn termination_reason_names_are_stable() {
        assert_eq!(TerminationReason::UserRequest.as_str(), "user_request");
        assert_eq!(TerminationReason::Evicted.as_str(), "evicted");
        assert_eq!(TerminationReason::Expired.as_str(), "expired");
        assert_eq!(TerminationReason::SecurityPolicy.as_str(), "security_policy");
    }

    struct SessionRow {
        id: Uuid,
        user_id: Uuid,
        last_activity: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        is_active: bool,
        termination_reason: Option<TerminationReason>,
    }

    /// In-memory mirror of the session table: the cap, overflow, touch, and
    /// ownership rules the manager enforces, with the storage layer's
    /// conditional updates modeled as plain fields.
    struct InMemorySessions {
        rows: Vec<SessionRow>,
        timeout: Duration,
        max_sessions: usize,
        policy: SessionOverflowPolicy,
    }

    impl InMemorySessions {
        fn new(max_sessions: usize, policy: SessionOverflowPolicy) -> Self {
            Self {
                rows: Vec::new(),
                timeout: Duration::minutes(60),
                max_sessions,
                policy,
            }
        }

        fn active_count(&self, user_id: Uuid) -> usize {
            self.rows
                .iter()
                .filter(|row| row.user_id == user_id && row.is_active)
                .count()
        }

        fn oldest_active(&self, user_id: Uuid) -> Option<Uuid> {
            self.rows
                .iter()
                .filter(|row| row.user_id == user_id && row.is_active)
                .min_by_key(|row| row.last_activity)
                .map(|row| row.id)
        }

        fn close(&mut self, id: Uuid, reason: TerminationReason) {
            if let Some(row) = self.rows.iter_mut().find(|row| row.id == id) {
                row.is_active = false;
                row.termination_reason = Some(reason);
            }
        }

        fn create(&mut self, user_id: Uuid, now: DateTime<Utc>) -> Result<Uuid, SecurityError> {
            while self.active_count(user_id) >= self.max_sessions {
                match self.policy {
                    SessionOverflowPolicy::DenyNew => {
                        return Err(SecurityError::denied(DenyReason::SessionLimit));
                    }
                    SessionOverflowPolicy::EvictOldest => {
                        let Some(oldest) = self.oldest_active(user_id) else {
                            break;
                        };
                        self.close(oldest, TerminationReason::Evicted);
                    }
                }
            }
            let id = Uuid::new_v4();
            self.rows.push(SessionRow {
                id,
                user_id,
                last_activity: now,
                expires_at: now + self.timeout,
                is_active: true,
                termination_reason: None,
            });
            Ok(id)
        }

        fn touch(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<(), SecurityError> {
            let timeout = self.timeout;
            let Some(row) = self.rows.iter_mut().find(|row| row.id == id) else {
                return Err(SecurityError::Validation("session not found".to_string()));
            };
            if !row.is_active || row.expires_at <= now {
                return Err(SecurityError::Validation(
                    "session is expired or terminated".to_string(),
                ));
            }
            row.last_activity = now;
            row.expires_at = now + timeout;
            Ok(())
        }

        fn terminate(&mut self, id: Uuid, requesting_user: Uuid) -> Result<(), SecurityError> {
            let Some(row) = self.rows.iter().find(|row| row.id == id) else {
                return Err(SecurityError::Authorization);
            };
            if row.user_id != requesting_user {
                return Err(SecurityError::Authorization);
            }
            self.close(id, TerminationReason::UserRequest);
            Ok(())
        }
    }

    #[test]
    fn evict_oldest_holds_count_at_cap() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        let mut sessions = InMemorySessions::new(3, SessionOverflowPolicy::EvictOldest);

        let first = sessions.create(user, now).expect("first");
        let second = sessions.create(user, now + Duration::seconds(1)).expect("second");
        let third = sessions.create(user, now + Duration::seconds(2)).expect("third");
        assert_eq!(sessions.active_count(user), 3);

        let fourth = sessions.create(user, now + Duration::seconds(3)).expect("fourth");
        assert_eq!(sessions.active_count(user), 3);

        let evicted = sessions
            .rows
            .iter()
            .find(|row| row.id == first)
            .expect("first row");
        assert!(!evicted.is_active);
        assert_eq!(evicted.termination_reason, Some(TerminationReason::Evicted));
        for id in [second, third, fourth] {
            assert!(sessions.rows.iter().any(|row| row.id == id && row.is_active));
        }
    }

    #[test]
    fn deny_new_rejects_at_cap() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        let mut sessions = InMemorySessions::new(2, SessionOverflowPolicy::DenyNew);

        sessions.create(user, now).expect("first");
        sessions.create(user, now + Duration::seconds(1)).expect("second");

        let result = sessions.create(user, now + Duration::seconds(2));
        assert!(matches!(
            result,
            Err(SecurityError::PolicyDenied {
                reason: DenyReason::SessionLimit,
                ..
            })
        ));
        assert_eq!(sessions.active_count(user), 2);
    }

    #[test]
    fn touch_cannot_revive_expired_session() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        let mut sessions = InMemorySessions::new(5, SessionOverflowPolicy::DenyNew);

        let id = sessions.create(user, now).expect("create");
        sessions.touch(id, now + Duration::minutes(30)).expect("touch before expiry");

        let past_expiry = now + Duration::minutes(30) + Duration::minutes(61);
        assert!(matches!(
            sessions.touch(id, past_expiry),
            Err(SecurityError::Validation(_))
        ));
        // the failed touch must not have slid the expiry forward
        assert!(matches!(
            sessions.touch(id, past_expiry + Duration::seconds(1)),
            Err(SecurityError::Validation(_))
        ));
    }

    #[test]
    fn touch_rejects_terminated_session() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        let mut sessions = InMemorySessions::new(5, SessionOverflowPolicy::DenyNew);

        let id = sessions.create(user, now).expect("create");
        sessions.terminate(id, user).expect("terminate");
        assert!(matches!(
            sessions.touch(id, now + Duration::seconds(1)),
            Err(SecurityError::Validation(_))
        ));
    }

    #[test]
    fn cross_user_termination_is_denied() {
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let now = Utc::now();
        let mut sessions = InMemorySessions::new(5, SessionOverflowPolicy::DenyNew);

        let id = sessions.create(owner, now).expect("create");
        assert!(matches!(
            sessions.terminate(id, intruder),
            Err(SecurityError::Authorization)
        ));
        assert_eq!(sessions.active_count(owner), 1);

        sessions.terminate(id, owner).expect("owner terminates");
        assert_eq!(sessions.active_count(owner), 0);
    }

    #[test]
    fn unknown_session_termination_is_denied() {
        let user = Uuid::new_v4();
        let mut sessions = InMemorySessions::new(5, SessionOverflowPolicy::DenyNew);
        assert!(matches!(
            sessions.terminate(Uuid::new_v4(), user),
            Err(SecurityError::Authorization)
        ));
    }
}
