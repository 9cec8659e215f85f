//! Error taxonomy for the security core.
//!
//! Storage helpers stay on `anyhow` (with context); engines surface this
//! typed error at their boundary so callers can map outcomes to responses
//! without string matching. Duplicate-escalation races never reach callers:
//! they are recovered internally by re-reading the winning row.

use thiserror::Error;

/// Why an operation was denied by policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DenyReason {
    InvalidCredentials,
    LockedOut,
    IpBlocked,
    MfaRequired,
    SessionLimit,
    RateLimited,
}

impl DenyReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::LockedOut => "locked_out",
            Self::IpBlocked => "ip_blocked",
            Self::MfaRequired => "mfa_required",
            Self::SessionLimit => "session_limit",
            Self::RateLimited => "rate_limited",
        }
    }
}

#[derive(Debug, Error)]
pub enum SecurityError {
    /// Malformed input, rejected before any persistence.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Expected, user-facing denial (locked out, MFA required, ...).
    #[error("denied by policy: {}", .reason.as_str())]
    PolicyDenied {
        reason: DenyReason,
        /// Seconds until the caller may retry, when known.
        retry_after_seconds: Option<i64>,
    },

    /// The caller is not allowed to act on the target resource.
    /// Surfaced as a permission denial, never as "not found".
    #[error("not permitted")]
    Authorization,

    /// Storage unreachable or inconsistent; the request fails closed.
    #[error("persistence failure")]
    Persistence(#[source] anyhow::Error),
}

impl SecurityError {
    #[must_use]
    pub fn denied(reason: DenyReason) -> Self {
        Self::PolicyDenied {
            reason,
            retry_after_seconds: None,
        }
    }

    #[must_use]
    pub fn denied_retry(reason: DenyReason, retry_after_seconds: i64) -> Self {
        Self::PolicyDenied {
            reason,
            retry_after_seconds: Some(retry_after_seconds),
        }
    }
}

impl From<anyhow::Error> for SecurityError {
    fn from(err: anyhow::Error) -> Self {
        Self::Persistence(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_reason_names() {
        assert_eq!(DenyReason::LockedOut.as_str(), "locked_out");
        assert_eq!(DenyReason::MfaRequired.as_str(), "mfa_required");
    }

    #[test]
    fn persistence_wraps_anyhow() {
        let err: SecurityError = anyhow::anyhow!("pool timed out").into();
        assert!(matches!(err, SecurityError::Persistence(_)));
    }

    #[test]
    fn denied_retry_carries_seconds() {
        let err = SecurityError::denied_retry(DenyReason::LockedOut, 900);
        match err {
            SecurityError::PolicyDenied {
                retry_after_seconds,
                ..
            } => assert_eq!(retry_after_seconds, Some(900)),
            _ => panic!("expected PolicyDenied"),
        }
    }
}
