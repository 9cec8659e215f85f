//! # Custodia (Account Security Core)
//!
//! `custodia` is an account-security service: progressive login lockout,
//! multi-factor authentication (TOTP, email OTP, backup codes), and
//! concurrent session management, fronted by a single orchestrator the
//! authentication flow calls into.
//!
//! ## Shape
//!
//! - **Audit trail:** every authentication attempt and MFA event lands in an
//!   append-only table; failure counting is always recomputed from attempt
//!   rows rather than kept in a counter.
//! - **Lockout:** failures inside a sliding window escalate lockout episodes
//!   with exponentially growing durations, capped by policy. One active
//!   episode per user, enforced by a partial unique index.
//! - **MFA:** one-time artifacts (email OTPs, backup codes) are hashed at
//!   rest and consumed with conditional updates so each works at most once.
//! - **Sessions:** opaque bearer tokens shown once, SHA-256 hashes at rest,
//!   a per-user concurrency cap with deny-new or evict-oldest overflow.
//!
//! Credential storage, notification delivery, and the wall clock sit behind
//! narrow traits so the policy core stays testable without infrastructure.

pub mod api;
pub mod cli;
pub mod security;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
