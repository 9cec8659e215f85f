//! Risk scoring for login attempts.
//!
//! Additive signal weights, clamped to `0.0..=1.0`. The score is advisory:
//! it flags attempts as suspicious and feeds lockout reasons, but a scoring
//! failure never blocks the audit write.

/// Score used when signal collection fails.
pub(crate) const MODERATE_RISK: f64 = 0.5;

const UNKNOWN_IDENTIFIER_WEIGHT: f64 = 0.3;
const NEW_IP_WEIGHT: f64 = 0.4;
const NEW_AGENT_WEIGHT: f64 = 0.2;
const RECENT_FAILURES_WEIGHT: f64 = 0.3;
const BUSY_IP_WEIGHT: f64 = 0.4;

const RECENT_FAILURES_FLOOR: i64 = 3;
const BUSY_IP_FLOOR: i64 = 10;

/// Signals collected from attempt history for one incoming attempt.
#[derive(Clone, Debug)]
pub(crate) struct RiskSignals {
    /// The identifier resolved to a real user.
    pub resolved_user: bool,
    /// The source IP appears in the user's successful-login history.
    pub known_ip: bool,
    /// The user-agent family appears in the user's successful-login history.
    pub known_agent_family: bool,
    /// Failed attempts for this user in the last hour.
    pub recent_failures: i64,
    /// All attempts from this IP in the last hour, any identifier.
    pub ip_attempts_last_hour: i64,
}

pub(crate) fn score(signals: &RiskSignals) -> f64 {
    let mut score = 0.0;
    if signals.resolved_user {
        if !signals.known_ip {
            score += NEW_IP_WEIGHT;
        }
        if !signals.known_agent_family {
            score += NEW_AGENT_WEIGHT;
        }
        if signals.recent_failures >= RECENT_FAILURES_FLOOR {
            score += RECENT_FAILURES_WEIGHT;
        }
    } else {
        score += UNKNOWN_IDENTIFIER_WEIGHT;
    }
    if signals.ip_attempts_last_hour > BUSY_IP_FLOOR {
        score += BUSY_IP_WEIGHT;
    }
    score.clamp(0.0, 1.0)
}

/// Compare browser families by the first token of the user-agent string.
pub(crate) fn agent_family_known(user_agent: Option<&str>, known_agents: &[String]) -> bool {
    let Some(agent) = user_agent else {
        // No user agent presented: nothing to compare, treat as known.
        return true;
    };
    let Some(family) = agent.split_whitespace().next() else {
        return true;
    };
    known_agents.iter().any(|known| known.contains(family))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_known_user() -> RiskSignals {
        RiskSignals {
            resolved_user: true,
            known_ip: true,
            known_agent_family: true,
            recent_failures: 0,
            ip_attempts_last_hour: 0,
        }
    }

    #[test]
    fn known_user_from_known_device_scores_zero() {
        assert_eq!(score(&quiet_known_user()), 0.0);
    }

    #[test]
    fn unknown_identifier_adds_weight() {
        let signals = RiskSignals {
            resolved_user: false,
            ..quiet_known_user()
        };
        assert!((score(&signals) - UNKNOWN_IDENTIFIER_WEIGHT).abs() < f64::EPSILON);
    }

    #[test]
    fn stacked_signals_clamp_to_one() {
        let signals = RiskSignals {
            resolved_user: true,
            known_ip: false,
            known_agent_family: false,
            recent_failures: 5,
            ip_attempts_last_hour: 50,
        };
        assert_eq!(score(&signals), 1.0);
    }

    #[test]
    fn busy_ip_counts_even_for_unknown_identifier() {
        let signals = RiskSignals {
            resolved_user: false,
            known_ip: false,
            known_agent_family: true,
            recent_failures: 0,
            ip_attempts_last_hour: 11,
        };
        assert!((score(&signals) - (UNKNOWN_IDENTIFIER_WEIGHT + BUSY_IP_WEIGHT)).abs() < 1e-9);
    }

    #[test]
    fn agent_family_matches_on_first_token() {
        let known = vec!["Mozilla/5.0 (X11; Linux)".to_string()];
        assert!(agent_family_known(Some("Mozilla/5.0 (Windows)"), &known));
        assert!(!agent_family_known(Some("curl/8.4"), &known));
        assert!(agent_family_known(None, &known));
    }
}
