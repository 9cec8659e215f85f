//! Pure lockout policy computation.
//!
//! Everything here is synchronous and side-effect free; the engine feeds it
//! snapshots of attempt counts and episode rows and persists whatever it
//! decides.

use chrono::{DateTime, Duration, Utc};

use crate::security::settings::SecuritySettings;

/// Lockout duration for a given escalation level:
/// `min(initial * multiplier^(level-1), max)`. Level 1 is always the initial
/// duration; non-progressive policies stay at level 1.
#[must_use]
pub fn duration_minutes(settings: &SecuritySettings, level: i32) -> i64 {
    let exponent = i32::max(level - 1, 0);
    let scaled = (settings.initial_lockout_minutes as f64)
        * settings.lockout_multiplier.powi(exponent);
    // Saturate instead of overflowing for absurd levels.
    let scaled = if scaled.is_finite() {
        scaled as i64
    } else {
        i64::MAX
    };
    i64::min(scaled, settings.max_lockout_minutes)
}

/// Escalation level for a new episode. A prior episode escalates the level
/// only when progressive lockout is on and the prior episode still falls in
/// the current failure window (its end, or start if open-ended, is at or
/// after `window_start`). Time passing out of the window resets to level 1.
#[must_use]
pub fn next_level(
    settings: &SecuritySettings,
    prior: Option<(i32, Option<DateTime<Utc>>, DateTime<Utc>)>,
    window_start: DateTime<Utc>,
) -> i32 {
    if !settings.progressive_lockout_enabled {
        return 1;
    }
    match prior {
        Some((level, end, start)) if end.unwrap_or(start) >= window_start => level + 1,
        _ => 1,
    }
}

/// Whether the failure count within the window has reached the threshold.
#[must_use]
pub fn threshold_reached(settings: &SecuritySettings, failed_in_window: i64) -> bool {
    failed_in_window >= i64::from(settings.max_failed_attempts)
}

/// State of a persisted episode relative to `now`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EpisodeState {
    /// Still locking the account; retry after the given number of seconds.
    Active { retry_after_seconds: i64 },
    /// Past its end and eligible for lazy auto-close.
    Expired,
    /// Past its end but auto-unlock is off; stays locked until released.
    ExpiredButHeld,
    /// No end set (manual lockout without duration); locked until released.
    Indefinite,
}

#[must_use]
pub fn episode_state(
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    auto_unlock: bool,
) -> EpisodeState {
    match end {
        None => EpisodeState::Indefinite,
        Some(end) if end > now => EpisodeState::Active {
            retry_after_seconds: (end - now).num_seconds().max(1),
        },
        Some(_) if auto_unlock => EpisodeState::Expired,
        Some(_) => EpisodeState::ExpiredButHeld,
    }
}

/// The sliding window start for failure counting.
#[must_use]
pub fn window_start(settings: &SecuritySettings, now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::minutes(settings.failed_attempt_window_minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings() -> SecuritySettings {
        SecuritySettings {
            max_failed_attempts: 5,
            initial_lockout_minutes: 15,
            max_lockout_minutes: 1440,
            lockout_multiplier: 2.0,
            failed_attempt_window_minutes: 60,
            progressive_lockout_enabled: true,
            ..SecuritySettings::default()
        }
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, minute, 0).unwrap()
    }

    #[test]
    fn level_one_uses_initial_duration() {
        assert_eq!(duration_minutes(&settings(), 1), 15);
    }

    #[test]
    fn levels_double_until_the_cap() {
        let settings = settings();
        assert_eq!(duration_minutes(&settings, 2), 30);
        assert_eq!(duration_minutes(&settings, 3), 60);
        assert_eq!(duration_minutes(&settings, 7), 960);
        // 15 * 2^7 = 1920 > 1440, so the cap applies from level 8 on.
        assert_eq!(duration_minutes(&settings, 8), 1440);
        assert_eq!(duration_minutes(&settings, 20), 1440);
    }

    #[test]
    fn non_progressive_always_initial() {
        let settings = SecuritySettings {
            progressive_lockout_enabled: false,
            ..settings()
        };
        assert_eq!(duration_minutes(&settings, 1), 15);
        // Non-progressive policies never produce level > 1, but the formula
        // must still be safe if handed one.
        assert_eq!(next_level(&settings, Some((3, Some(at(30)), at(15))), at(0)), 1);
    }

    #[test]
    fn threshold_counts_inclusive() {
        let settings = settings();
        assert!(!threshold_reached(&settings, 4));
        assert!(threshold_reached(&settings, 5));
        assert!(threshold_reached(&settings, 6));
    }

    #[test]
    fn first_episode_is_level_one() {
        assert_eq!(next_level(&settings(), None, at(0)), 1);
    }

    #[test]
    fn recent_prior_episode_escalates() {
        // Prior episode ended at 12:30, window starts 12:00: escalate.
        let prior = Some((1, Some(at(30)), at(15)));
        assert_eq!(next_level(&settings(), prior, at(0)), 2);
    }

    #[test]
    fn stale_prior_episode_resets_to_level_one() {
        // Prior ended before the window opened.
        let window_start = at(31);
        let prior = Some((3, Some(at(30)), at(15)));
        assert_eq!(next_level(&settings(), prior, window_start), 1);
    }

    #[test]
    fn open_ended_prior_uses_start() {
        let prior = Some((2, None, at(15)));
        assert_eq!(next_level(&settings(), prior, at(0)), 3);
    }

    #[test]
    fn active_episode_reports_retry_after() {
        let now = at(0);
        let end = now + Duration::minutes(15);
        match episode_state(Some(end), now, true) {
            EpisodeState::Active {
                retry_after_seconds,
            } => assert_eq!(retry_after_seconds, 15 * 60),
            other => panic!("expected active, got {other:?}"),
        }
    }

    #[test]
    fn expired_episode_auto_closes_only_with_auto_unlock() {
        let now = at(30);
        let end = at(15);
        assert_eq!(episode_state(Some(end), now, true), EpisodeState::Expired);
        assert_eq!(
            episode_state(Some(end), now, false),
            EpisodeState::ExpiredButHeld
        );
    }

    #[test]
    fn manual_lockout_without_end_is_indefinite() {
        assert_eq!(episode_state(None, at(0), true), EpisodeState::Indefinite);
    }

    // Concrete scenario: 5 failures -> 15m; next window -> 30m; escalation
    // caps at 1440m.
    #[test]
    fn progressive_scenario_matches_policy() {
        let settings = settings();
        let mut level = next_level(&settings, None, at(0));
        assert_eq!(level, 1);
        assert_eq!(duration_minutes(&settings, level), 15);

        // Second lockout while the first still falls in the window.
        let first_end = at(0) + Duration::minutes(15);
        level = next_level(&settings, Some((level, Some(first_end), at(0))), at(0));
        assert_eq!(level, 2);
        assert_eq!(duration_minutes(&settings, level), 30);

        // Keep escalating; durations never exceed the cap.
        for _ in 0..20 {
            level += 1;
            assert!(duration_minutes(&settings, level) <= 1440);
        }
        assert_eq!(duration_minutes(&settings, level), 1440);
    }
}
