//! Unlock attempt rate limiting.
//!
//! State is persisted per user, so restarting the process does not reset
//! a lockout. Failures count within a rolling window; reaching the
//! threshold locks the user out, and each consecutive lockout doubles in
//! length. Any successful unlock resets everything.

use crate::config::RateLimitConfig;
use crate::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use strongbox_storage::{MetaKey, UserCache};
use strongbox_types::Clock;
use tracing::{info, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub failed_attempts: u32,
    /// Unix millis when the current counting window opened.
    pub window_start: Option<i64>,
    /// Unix millis until which attempts are refused.
    pub lockout_until: Option<i64>,
    /// Lockouts since the last successful unlock.
    #[serde(default)]
    pub consecutive_lockouts: u32,
}

/// Answer to "may the user try now?".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub remaining_secs: u64,
}

impl AttemptDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            remaining_secs: 0,
        }
    }
}

pub struct RateLimiter {
    cache: UserCache,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
    // serializes read-modify-write of the persisted state
    guard: Mutex<()>,
}

impl RateLimiter {
    pub fn new(cache: UserCache, clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self {
            cache,
            clock,
            config,
            guard: Mutex::new(()),
        }
    }

    pub fn state(&self) -> VaultResult<RateLimitState> {
        Ok(self
            .cache
            .get_meta_json(MetaKey::RateLimit)?
            .unwrap_or_default())
    }

    pub fn can_attempt(&self) -> VaultResult<AttemptDecision> {
        let state = self.state()?;
        let now = self.clock.now_millis();
        match state.lockout_until {
            Some(until) if until > now => {
                let remaining_secs = ((until - now) as u64).div_ceil(1000);
                Ok(AttemptDecision {
                    allowed: false,
                    reason: Some(format!(
                        "Too many failed attempts. Try again in {}.",
                        describe_duration(remaining_secs)
                    )),
                    remaining_secs,
                })
            }
            _ => Ok(AttemptDecision::allowed()),
        }
    }

    /// [`can_attempt`](Self::can_attempt) as an error.
    pub fn check(&self) -> VaultResult<()> {
        let decision = self.can_attempt()?;
        if decision.allowed {
            return Ok(());
        }
        Err(VaultError::RateLimitExceeded {
            remaining_secs: decision.remaining_secs,
            reason: decision.reason.unwrap_or_default(),
        })
    }

    pub fn record_failed_attempt(&self) -> VaultResult<RateLimitState> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.state()?;
        let now = self.clock.now_millis();
        let window_ms = self.config.window_secs.saturating_mul(1000);

        if state.lockout_until.is_some_and(|until| until <= now) {
            state.lockout_until = None;
        }
        match state.window_start {
            Some(start) if now.saturating_sub(start) < window_ms => {}
            _ => {
                state.window_start = Some(now);
                state.failed_attempts = 0;
            }
        }
        state.failed_attempts = state.failed_attempts.saturating_add(1);

        if state.failed_attempts >= self.config.max_failed_attempts {
            let exponent = state
                .consecutive_lockouts
                .min(self.config.max_backoff_exponent);
            // arithmetic saturates: an oversized config means "locked for good"
            let lockout_ms = self
                .config
                .base_lockout_secs
                .saturating_mul(1000)
                .saturating_mul(2i64.saturating_pow(exponent))
                .max(0);
            state.lockout_until = Some(now.saturating_add(lockout_ms));
            state.consecutive_lockouts = state.consecutive_lockouts.saturating_add(1);
            state.failed_attempts = 0;
            state.window_start = None;
            warn!(
                lockout_secs = lockout_ms / 1000,
                consecutive = state.consecutive_lockouts,
                "unlock locked out after repeated failures"
            );
        }

        self.cache.put_meta_json(MetaKey::RateLimit, &state)?;
        Ok(state)
    }

    pub fn record_successful_attempt(&self) -> VaultResult<()> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        if self.cache.delete_meta(MetaKey::RateLimit)? {
            info!("rate limit state reset");
        }
        Ok(())
    }
}

/// "45 seconds", "1 minute", "2 minutes 5 seconds", "1 hour 4 minutes".
fn describe_duration(secs: u64) -> String {
    fn unit(n: u64, name: &str) -> String {
        if n == 1 {
            format!("1 {name}")
        } else {
            format!("{n} {name}s")
        }
    }

    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let parts: Vec<String> = [(hours, "hour"), (minutes, "minute"), (seconds, "second")]
        .into_iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, name)| unit(n, name))
        .collect();
    if parts.is_empty() {
        unit(0, "second")
    } else {
        parts.into_iter().take(2).collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use strongbox_storage::LocalCache;
    use strongbox_types::ManualClock;

    fn limiter() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = LocalCache::open_in_memory().unwrap().for_user("u");
        (
            RateLimiter::new(cache, clock.clone(), RateLimitConfig::default()),
            clock,
        )
    }

    #[test]
    fn fifth_failure_locks_out() {
        let (rl, _) = limiter();
        for _ in 0..4 {
            rl.record_failed_attempt().unwrap();
            assert!(rl.can_attempt().unwrap().allowed);
        }
        rl.record_failed_attempt().unwrap();

        let decision = rl.can_attempt().unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining_secs, 60);
        assert_eq!(
            decision.reason.as_deref(),
            Some("Too many failed attempts. Try again in 1 minute.")
        );
        assert!(matches!(
            rl.check(),
            Err(VaultError::RateLimitExceeded { remaining_secs: 60, .. })
        ));
    }

    #[test]
    fn lockout_expires() {
        let (rl, clock) = limiter();
        for _ in 0..5 {
            rl.record_failed_attempt().unwrap();
        }
        clock.advance(Duration::seconds(59));
        assert!(!rl.can_attempt().unwrap().allowed);
        clock.advance(Duration::seconds(1));
        assert!(rl.can_attempt().unwrap().allowed);
    }

    #[test]
    fn failures_outside_window_do_not_accumulate() {
        let (rl, clock) = limiter();
        for _ in 0..4 {
            rl.record_failed_attempt().unwrap();
        }
        clock.advance(Duration::minutes(16));
        let state = rl.record_failed_attempt().unwrap();
        assert_eq!(state.failed_attempts, 1);
        assert!(rl.can_attempt().unwrap().allowed);
    }

    #[test]
    fn consecutive_lockouts_double() {
        let (rl, clock) = limiter();
        for _ in 0..5 {
            rl.record_failed_attempt().unwrap();
        }
        clock.advance(Duration::seconds(60));
        for _ in 0..5 {
            rl.record_failed_attempt().unwrap();
        }
        assert_eq!(rl.can_attempt().unwrap().remaining_secs, 120);
        assert_eq!(rl.state().unwrap().consecutive_lockouts, 2);
    }

    #[test]
    fn success_resets_everything() {
        let (rl, clock) = limiter();
        for _ in 0..5 {
            rl.record_failed_attempt().unwrap();
        }
        clock.advance(Duration::seconds(60));
        rl.record_successful_attempt().unwrap();
        assert_eq!(rl.state().unwrap(), RateLimitState::default());

        // the next lockout starts from the base duration again
        for _ in 0..5 {
            rl.record_failed_attempt().unwrap();
        }
        assert_eq!(rl.can_attempt().unwrap().remaining_secs, 60);
    }

    #[test]
    fn backoff_is_capped() {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = LocalCache::open_in_memory().unwrap().for_user("u");
        let config = RateLimitConfig {
            max_failed_attempts: 1,
            max_backoff_exponent: 2,
            ..RateLimitConfig::default()
        };
        let rl = RateLimiter::new(cache, clock.clone(), config);
        for _ in 0..6 {
            rl.record_failed_attempt().unwrap();
            let wait = rl.can_attempt().unwrap().remaining_secs;
            assert!(wait <= 240, "lockout {wait}s exceeds cap");
            clock.advance(Duration::seconds(wait as i64));
        }
    }

    #[test]
    fn extreme_config_saturates_instead_of_overflowing() {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = LocalCache::open_in_memory().unwrap().for_user("u");
        let config = RateLimitConfig {
            max_failed_attempts: 1,
            window_secs: i64::MAX,
            base_lockout_secs: i64::MAX,
            max_backoff_exponent: u32::MAX,
        };
        let rl = RateLimiter::new(cache, clock, config);
        let state = rl.record_failed_attempt().unwrap();
        assert_eq!(state.lockout_until, Some(i64::MAX));
        assert!(!rl.can_attempt().unwrap().allowed);

        let mut state = rl.state().unwrap();
        state.consecutive_lockouts = u32::MAX;
        rl.cache.put_meta_json(MetaKey::RateLimit, &state).unwrap();
        let state = rl.record_failed_attempt().unwrap();
        assert_eq!(state.consecutive_lockouts, u32::MAX);
    }

    #[test]
    fn state_survives_reopen() {
        let clock = Arc::new(ManualClock::starting_now());
        let db = LocalCache::open_in_memory().unwrap();
        let rl = RateLimiter::new(db.for_user("u"), clock.clone(), RateLimitConfig::default());
        for _ in 0..5 {
            rl.record_failed_attempt().unwrap();
        }
        drop(rl);

        let again = RateLimiter::new(db.for_user("u"), clock.clone(), RateLimitConfig::default());
        assert!(!again.can_attempt().unwrap().allowed);
        let other = RateLimiter::new(db.for_user("v"), clock, RateLimitConfig::default());
        assert!(other.can_attempt().unwrap().allowed);
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(describe_duration(45), "45 seconds");
        assert_eq!(describe_duration(60), "1 minute");
        assert_eq!(describe_duration(125), "2 minutes 5 seconds");
        assert_eq!(describe_duration(3840), "1 hour 4 minutes");
        assert_eq!(describe_duration(0), "0 seconds");
    }
}
