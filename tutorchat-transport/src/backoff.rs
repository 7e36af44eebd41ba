// ABOUTME: Exponential backoff for re-opening a dropped channel.
// ABOUTME: Capped delays and a bounded attempt count; zero attempts disables reconnecting.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect strategy applied when an open channel drops
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    #[serde(with = "millis", rename = "initial_delay_ms")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "millis", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub multiplier: u32,
    /// Attempts before giving up (0 = never reconnect)
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Policy that never retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            max_attempts: 5,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Tracks consecutive failures and the next delay
#[derive(Debug)]
pub struct BackoffState {
    policy: ReconnectPolicy,
    consecutive_failures: u32,
    current_delay: Duration,
}

impl BackoffState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let current_delay = policy.initial_delay;
        Self {
            policy,
            consecutive_failures: 0,
            current_delay,
        }
    }

    /// Record a successful open (resets backoff)
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.current_delay = self.policy.initial_delay;
    }

    /// Record a failure and return the delay before the next attempt,
    /// or None once the attempt budget is spent
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.consecutive_failures += 1;
        if self.consecutive_failures > self.policy.max_attempts {
            return None;
        }

        let delay = self.current_delay;
        self.current_delay = std::cmp::min(
            self.current_delay * self.policy.multiplier,
            self.policy.max_delay,
        );
        Some(delay)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial_ms: u64, max_ms: u64, multiplier: u32, attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            max_attempts: attempts,
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!(policy.is_enabled());
        assert!(!ReconnectPolicy::disabled().is_enabled());
    }

    #[test]
    fn test_exponential_sequence_caps_at_max() {
        let mut state = BackoffState::new(policy(1000, 10_000, 3, 10));

        assert_eq!(state.record_failure(), Some(Duration::from_secs(1)));
        assert_eq!(state.record_failure(), Some(Duration::from_secs(3)));
        assert_eq!(state.record_failure(), Some(Duration::from_secs(9)));
        // 27s capped to 10s
        assert_eq!(state.record_failure(), Some(Duration::from_secs(10)));
        assert_eq!(state.record_failure(), Some(Duration::from_secs(10)));
        assert_eq!(state.consecutive_failures(), 5);
    }

    #[test]
    fn test_attempt_budget_exhausted() {
        let mut state = BackoffState::new(policy(100, 1000, 2, 2));
        assert!(state.record_failure().is_some());
        assert!(state.record_failure().is_some());
        assert_eq!(state.record_failure(), None);
    }

    #[test]
    fn test_disabled_policy_never_retries() {
        let mut state = BackoffState::new(ReconnectPolicy::disabled());
        assert_eq!(state.record_failure(), None);
    }

    #[test]
    fn test_success_resets() {
        let mut state = BackoffState::new(policy(200, 5000, 2, 5));
        state.record_failure();
        state.record_failure();
        state.record_success();
        assert_eq!(state.consecutive_failures(), 0);
        assert_eq!(state.current_delay(), Duration::from_millis(200));
        assert_eq!(state.record_failure(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_policy_toml_uses_milliseconds() {
        let policy: ReconnectPolicy = toml::from_str(
            "initial_delay_ms = 250\nmax_delay_ms = 4000\nmultiplier = 2\nmax_attempts = 3\n",
        )
        .unwrap();
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(4));
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    fn test_oversized_delay_serializes_saturated() {
        let policy = ReconnectPolicy {
            max_delay: Duration::MAX,
            ..ReconnectPolicy::default()
        };
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["max_delay_ms"], u64::MAX);
        assert_eq!(json["initial_delay_ms"], 500);
    }
}
