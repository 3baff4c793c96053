//! Reconnect delay computation with exponential backoff and jitter.

use std::time::Duration;

use rand::Rng;

/// Smallest delay ever handed out.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay for attempt 0.
    pub base_delay: Duration,
    /// Cap applied before and after jitter.
    pub max_delay: Duration,
    /// Relative jitter; 0.2 means ±20%.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

/// Progress of the current failure streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Zero-based index of the most recently scheduled retry.
    pub attempt: u32,
    /// Delay handed out for that retry.
    pub current_delay: Duration,
}

/// Computes reconnect delays and tracks the current failure streak.
///
/// Within one streak, delays returned by [`next_delay`](Self::next_delay)
/// never decrease and never exceed the cap, even with jitter applied.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    streak: Option<RetryState>,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            streak: None,
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// `base * 2^attempt`, capped, without jitter.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(63) as i32;
        let secs = self.config.base_delay.as_secs_f64() * 2f64.powi(exp);
        let capped = secs.min(self.config.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.config.max_delay)
    }

    /// Delay for `attempt` with a random jitter sample.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_for_attempt_with(attempt, unit)
    }

    /// Delay for `attempt` with an explicit jitter sample in `[-1, 1]`.
    pub fn delay_for_attempt_with(&self, attempt: u32, unit: f64) -> Duration {
        let nominal = self.nominal_delay(attempt).as_secs_f64();
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let offset = nominal * jitter * unit.clamp(-1.0, 1.0);
        let secs = (nominal + offset).min(self.config.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.config.max_delay)
            .max(MIN_DELAY)
    }

    /// Advances the failure streak and returns the delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.next_delay_with(unit)
    }

    /// [`next_delay`](Self::next_delay) with an explicit jitter sample.
    pub fn next_delay_with(&mut self, unit: f64) -> Duration {
        let (attempt, floor) = match self.streak {
            Some(prev) => (prev.attempt.saturating_add(1), prev.current_delay),
            None => (0, Duration::ZERO),
        };
        let cap = self.config.max_delay.max(MIN_DELAY);
        let delay = self.delay_for_attempt_with(attempt, unit).max(floor).min(cap);
        self.streak = Some(RetryState {
            attempt,
            current_delay: delay,
        });
        delay
    }

    /// Ends the current streak; the next delay starts from the base again.
    pub fn reset(&mut self) {
        self.streak = None;
    }

    /// The current streak, if any failure happened since the last reset.
    pub fn retry_state(&self) -> Option<RetryState> {
        self.streak
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffPolicy {
        BackoffPolicy::new(BackoffConfig {
            jitter: 0.0,
            ..BackoffConfig::default()
        })
    }

    fn assert_close(actual: Duration, expected_ms: u64) {
        let diff = actual.as_secs_f64() - expected_ms as f64 / 1000.0;
        assert!(diff.abs() < 1e-6, "{actual:?} != {expected_ms}ms");
    }

    #[test]
    fn nominal_delays_double_until_cap() {
        let policy = BackoffPolicy::default();
        let expected = [1, 2, 4, 8, 16, 30, 30, 30];
        for (attempt, &secs) in expected.iter().enumerate() {
            assert_eq!(
                policy.nominal_delay(attempt as u32),
                Duration::from_secs(secs),
                "attempt {attempt}"
            );
        }
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let policy = BackoffPolicy::default();
        for attempt in 0..8 {
            let nominal = policy.nominal_delay(attempt).as_secs_f64();
            for _ in 0..200 {
                let secs = policy.delay_for_attempt(attempt).as_secs_f64();
                assert!(
                    secs >= nominal * 0.799 && secs <= (nominal * 1.201).min(30.0),
                    "attempt {attempt}: {secs:.3}s outside jitter band of {nominal:.3}s"
                );
            }
        }
    }

    #[test]
    fn explicit_jitter_sample_is_deterministic() {
        let policy = BackoffPolicy::default();
        assert_close(policy.delay_for_attempt_with(0, -1.0), 800);
        assert_close(policy.delay_for_attempt_with(0, 1.0), 1200);
        assert_close(policy.delay_for_attempt_with(2, 0.5), 4400);
        // Jitter never pushes past the cap.
        assert_eq!(
            policy.delay_for_attempt_with(10, 1.0),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn streak_is_monotonic_and_bounded() {
        for _ in 0..100 {
            let mut policy = BackoffPolicy::default();
            let mut prev = Duration::ZERO;
            for _ in 0..20 {
                let d = policy.next_delay();
                assert!(d >= prev, "{d:?} < {prev:?}");
                assert!(d <= Duration::from_secs(30));
                prev = d;
            }
        }
    }

    #[test]
    fn streak_clamps_downward_jitter_at_cap() {
        let mut policy = BackoffPolicy::default();
        for _ in 0..6 {
            policy.next_delay_with(1.0);
        }
        let high = policy.retry_state().unwrap().current_delay;
        assert_eq!(high, Duration::from_secs(30));
        // A low sample would give 24s; the streak keeps it at 30s.
        assert_eq!(policy.next_delay_with(-1.0), Duration::from_secs(30));
    }

    #[test]
    fn retry_state_tracks_attempts() {
        let mut policy = no_jitter();
        assert!(policy.retry_state().is_none());

        assert_eq!(policy.next_delay(), Duration::from_secs(1));
        assert_eq!(
            policy.retry_state(),
            Some(RetryState {
                attempt: 0,
                current_delay: Duration::from_secs(1)
            })
        );
        assert_eq!(policy.next_delay(), Duration::from_secs(2));
        assert_eq!(policy.next_delay(), Duration::from_secs(4));
        assert_eq!(policy.retry_state().unwrap().attempt, 2);
    }

    #[test]
    fn reset_returns_to_baseline() {
        let mut policy = no_jitter();
        for _ in 0..5 {
            policy.next_delay();
        }
        policy.reset();
        assert!(policy.retry_state().is_none());
        assert_eq!(policy.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.nominal_delay(u32::MAX), Duration::from_secs(30));
        assert!(policy.delay_for_attempt(u32::MAX) <= Duration::from_secs(30));
    }

    #[test]
    fn always_positive() {
        let policy = BackoffPolicy::new(BackoffConfig {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 5.0,
        });
        assert!(policy.delay_for_attempt_with(0, -1.0) > Duration::ZERO);
        let mut policy = policy;
        assert!(policy.next_delay() > Duration::ZERO);
    }
}
