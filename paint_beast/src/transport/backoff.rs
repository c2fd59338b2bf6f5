//! Reconnect delays: exponential growth with random jitter.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How an actor retries a lost learner connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
    /// Growth factor applied after each failed attempt.
    pub multiplier: f64,
    /// Fraction of the delay randomized in either direction (0.0 to 1.0).
    pub jitter: f64,
    /// Give up after this many consecutive failures (0 = never).
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 50,
            max_delay_ms: 5_000,
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    pub fn with_initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.multiplier < 1.0 {
            return Err("multiplier must be >= 1.0");
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("jitter must be in [0, 1]");
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err("max_delay_ms must be >= initial_delay_ms");
        }
        Ok(())
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.clone())
    }
}

/// Stateful delay sequence for one reconnect episode.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.policy.max_attempts > 0 && self.attempts >= self.policy.max_attempts {
            return None;
        }
        let base = self.policy.initial_delay_ms as f64
            * self.policy.multiplier.powi(self.attempts.min(63) as i32);
        let base = base.min(self.policy.max_delay_ms as f64);
        self.attempts += 1;

        let spread = base * self.policy.jitter;
        let jittered = base - spread + fastrand::f64() * 2.0 * spread;
        let ms = jittered.clamp(0.0, self.policy.max_delay_ms as f64);
        Some(Duration::from_micros((ms * 1_000.0) as u64))
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_without_jitter() {
        let mut backoff = ReconnectPolicy::default()
            .with_initial_delay_ms(10)
            .with_max_delay_ms(1_000)
            .with_jitter(0.0)
            .backoff();
        let delays: Vec<_> = (0..4).map(|_| backoff.next_delay().unwrap()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(80),
            ]
        );
    }

    #[test]
    fn test_delay_is_capped() {
        let mut backoff = ReconnectPolicy::default()
            .with_initial_delay_ms(100)
            .with_max_delay_ms(250)
            .backoff();
        for _ in 0..20 {
            assert!(backoff.next_delay().unwrap() <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = ReconnectPolicy::default()
            .with_initial_delay_ms(100)
            .with_jitter(0.5);
        for _ in 0..100 {
            let d = policy.backoff().next_delay().unwrap();
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(150), "{:?}", d);
        }
    }

    #[test]
    fn test_max_attempts_and_reset() {
        let mut backoff = ReconnectPolicy::default().with_max_attempts(2).backoff();
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert!(backoff.next_delay().is_some());
    }

    #[test]
    fn test_validate() {
        assert!(ReconnectPolicy::default().validate().is_ok());
        assert!(ReconnectPolicy::default().with_jitter(1.5).validate().is_err());
        assert!(ReconnectPolicy::default()
            .with_initial_delay_ms(10)
            .with_max_delay_ms(5)
            .validate()
            .is_err());
    }
}
