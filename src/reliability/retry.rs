//! Exponential backoff for the visibility-timeout retry clock.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff parameters for a workflow or a single step override.
///
/// Unlike a general-purpose retry policy, this one defaults to **no
/// jitter**: the redelivery delay after attempt `n` is deterministic
/// (`base * coefficient^(n-1)`, capped), which is what makes the retry
/// scenarios in the test suite reproducible. Jitter is an opt-in knob.
///
/// # Example
///
/// ```
/// use dagflow::reliability::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_base(Duration::from_secs(1))
///     .with_cap(Duration::from_secs(30));
///
/// assert_eq!(policy.delay_for_attempts(1), Duration::from_secs(1));
/// assert_eq!(policy.delay_for_attempts(2), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,

    #[serde(with = "duration_millis")]
    pub base: Duration,

    #[serde(with = "duration_millis")]
    pub cap: Duration,

    pub coefficient: f64,

    /// Jitter factor (0.0-1.0). Defaults to 0.0 (deterministic backoff).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// `max_attempts=3`, `base=1s`, `cap=30s`, doubling, no jitter.
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            coefficient: 2.0,
            jitter: 0.0,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base: Duration::ZERO,
            cap: Duration::ZERO,
            coefficient: 1.0,
            jitter: 0.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    pub fn with_coefficient(mut self, coefficient: f64) -> Self {
        self.coefficient = coefficient;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the next redelivery, given the number of attempts
    /// already made (`attempts_count` after `start_tasks` incremented it).
    /// `attempts_count <= 1` waits `base`; each further attempt doubles
    /// (or whatever `coefficient` is), capped at `cap`.
    pub fn delay_for_attempts(&self, attempts_count: u32) -> Duration {
        let retry_num = attempts_count.max(1) - 1;
        let base = self.base.as_secs_f64() * self.coefficient.powi(retry_num as i32);
        let capped = base.min(self.cap.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped * self.jitter;
            (capped + rng.gen_range(-jitter_range..jitter_range)).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_defaults_have_no_jitter() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.jitter, 0.0);
        assert_eq!(policy.coefficient, 2.0);
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy::exponential().with_cap(Duration::from_secs(3600));
        assert_eq!(policy.delay_for_attempts(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempts(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempts(3), Duration::from_secs(4));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::exponential().with_cap(Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempts(10), Duration::from_secs(5));
    }

    #[test]
    fn no_retry_exhausts_immediately() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.has_attempts_remaining(1));
    }

    #[test]
    fn serialization_round_trips() {
        let policy = RetryPolicy::exponential().with_max_attempts(7);
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
