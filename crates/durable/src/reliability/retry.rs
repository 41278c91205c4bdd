//! Retry policy for queue redelivery

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How often and how fast a failed task is delivered again.
///
/// Stored with every task so a policy change only affects new enqueues.
///
/// ```
/// use autopilot_durable::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(3)
///     .with_initial_interval(Duration::from_secs(2));
/// assert!(policy.has_attempts_remaining(2));
/// assert!(!policy.has_attempts_remaining(3));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of deliveries, including the first
    pub max_attempts: u32,

    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0); 0.1 spreads delays by +/-10%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// 5 attempts, 1s initial, 60s max, x2 backoff, 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Exponential policy with `QUEUE_MAX_ATTEMPTS` applied when set.
    pub fn from_env() -> Self {
        let policy = Self::exponential();
        match std::env::var("QUEUE_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            Some(max) => policy.with_max_attempts(max),
            None => policy,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before delivering `attempt` (1-based). The first delivery has none.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry_num = attempt - 1;
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(retry_num as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-range..range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Whether a task that just ran `current_attempt` may be delivered again.
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
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::exponential().with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(12), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::exponential().with_initial_interval(Duration::from_secs(10));
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(2).as_secs_f64();
            assert!((9.0..=11.0).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_no_retry_and_fixed() {
        assert!(!RetryPolicy::no_retry().has_attempts_remaining(1));

        let fixed = RetryPolicy::fixed(Duration::from_secs(5), 3);
        assert_eq!(fixed.delay_for_attempt(2), Duration::from_secs(5));
        assert_eq!(fixed.delay_for_attempt(3), Duration::from_secs(5));
        assert!(fixed.has_attempts_remaining(2));
        assert!(!fixed.has_attempts_remaining(3));
    }

    #[test]
    fn test_max_attempts_never_zero() {
        assert_eq!(RetryPolicy::exponential().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_stored_form_uses_millis() {
        let policy = RetryPolicy::fixed(Duration::from_millis(1500), 2);
        let value = serde_json::to_value(&policy).unwrap();
        assert_eq!(value["initial_interval"], 1500);

        let parsed: RetryPolicy = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, policy);
    }
}
