// Retry policy: exponential backoff with multiplicative jitter

use crate::application::dispatcher::constants::{
    RETRY_JITTER_MAX, RETRY_JITTER_MIN, RETRY_MAX_DELAY_SECS, RETRY_MIN_DELAY_SECS,
};
use crate::domain::OutboxRecord;
use rand::Rng;
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reschedule the record (with backoff delay in ms)
    Retry(i64),
    /// Attempts exhausted, record fails permanently
    Exhausted,
}

/// Retry policy applied after every dispatch failure (validation, engine
/// call, network). Validation failures retry too: schema drift between
/// writer and dispatcher versions self-heals in rolling deployments.
pub struct RetryPolicy;

impl RetryPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether a record whose claim just failed should be retried.
    ///
    /// `record.attempts` already counts the attempt that failed.
    pub fn decide(&self, record: &OutboxRecord) -> RetryDecision {
        if record.attempts >= record.max_attempts {
            warn!(
                record_id = %record.id,
                attempts = %record.attempts,
                max_attempts = %record.max_attempts,
                "Max dispatch attempts reached"
            );
            return RetryDecision::Exhausted;
        }

        let delay_ms = jittered_delay_ms(record.attempts);

        info!(
            record_id = %record.id,
            attempt = %record.attempts,
            max_attempts = %record.max_attempts,
            delay_ms = %delay_ms,
            "Scheduling dispatch retry"
        );

        RetryDecision::Retry(delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Base delay in seconds before jitter: 2^(attempts-1), clamped to
/// [RETRY_MIN_DELAY_SECS, RETRY_MAX_DELAY_SECS]
pub fn backoff_base_secs(attempts: i32) -> i64 {
    let exponent = (attempts - 1).max(0).min(62) as u32;
    let raw = i64::checked_shl(1, exponent).unwrap_or(RETRY_MAX_DELAY_SECS);
    raw.clamp(RETRY_MIN_DELAY_SECS, RETRY_MAX_DELAY_SECS)
}

/// Full retry delay in ms: base × jitter in [0.8, 1.2], clamped again to the
/// same bounds. Jitter spreads retries so many records failing together do
/// not storm the engine in lockstep.
fn jittered_delay_ms(attempts: i32) -> i64 {
    let base_ms = backoff_base_secs(attempts) * 1000;
    let jitter: f64 = rand::thread_rng().gen_range(RETRY_JITTER_MIN..=RETRY_JITTER_MAX);
    let jittered = (base_ms as f64 * jitter) as i64;

    jittered.clamp(RETRY_MIN_DELAY_SECS * 1000, RETRY_MAX_DELAY_SECS * 1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OutboxRecord, TaskType};
    use serde_json::json;

    #[test]
    fn test_base_delay_bounds_and_monotonicity() {
        let mut previous = 0;
        for attempts in 1..=20 {
            let base = backoff_base_secs(attempts);
            assert!(base >= RETRY_MIN_DELAY_SECS, "attempt {}", attempts);
            assert!(base <= RETRY_MAX_DELAY_SECS, "attempt {}", attempts);
            assert!(base >= previous, "base delay must be non-decreasing");
            previous = base;
        }
        assert_eq!(backoff_base_secs(20), RETRY_MAX_DELAY_SECS);
    }

    #[test]
    fn test_early_attempts_hit_floor() {
        // 2^0=1s, 2^1=2s, 2^2=4s all clamp up to the 5s floor
        assert_eq!(backoff_base_secs(1), 5);
        assert_eq!(backoff_base_secs(2), 5);
        assert_eq!(backoff_base_secs(3), 5);
        assert_eq!(backoff_base_secs(4), 8);
    }

    #[test]
    fn test_jittered_delay_stays_in_bounds() {
        for attempts in 1..=15 {
            for _ in 0..50 {
                let delay = jittered_delay_ms(attempts);
                assert!(delay >= RETRY_MIN_DELAY_SECS * 1000);
                assert!(delay <= RETRY_MAX_DELAY_SECS * 1000);
            }
        }
    }

    #[test]
    fn test_decide_retries_until_exhausted() {
        let policy = RetryPolicy::new();
        let mut record = OutboxRecord::new_test(TaskType::SendMail, json!({"id": "m1"}));
        record.max_attempts = 3;

        record.attempts = 1;
        assert!(matches!(policy.decide(&record), RetryDecision::Retry(_)));

        record.attempts = 2;
        assert!(matches!(policy.decide(&record), RetryDecision::Retry(_)));

        record.attempts = 3;
        assert_eq!(policy.decide(&record), RetryDecision::Exhausted);
    }
}
