use std::thread;
use std::time::Duration;

use imagegen_contracts::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Pause after the given failed attempt (1-based): 1s, 2s, 4s, ... capped.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the policy runs out of attempts. The closure receives the 1-based attempt
/// number. The last error is returned unchanged.
pub fn execute_with_retry<T>(
    policy: &RetryPolicy,
    operation: impl FnMut(u32) -> Result<T, ProviderError>,
) -> Result<T, ProviderError> {
    execute_with_retry_and_sleep(policy, operation, thread::sleep)
}

pub(crate) fn execute_with_retry_and_sleep<T>(
    policy: &RetryPolicy,
    mut operation: impl FnMut(u32) -> Result<T, ProviderError>,
    mut sleep: impl FnMut(Duration),
) -> Result<T, ProviderError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    provider = err.provider().unwrap_or("unknown"),
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after retryable failure"
                );
                sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use imagegen_contracts::ProviderError;

    use super::{execute_with_retry, execute_with_retry_and_sleep, RetryPolicy};

    #[test]
    fn delays_double_and_cap() {
        let policy = RetryPolicy::default();
        let delays: Vec<Duration> = (1..=6).map(|attempt| policy.delay_after(attempt)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(10),
                Duration::from_secs(10),
            ]
        );
        assert_eq!(policy.delay_after(200), Duration::from_secs(10));
    }

    #[test]
    fn non_retryable_errors_run_once() {
        let calls = Cell::new(0);
        let mut slept = Vec::new();
        let result: Result<(), ProviderError> = execute_with_retry_and_sleep(
            &RetryPolicy::default(),
            |_| {
                calls.set(calls.get() + 1);
                Err(ProviderError::invalid_input("openai", "prompt is empty"))
            },
            |delay| slept.push(delay),
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
        assert!(slept.is_empty());
    }

    #[test]
    fn retryable_errors_use_every_attempt_with_growing_delays() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
        };
        let mut attempts_seen = Vec::new();
        let mut slept = Vec::new();
        let result: Result<(), ProviderError> = execute_with_retry_and_sleep(
            &policy,
            |attempt| {
                attempts_seen.push(attempt);
                Err(ProviderError::transient("flux", format!("timeout #{attempt}")))
            },
            |delay| slept.push(delay),
        );
        assert_eq!(attempts_seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(slept.len(), 4);
        assert!(slept.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(slept.iter().all(|delay| *delay <= Duration::from_secs(3)));
        let message = result.err().map(|err| err.to_string()).unwrap_or_default();
        assert!(message.contains("timeout #5"));
    }

    #[test]
    fn recovers_when_a_later_attempt_succeeds() -> anyhow::Result<()> {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let value = execute_with_retry(&policy, |attempt| {
            if attempt < 3 {
                Err(ProviderError::rate_limited("fal", Duration::from_secs(1)))
            } else {
                Ok(attempt * 10)
            }
        })?;
        assert_eq!(value, 30);
        Ok(())
    }

    #[test]
    fn single_attempt_policy_never_sleeps() {
        let policy = RetryPolicy::default().with_max_attempts(1);
        let mut slept = 0;
        let result: Result<(), ProviderError> = execute_with_retry_and_sleep(
            &policy,
            |_| Err(ProviderError::transient("gemini", "503")),
            |_| slept += 1,
        );
        assert!(result.is_err());
        assert_eq!(slept, 0);
    }
}
