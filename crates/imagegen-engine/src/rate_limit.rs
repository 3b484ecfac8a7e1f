use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use imagegen_contracts::ProviderError;

pub const MAX_REQUESTS_PER_WINDOW: u32 = 10;
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    reset_at: Instant,
}

/// Per-provider request counter over fixed 60 second windows.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    counters: Mutex<HashMap<String, WindowCounter>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(MAX_REQUESTS_PER_WINDOW, RATE_LIMIT_WINDOW)
    }
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Counts one attempt for `provider`, or fails with a retryable
    /// rate-limit error carrying the time left in the current window.
    pub fn check(&self, provider: &str) -> Result<(), ProviderError> {
        self.check_at(provider, Instant::now())
    }

    pub(crate) fn check_at(&self, provider: &str, now: Instant) -> Result<(), ProviderError> {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let counter = counters
            .entry(provider.to_string())
            .or_insert(WindowCounter {
                count: 0,
                reset_at: now + self.window,
            });
        if now >= counter.reset_at {
            counter.count = 0;
            counter.reset_at = now + self.window;
        }
        if counter.count >= self.max_requests {
            let retry_after = counter.reset_at.saturating_duration_since(now);
            tracing::warn!(
                provider,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit reached"
            );
            return Err(ProviderError::rate_limited(provider, retry_after));
        }
        counter.count += 1;
        Ok(())
    }

    pub fn remaining(&self, provider: &str) -> u32 {
        self.remaining_at(provider, Instant::now())
    }

    fn remaining_at(&self, provider: &str, now: Instant) -> u32 {
        let counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match counters.get(provider) {
            Some(counter) if now < counter.reset_at => {
                self.max_requests.saturating_sub(counter.count)
            }
            _ => self.max_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{RateLimiter, MAX_REQUESTS_PER_WINDOW, RATE_LIMIT_WINDOW};

    #[test]
    fn allows_exactly_the_window_budget() {
        let limiter = RateLimiter::default();
        let start = Instant::now();
        for idx in 0..MAX_REQUESTS_PER_WINDOW {
            let now = start + Duration::from_millis(u64::from(idx));
            assert!(limiter.check_at("flux", now).is_ok(), "attempt {idx}");
        }
        let err = limiter
            .check_at("flux", start + Duration::from_secs(20))
            .err();
        let Some(err) = err else {
            panic!("eleventh attempt should be rejected");
        };
        assert!(err.is_retryable());
        assert_eq!(err.provider(), Some("flux"));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(40)));
        assert_eq!(limiter.remaining_at("flux", start + Duration::from_secs(20)), 0);
    }

    #[test]
    fn window_resets_after_it_elapses() {
        let limiter = RateLimiter::default();
        let start = Instant::now();
        for _ in 0..MAX_REQUESTS_PER_WINDOW {
            assert!(limiter.check_at("openai", start).is_ok());
        }
        assert!(limiter.check_at("openai", start).is_err());

        let later = start + RATE_LIMIT_WINDOW;
        assert_eq!(limiter.remaining_at("openai", later), MAX_REQUESTS_PER_WINDOW);
        for _ in 0..MAX_REQUESTS_PER_WINDOW {
            assert!(limiter.check_at("openai", later).is_ok());
        }
        assert!(limiter.check_at("openai", later).is_err());
    }

    #[test]
    fn providers_are_counted_independently() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("gemini", now).is_ok());
        assert!(limiter.check_at("gemini", now).is_ok());
        assert!(limiter.check_at("gemini", now).is_err());
        assert!(limiter.check_at("fal", now).is_ok());
        assert_eq!(limiter.remaining_at("fal", now), 1);
    }

    #[test]
    fn rejected_attempts_do_not_extend_the_count() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        let now = Instant::now();
        assert!(limiter.check_at("ideogram", now).is_ok());
        for _ in 0..5 {
            assert!(limiter.check_at("ideogram", now).is_err());
        }
        assert!(limiter
            .check_at("ideogram", now + Duration::from_secs(10))
            .is_ok());
    }

    #[test]
    fn shared_across_threads() {
        let limiter = std::sync::Arc::new(RateLimiter::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..5)
                        .filter(|_| limiter.check("replicate").is_ok())
                        .count()
                })
            })
            .collect();
        let accepted: usize = handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_default())
            .sum();
        assert_eq!(accepted, MAX_REQUESTS_PER_WINDOW as usize);
    }
}
