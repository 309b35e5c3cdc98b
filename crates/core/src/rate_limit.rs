//! Fixed-window rate limiting.
//!
//! One limiter instance is shared process-wide and keyed by a logical
//! name plus an identifier, so the model API, the search provider and
//! per-user streaming budgets all live in the same table. Updates to a
//! key are mutually exclusive via the map's per-shard locking.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

const WINDOW_MS: u64 = 60_000;

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds until the oldest request ages out of the window. Zero when
    /// allowed.
    pub wait_secs: f64,
}

impl RateDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            wait_secs: 0.0,
        }
    }
}

/// Fixed-window per-minute limiter keyed by `name:id`.
#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<String, VecDeque<u64>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether one more request fits into the current window for
    /// `name`/`id` at `rate` requests per minute. Allowed requests are
    /// recorded; denied requests are not.
    pub fn check(&self, name: &str, rate: usize, id: &str) -> RateDecision {
        self.check_at(name, rate, id, now_ms())
    }

    /// Window count for a key, for metrics and tests.
    pub fn current_count(&self, name: &str, id: &str) -> usize {
        self.windows
            .get(&key(name, id))
            .map(|w| w.len())
            .unwrap_or(0)
    }

    /// Drop keys whose entire window has aged out.
    pub fn prune(&self) {
        let cutoff = now_ms().saturating_sub(WINDOW_MS);
        self.windows
            .retain(|_, window| window.back().is_some_and(|&t| t > cutoff));
    }

    fn check_at(&self, name: &str, rate: usize, id: &str, now: u64) -> RateDecision {
        if rate == 0 {
            return RateDecision {
                allowed: false,
                wait_secs: WINDOW_MS as f64 / 1000.0,
            };
        }

        let mut window = self.windows.entry(key(name, id)).or_default();

        let cutoff = now.saturating_sub(WINDOW_MS);
        while window.front().is_some_and(|&t| t < cutoff) {
            window.pop_front();
        }

        if window.len() < rate {
            window.push_back(now);
            return RateDecision::allowed();
        }

        let oldest = *window.front().expect("window is non-empty at capacity");
        let wait_ms = WINDOW_MS.saturating_sub(now.saturating_sub(oldest));
        RateDecision {
            allowed: false,
            wait_secs: wait_ms as f64 / 1000.0,
        }
    }
}

fn key(name: &str, id: &str) -> String {
    format!("{name}:{id}")
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_rate() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check_at("api", 5, "default", 1_000).allowed);
        }
        assert_eq!(limiter.current_count("api", "default"), 5);
    }

    #[test]
    fn test_rejects_over_rate_with_wait() {
        let limiter = RateLimiter::new();
        for i in 0..3 {
            assert!(limiter.check_at("api", 3, "default", 1_000 + i).allowed);
        }
        let decision = limiter.check_at("api", 3, "default", 2_000);
        assert!(!decision.allowed);
        assert!(decision.wait_secs > 0.0);
        // Oldest at t=1000, window 60s: wait = 60 - 1 = 59s.
        assert!((decision.wait_secs - 59.0).abs() < 0.01);
    }

    #[test]
    fn test_window_ages_out() {
        let limiter = RateLimiter::new();
        assert!(limiter.check_at("api", 1, "default", 1_000).allowed);
        assert!(!limiter.check_at("api", 1, "default", 30_000).allowed);
        // 61s later the first request is outside the window.
        assert!(limiter.check_at("api", 1, "default", 62_000).allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new();
        assert!(limiter.check_at("api", 1, "alice", 1_000).allowed);
        assert!(limiter.check_at("api", 1, "bob", 1_000).allowed);
        assert!(!limiter.check_at("api", 1, "alice", 1_001).allowed);
    }

    #[test]
    fn test_zero_rate_never_allows() {
        let limiter = RateLimiter::new();
        let decision = limiter.check_at("api", 0, "default", 1_000);
        assert!(!decision.allowed);
        assert!(decision.wait_secs > 0.0);
    }

    #[test]
    fn test_denied_request_is_not_recorded() {
        let limiter = RateLimiter::new();
        assert!(limiter.check_at("api", 1, "default", 1_000).allowed);
        let _ = limiter.check_at("api", 1, "default", 1_500);
        assert_eq!(limiter.current_count("api", "default"), 1);
    }
}
