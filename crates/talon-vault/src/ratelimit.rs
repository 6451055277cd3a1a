//! Sliding-window retrieval rate limiting.
//!
//! Blunts brute-force and enumeration by bounding retrievals per credential
//! id. State is in-memory only and lives behind the vault's single lock, so
//! a plain `HashMap` suffices; a process restart resets all windows.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

pub struct RateLimiter {
    max_attempts: usize,
    window: Duration,
    /// credential id -> timestamps of allowed attempts, oldest first.
    attempts: HashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            window: config.window(),
            attempts: HashMap::new(),
        }
    }

    /// Admit or reject one retrieval attempt for `credential_id`.
    ///
    /// Expired timestamps are pruned first. A rejected attempt is not
    /// recorded, so hammering a limited id does not extend its lockout.
    pub fn check_and_record(&mut self, credential_id: &str) -> bool {
        if self.max_attempts == usize::MAX {
            return true;
        }
        let now = Instant::now();
        let timestamps = self.attempts.entry(credential_id.to_string()).or_default();
        while timestamps
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            timestamps.pop_front();
        }
        if timestamps.len() >= self.max_attempts {
            return false;
        }
        timestamps.push_back(now);
        true
    }

    /// Forget all attempts for an id. Called when the credential is deleted.
    pub fn reset(&mut self, credential_id: &str) {
        self.attempts.remove(credential_id);
    }

    /// Attempts currently inside the window for an id.
    pub fn recorded(&self, credential_id: &str) -> usize {
        self.attempts.get(credential_id).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_attempts: usize, window: Duration) -> RateLimiter {
        RateLimiter {
            max_attempts,
            window,
            attempts: HashMap::new(),
        }
    }

    #[test]
    fn test_allows_up_to_max() {
        let mut rl = limiter(3, Duration::from_secs(60));
        assert!(rl.check_and_record("k"));
        assert!(rl.check_and_record("k"));
        assert!(rl.check_and_record("k"));
        assert!(!rl.check_and_record("k"));
        assert_eq!(rl.recorded("k"), 3);
    }

    #[test]
    fn test_rejected_attempts_not_recorded() {
        let mut rl = limiter(1, Duration::from_secs(60));
        assert!(rl.check_and_record("k"));
        for _ in 0..10 {
            assert!(!rl.check_and_record("k"));
        }
        assert_eq!(rl.recorded("k"), 1);
    }

    #[test]
    fn test_ids_are_independent() {
        let mut rl = limiter(1, Duration::from_secs(60));
        assert!(rl.check_and_record("a"));
        assert!(!rl.check_and_record("a"));
        assert!(rl.check_and_record("b"));
    }

    #[test]
    fn test_window_expiry_readmits() {
        let mut rl = limiter(2, Duration::from_millis(40));
        assert!(rl.check_and_record("k"));
        assert!(rl.check_and_record("k"));
        assert!(!rl.check_and_record("k"));
        std::thread::sleep(Duration::from_millis(50));
        assert!(rl.check_and_record("k"));
    }

    #[test]
    fn test_reset_clears_history() {
        let mut rl = limiter(1, Duration::from_secs(60));
        assert!(rl.check_and_record("k"));
        assert!(!rl.check_and_record("k"));
        rl.reset("k");
        assert!(rl.check_and_record("k"));
    }

    #[test]
    fn test_unlimited_never_rejects() {
        let mut rl = RateLimiter::new(&RateLimitConfig::unlimited());
        for _ in 0..10_000 {
            assert!(rl.check_and_record("k"));
        }
    }
}
