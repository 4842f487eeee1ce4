use serde::{Deserialize, Serialize};

/// Retry schedule for re-subscribing to a sensor that refused a subscription
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscribeBackoff {
    pub attempts: u32,
    pub max_attempts: u32,
    pub base_cooldown_ms: f64,
    pub current_cooldown_ms: f64,
    pub max_cooldown_ms: f64,
    pub next_retry_at: Option<f64>,
}

impl SubscribeBackoff {
    pub fn new(max_attempts: u32, base_cooldown_ms: f64, max_cooldown_ms: f64) -> Self {
        SubscribeBackoff {
            attempts: 0,
            max_attempts,
            base_cooldown_ms,
            current_cooldown_ms: base_cooldown_ms,
            max_cooldown_ms,
            next_retry_at: None,
        }
    }

    /// Whether a retry is scheduled and due at `now`
    pub fn can_retry(&self, now: f64) -> bool {
        self.can_restart() && self.next_retry_at.map(|at| now >= at).unwrap_or(false)
    }

    /// Check if max attempts exceeded
    pub fn can_restart(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Record a failed subscribe and schedule the next retry
    pub fn record_failed_attempt(&mut self, now: f64) {
        // Only grow the delay after the first retry has been waited out
        if self.attempts > 0 {
            self.current_cooldown_ms = (self.current_cooldown_ms * 1.5).min(self.max_cooldown_ms);
        }
        self.attempts += 1;

        if self.can_restart() {
            self.next_retry_at = Some(now + self.current_cooldown_ms);
            log::warn!(
                "[sensor] subscribe attempt {} failed, next retry in {:.1}s (capped at {:.0}s)",
                self.attempts,
                self.current_cooldown_ms / 1000.0,
                self.max_cooldown_ms / 1000.0
            );
        } else {
            self.next_retry_at = None;
            log::warn!(
                "[sensor] giving up after {} subscribe attempts, shake detection stays inactive",
                self.attempts
            );
        }
    }

    /// Record a successful subscribe and reset state
    pub fn record_success(&mut self) {
        if self.attempts > 0 {
            log::info!(
                "[sensor] subscribed after {} failed attempt(s)",
                self.attempts
            );
        }
        self.reset();
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_cooldown_ms = self.base_cooldown_ms;
        self.next_retry_at = None;
    }

    /// Get formatted status
    pub fn status(&self, now: f64) -> String {
        if self.attempts == 0 {
            return "sensor: OK".to_string();
        }

        if !self.can_restart() {
            return "sensor: MAX_ATTEMPTS_EXCEEDED".to_string();
        }

        match self.next_retry_at {
            Some(at) if now < at => format!(
                "sensor: RETRY_PENDING (waiting {:.1}s, attempt {}/{})",
                (at - now) / 1000.0,
                self.attempts,
                self.max_attempts
            ),
            _ => format!(
                "sensor: READY_TO_RETRY (attempt {}/{})",
                self.attempts, self.max_attempts
            ),
        }
    }
}

impl Default for SubscribeBackoff {
    fn default() -> Self {
        // 1 s base, x1.5 per failure, capped at 30 s, 10 attempts
        Self::new(10, 1000.0, 30_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let mut backoff = SubscribeBackoff::default();
        assert!(!backoff.can_retry(0.0));

        backoff.record_failed_attempt(0.0);
        assert_eq!(backoff.next_retry_at, Some(1000.0));
        assert!(!backoff.can_retry(999.0));
        assert!(backoff.can_retry(1000.0));

        backoff.record_failed_attempt(1000.0);
        assert_eq!(backoff.next_retry_at, Some(2500.0));
    }

    #[test]
    fn test_backoff_caps_and_gives_up() {
        let mut backoff = SubscribeBackoff::new(20, 1000.0, 30_000.0);
        let mut now = 0.0;
        for _ in 0..19 {
            backoff.record_failed_attempt(now);
            now = backoff.next_retry_at.unwrap();
        }
        assert_eq!(backoff.current_cooldown_ms, 30_000.0);

        backoff.record_failed_attempt(now);
        assert!(!backoff.can_restart());
        assert!(!backoff.can_retry(f64::MAX));
        assert_eq!(backoff.status(now), "sensor: MAX_ATTEMPTS_EXCEEDED");
    }

    #[test]
    fn test_success_resets() {
        let mut backoff = SubscribeBackoff::default();
        backoff.record_failed_attempt(0.0);
        backoff.record_failed_attempt(1000.0);
        assert!(backoff.status(1500.0).starts_with("sensor: RETRY_PENDING"));

        backoff.record_success();
        assert_eq!(backoff.attempts, 0);
        assert_eq!(backoff.current_cooldown_ms, 1000.0);
        assert_eq!(backoff.status(0.0), "sensor: OK");
    }
}
