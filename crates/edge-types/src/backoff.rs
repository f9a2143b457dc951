//! Capped-exponential backoff with multiplicative jitter. Shared by the
//! gateway stream reconnect (`plc-gateway`, base 1 s, cap 30 s) and the
//! broker reader reconnect (`edge-messaging`, base 500 ms, cap 5 s) — one
//! policy, parameterized per call site.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryBackoff {
    base: Duration,
    cap: Duration,
}

impl RetryBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before retry attempt `attempt` (0-based). Doubles each attempt,
    /// capped, then jittered by ±20%.
    pub fn delay(&self, attempt: u32) -> Duration {
        let doubled = self.base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        let capped = doubled.min(self.cap);
        let jitter_frac = rand::thread_rng().gen_range(-0.2..=0.2);
        let millis = capped.as_millis() as f64 * (1.0 + jitter_frac);
        Duration::from_millis(millis.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_capped_and_within_jitter_bounds() {
        let backoff = RetryBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
        for attempt in 0..20 {
            let d = backoff.delay(attempt);
            assert!(d <= Duration::from_millis(30_000 + 6_000));
        }
    }

    #[test]
    fn delay_grows_with_attempt_before_capping() {
        let backoff = RetryBackoff::new(Duration::from_millis(500), Duration::from_secs(5));
        let d0 = backoff.delay(0);
        assert!(d0 <= Duration::from_millis(600));
    }

    #[test]
    fn short_cap_backoff_stays_within_bounds() {
        let backoff = RetryBackoff::new(Duration::from_millis(500), Duration::from_secs(5));
        for attempt in 0..20 {
            let d = backoff.delay(attempt);
            assert!(d <= Duration::from_millis(5_000 + 1_000));
        }
    }
}
