use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Token-bucket admission gate with hot-swappable rate and capacity.
///
/// Tokens accrue continuously at `rate` per second up to `burst`, and
/// the bucket starts full. All operations are internally synchronized;
/// concurrent `allow` calls agree on a single admission order.
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

struct BucketState {
    rate: f64,
    burst: u32,
    tokens: f64,
    last: Instant,
}

impl BucketState {
    /// Accrue the tokens owed since the last observation and clamp the
    /// balance to the current capacity.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(f64::from(self.burst));
        self.last = now;
    }
}

impl TokenBucket {
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            state: Mutex::new(BucketState {
                rate,
                burst,
                tokens: f64::from(burst),
                last: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Try to take one token. Returns false, with no side effect, when
    /// the bucket is empty.
    pub fn allow(&self) -> bool {
        let mut state = self.lock();
        state.refill(Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Install a new refill rate. Tokens owed under the old rate are
    /// settled first; the current balance carries over unchanged.
    pub fn set_rate(&self, rate: f64) {
        let mut state = self.lock();
        state.refill(Instant::now());
        state.rate = rate;
    }

    /// Install a new capacity. The balance clamps to it at the next
    /// observation.
    pub fn set_burst(&self, burst: u32) {
        self.lock().burst = burst;
    }

    pub fn rate(&self) -> f64 {
        self.lock().rate
    }

    pub fn burst(&self) -> u32 {
        self.lock().burst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn full_bucket_admits_exactly_burst() {
        let bucket = TokenBucket::new(1.0, 5);
        let admitted = (0..10).filter(|_| bucket.allow()).count();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn tokens_refill_over_time_up_to_burst() {
        let bucket = TokenBucket::new(5.0, 2);
        while bucket.allow() {}

        // 500ms at 5 tokens/s owes 2.5 tokens, clamped to the burst of 2.
        std::thread::sleep(Duration::from_millis(500));
        assert!(bucket.allow());
        assert!(bucket.allow());
        assert!(!bucket.allow());
    }

    #[test]
    fn set_rate_preserves_the_current_balance() {
        let bucket = TokenBucket::new(1.0, 10);
        for _ in 0..3 {
            assert!(bucket.allow());
        }

        bucket.set_rate(100.0);
        assert_eq!(bucket.rate(), 100.0);

        // The 7 tokens held before the change are still spendable.
        let admitted = (0..7).filter(|_| bucket.allow()).count();
        assert_eq!(admitted, 7);
    }

    #[test]
    fn set_burst_clamps_on_next_observation() {
        let bucket = TokenBucket::new(1.0, 10);
        bucket.set_burst(3);
        assert_eq!(bucket.burst(), 3);

        let admitted = (0..10).filter(|_| bucket.allow()).count();
        assert_eq!(admitted, 3);
    }

    #[test]
    fn empty_bucket_denies_without_side_effect() {
        let bucket = TokenBucket::new(1.0, 1);
        assert!(bucket.allow());
        assert!(!bucket.allow());
        assert!(!bucket.allow());
    }
}
