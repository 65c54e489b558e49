use std::collections::HashSet;
use std::sync::Arc;

use crate::chain::{match_all, HttpRequest, MatchFn};

pub const DEFAULT_RATE: f64 = 1.0;
pub const DEFAULT_BURST: u32 = 1;

/// Notified when a request is denied admission. The denied request is
/// passed by reference and is dropped after the callback returns.
pub trait LimitedCallback: Send + Sync {
    fn on_limited(&self, request: &HttpRequest);
}

/// Default callback: does nothing.
pub struct NoopLimitedCallback;

impl LimitedCallback for NoopLimitedCallback {
    fn on_limited(&self, _request: &HttpRequest) {}
}

/// Configuration shared by the global and the per-IP rate limiter.
pub struct RateLimitConfig {
    pub(crate) rate: f64,
    pub(crate) burst: u32,
    pub(crate) ip_whitelist: HashSet<String>,
    pub(crate) match_fn: MatchFn,
    pub(crate) callback: Arc<dyn LimitedCallback>,
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self {
            rate: DEFAULT_RATE,
            burst: DEFAULT_BURST,
            ip_whitelist: HashSet::new(),
            match_fn: match_all(),
            callback: Arc::new(NoopLimitedCallback),
        }
    }

    /// Refill rate in tokens per second. Values at or below zero fall
    /// back to [`DEFAULT_RATE`].
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Maximum number of requests admitted back-to-back from a full
    /// bucket. Zero falls back to [`DEFAULT_BURST`].
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    /// Client IPs exempt from rate limiting. Extends the current set.
    pub fn with_ip_whitelist<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ip_whitelist.extend(ips.into_iter().map(Into::into));
        self
    }

    /// Restrict the limiter to requests this predicate accepts.
    pub fn with_match_fn(mut self, match_fn: MatchFn) -> Self {
        self.match_fn = match_fn;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn LimitedCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Clamp out-of-range fields to their defaults.
    pub(crate) fn validated(mut self) -> Self {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            self.rate = DEFAULT_RATE;
        }
        if self.burst == 0 {
            self.burst = DEFAULT_BURST;
        }
        self
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}
