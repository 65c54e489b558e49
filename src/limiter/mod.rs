//! Request admission middleware: a single shared token bucket
//! ([`RateLimiter`]) and a per-client-IP variant ([`IpRateLimiter`])
//! that keeps one bucket per address behind a sharded expiring map.

mod bucket;
mod config;
mod global;
mod per_ip;

pub use bucket::TokenBucket;
pub use config::{
    LimitedCallback, NoopLimitedCallback, RateLimitConfig, DEFAULT_BURST, DEFAULT_RATE,
};
pub use global::RateLimiter;
pub use per_ip::IpRateLimiter;
