use futures_util::future::BoxFuture;
use hyper::StatusCode;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::bucket::TokenBucket;
use super::config::RateLimitConfig;
use crate::cache::ShardedCache;
use crate::chain::{
    client_ip, plain_text_response, shielded, Handler, HttpRequest, HttpResponse, Middleware,
};

/// Admission middleware that gives every client IP its own token
/// bucket.
///
/// Buckets are created on first sight of an IP and evicted by the
/// cache's sweepers once the IP goes quiet, so memory tracks the set of
/// recently active clients rather than the address space. Rate and
/// burst can be reconfigured across the whole population at runtime.
pub struct IpRateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    config: RateLimitConfig,
    // Current (rate, burst), read by the bucket factory so buckets
    // created after a reconfiguration start with the new values.
    rate_bits: AtomicU64,
    burst: AtomicU32,
    buckets: ShardedCache<Arc<TokenBucket>>,
}

impl Inner {
    fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Acquire))
    }
}

impl IpRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let config = config.validated();
        Self {
            inner: Arc::new(Inner {
                rate_bits: AtomicU64::new(config.rate.to_bits()),
                burst: AtomicU32::new(config.burst),
                buckets: ShardedCache::new(),
                config,
            }),
        }
    }

    /// Build with a custom sweep cadence and idle TTL for the bucket
    /// map.
    pub fn with_timings(
        config: RateLimitConfig,
        sweep_interval: Duration,
        idle_ttl: Duration,
    ) -> Self {
        let config = config.validated();
        Self {
            inner: Arc::new(Inner {
                rate_bits: AtomicU64::new(config.rate.to_bits()),
                burst: AtomicU32::new(config.burst),
                buckets: ShardedCache::with_timings(sweep_interval, idle_ttl),
                config,
            }),
        }
    }

    /// Install a new refill rate on every live bucket, walking each
    /// shard under its own lock. Requests racing the walk may observe
    /// either the old or the new rate, never anything in between.
    pub fn set_rate(&self, rate: f64) {
        self.inner.rate_bits.store(rate.to_bits(), Ordering::Release);
        for shard in self.inner.buckets.shards() {
            shard.for_each(|_, bucket| bucket.set_rate(rate));
        }
    }

    /// Install a new capacity on every live bucket.
    pub fn set_burst(&self, burst: u32) {
        self.inner.burst.store(burst, Ordering::Release);
        for shard in self.inner.buckets.shards() {
            shard.for_each(|_, bucket| bucket.set_burst(burst));
        }
    }

    /// The live bucket for `ip`, if one exists. The lookup counts as an
    /// access and defers eviction.
    pub fn get_limiter(&self, ip: &str) -> Option<Arc<TokenBucket>> {
        self.inner.buckets.get(ip)
    }

    pub fn handler(&self) -> Arc<dyn Middleware> {
        Arc::new(IpRateLimitMiddleware {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Cancel and join the bucket map's sweepers. Idempotent.
    pub async fn stop(&self) {
        self.inner.buckets.stop().await;
    }
}

struct IpRateLimitMiddleware {
    inner: Arc<Inner>,
}

impl Middleware for IpRateLimitMiddleware {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(IpRateLimitHandler {
            inner: Arc::clone(&self.inner),
            next,
        })
    }
}

struct IpRateLimitHandler {
    inner: Arc<Inner>,
    next: Arc<dyn Handler>,
}

impl Handler for IpRateLimitHandler {
    fn call(&self, req: HttpRequest, peer: SocketAddr) -> BoxFuture<'static, HttpResponse> {
        let inner = Arc::clone(&self.inner);
        let next = Arc::clone(&self.next);

        Box::pin(async move {
            if !(inner.config.match_fn)(&req) {
                return next.call(req, peer).await;
            }
            let ip = client_ip(&peer);
            if inner.config.ip_whitelist.contains(&ip) {
                return next.call(req, peer).await;
            }

            let (bucket, _existed) = inner.buckets.get_or_create(&ip, || {
                Arc::new(TokenBucket::new(
                    inner.rate(),
                    inner.burst.load(Ordering::Acquire),
                ))
            });
            if bucket.allow() {
                return next.call(req, peer).await;
            }

            let body = format!(
                "[429] too many http requests, ip:{}, method: {}, path: {}",
                ip,
                req.method(),
                req.uri().path()
            );
            debug!(ip = %ip, method = %req.method(), path = req.uri().path(), "request denied by per-ip rate limiter");
            shielded(|| inner.config.callback.on_limited(&req));
            plain_text_response(StatusCode::TOO_MANY_REQUESTS, body)
        })
    }
}
