use futures_util::future::BoxFuture;
use hyper::StatusCode;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use super::bucket::TokenBucket;
use super::config::RateLimitConfig;
use crate::chain::{
    client_ip, plain_text_response, shielded, Handler, HttpRequest, HttpResponse, Middleware,
};

/// Admission middleware backed by a single token bucket shared by every
/// client.
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    config: RateLimitConfig,
    bucket: TokenBucket,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let config = config.validated();
        let bucket = TokenBucket::new(config.rate, config.burst);
        Self {
            inner: Arc::new(Inner { config, bucket }),
        }
    }

    /// Install a new refill rate on the shared bucket.
    pub fn set_rate(&self, rate: f64) {
        self.inner.bucket.set_rate(rate);
    }

    /// Install a new capacity on the shared bucket.
    pub fn set_burst(&self, burst: u32) {
        self.inner.bucket.set_burst(burst);
    }

    pub fn handler(&self) -> Arc<dyn Middleware> {
        Arc::new(RateLimitMiddleware {
            inner: Arc::clone(&self.inner),
        })
    }

    /// No background tasks to tear down.
    pub fn stop(&self) {}
}

struct RateLimitMiddleware {
    inner: Arc<Inner>,
}

impl Middleware for RateLimitMiddleware {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(RateLimitHandler {
            inner: Arc::clone(&self.inner),
            next,
        })
    }
}

struct RateLimitHandler {
    inner: Arc<Inner>,
    next: Arc<dyn Handler>,
}

impl Handler for RateLimitHandler {
    fn call(&self, req: HttpRequest, peer: SocketAddr) -> BoxFuture<'static, HttpResponse> {
        let inner = Arc::clone(&self.inner);
        let next = Arc::clone(&self.next);

        Box::pin(async move {
            if !(inner.config.match_fn)(&req) {
                return next.call(req, peer).await;
            }
            if inner.config.ip_whitelist.contains(&client_ip(&peer)) {
                return next.call(req, peer).await;
            }
            if inner.bucket.allow() {
                return next.call(req, peer).await;
            }

            let body = format!(
                "[429] too many http requests, method: {}, path: {}",
                req.method(),
                req.uri().path()
            );
            debug!(method = %req.method(), path = req.uri().path(), "request denied by rate limiter");
            shielded(|| inner.config.callback.on_limited(&req));
            plain_text_response(StatusCode::TOO_MANY_REQUESTS, body)
        })
    }
}
