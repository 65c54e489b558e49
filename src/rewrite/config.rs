use std::collections::HashSet;
use std::sync::Arc;

use crate::chain::{match_all, MatchFn};
use hyper::Uri;

/// Decides whether a request is rewritten, and to what path.
pub type RewriteFn = Arc<dyn Fn(&Uri) -> Option<String> + Send + Sync>;

/// Notified after a request path has been rewritten.
pub trait RewriteCallback: Send + Sync {
    fn on_path_rewritten(&self, old_path: &str, new_path: &str);
}

/// Default callback: does nothing.
pub struct NoopRewriteCallback;

impl RewriteCallback for NoopRewriteCallback {
    fn on_path_rewritten(&self, _old_path: &str, _new_path: &str) {}
}

pub struct RewriteConfig {
    pub(crate) ip_whitelist: HashSet<String>,
    pub(crate) match_fn: MatchFn,
    pub(crate) rewrite_fn: RewriteFn,
    pub(crate) callback: Arc<dyn RewriteCallback>,
}

impl RewriteConfig {
    pub fn new() -> Self {
        Self {
            ip_whitelist: HashSet::new(),
            match_fn: match_all(),
            // The default rewrites nothing.
            rewrite_fn: Arc::new(|_: &Uri| None::<String>),
            callback: Arc::new(NoopRewriteCallback),
        }
    }

    /// Client IPs whose requests are never rewritten. Extends the
    /// current set.
    pub fn with_ip_whitelist<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ip_whitelist.extend(ips.into_iter().map(Into::into));
        self
    }

    /// Restrict the rewriter to requests this predicate accepts.
    pub fn with_match_fn(mut self, match_fn: MatchFn) -> Self {
        self.match_fn = match_fn;
        self
    }

    pub fn with_rewrite_fn(mut self, rewrite_fn: RewriteFn) -> Self {
        self.rewrite_fn = rewrite_fn;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn RewriteCallback>) -> Self {
        self.callback = callback;
        self
    }
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self::new()
    }
}
