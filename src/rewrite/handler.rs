use futures_util::future::BoxFuture;
use hyper::header::{HeaderValue, LOCATION};
use hyper::http::uri::PathAndQuery;
use hyper::{StatusCode, Uri};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use super::config::RewriteConfig;
use crate::chain::{client_ip, shielded, Handler, HttpRequest, HttpResponse, Middleware};

/// Path-rewriting middleware.
///
/// A matching request is forwarded to the downstream chain under its
/// rewritten path, and the resulting response is turned into a 307
/// redirect to that path. Clients that honor the redirect land on the
/// new route; the body produced by the rewritten handler still travels
/// with the 307.
pub struct PathRewriter {
    inner: Arc<Inner>,
}

struct Inner {
    config: RewriteConfig,
}

impl PathRewriter {
    pub fn new(config: RewriteConfig) -> Self {
        Self {
            inner: Arc::new(Inner { config }),
        }
    }

    pub fn handler(&self) -> Arc<dyn Middleware> {
        Arc::new(RewriteMiddleware {
            inner: Arc::clone(&self.inner),
        })
    }

    /// No background tasks to tear down.
    pub fn stop(&self) {}
}

struct RewriteMiddleware {
    inner: Arc<Inner>,
}

impl Middleware for RewriteMiddleware {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(RewriteHandler {
            inner: Arc::clone(&self.inner),
            next,
        })
    }
}

struct RewriteHandler {
    inner: Arc<Inner>,
    next: Arc<dyn Handler>,
}

impl Handler for RewriteHandler {
    fn call(&self, mut req: HttpRequest, peer: SocketAddr) -> BoxFuture<'static, HttpResponse> {
        let inner = Arc::clone(&self.inner);
        let next = Arc::clone(&self.next);

        Box::pin(async move {
            if !(inner.config.match_fn)(&req)
                || inner.config.ip_whitelist.contains(&client_ip(&peer))
            {
                return next.call(req, peer).await;
            }
            let Some(new_path) = (inner.config.rewrite_fn)(req.uri()) else {
                return next.call(req, peer).await;
            };

            let old_path = req.uri().path().to_string();
            match rewritten_uri(req.uri(), &new_path) {
                Ok(uri) => *req.uri_mut() = uri,
                Err(err) => {
                    warn!(%err, new_path = %new_path, "rewritten path is not a valid uri");
                    return next.call(req, peer).await;
                }
            }
            shielded(|| inner.config.callback.on_path_rewritten(&old_path, &new_path));

            let mut response = next.call(req, peer).await;
            *response.status_mut() = StatusCode::TEMPORARY_REDIRECT;
            match HeaderValue::from_str(&new_path) {
                Ok(location) => {
                    response.headers_mut().insert(LOCATION, location);
                }
                Err(err) => warn!(%err, "rewritten path is not a valid Location header"),
            }
            response
        })
    }
}

/// Swap the path of `uri`, preserving its query string.
fn rewritten_uri(uri: &Uri, new_path: &str) -> Result<Uri, hyper::http::Error> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{new_path}?{query}"),
        None => new_path.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse::<PathAndQuery>()?);
    Ok(Uri::from_parts(parts)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewriting_preserves_the_query_string() {
        let uri: Uri = "/test?page=2&sort=asc".parse().unwrap();
        let rewritten = rewritten_uri(&uri, "/test2").unwrap();
        assert_eq!(rewritten.path(), "/test2");
        assert_eq!(rewritten.query(), Some("page=2&sort=asc"));
    }

    #[test]
    fn rewriting_without_a_query() {
        let uri: Uri = "/test".parse().unwrap();
        let rewritten = rewritten_uri(&uri, "/test2").unwrap();
        assert_eq!(rewritten.path(), "/test2");
        assert_eq!(rewritten.query(), None);
    }

    #[test]
    fn an_invalid_new_path_is_an_error() {
        let uri: Uri = "/test".parse().unwrap();
        assert!(rewritten_uri(&uri, "no leading slash").is_err());
    }
}
