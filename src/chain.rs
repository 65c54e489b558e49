use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

/// Uniform body type carried through the middleware chain, matching the
/// boxed-body plumbing hyper services use.
pub type BoxedBody = BoxBody<Bytes, hyper::Error>;

pub type HttpRequest = Request<BoxedBody>;
pub type HttpResponse = Response<BoxedBody>;

/// Decides whether a middleware applies to a request.
pub type MatchFn = Arc<dyn Fn(&HttpRequest) -> bool + Send + Sync>;

/// The default predicate: every request matches.
pub fn match_all() -> MatchFn {
    Arc::new(|_: &HttpRequest| true)
}

/// One request-handling stage. Endpoints and wrapped middleware both
/// implement this; plain async closures get an implementation for free.
pub trait Handler: Send + Sync {
    fn call(&self, req: HttpRequest, peer: SocketAddr) -> BoxFuture<'static, HttpResponse>;
}

impl<F, Fut> Handler for F
where
    F: Fn(HttpRequest, SocketAddr) -> Fut + Send + Sync,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    fn call(&self, req: HttpRequest, peer: SocketAddr) -> BoxFuture<'static, HttpResponse> {
        Box::pin(self(req, peer))
    }
}

/// A middleware wraps the next stage of the chain and returns the
/// combined handler.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler>;
}

/// Ordered middleware list folded around an endpoint handler.
///
/// The first middleware added sees the request first and the response
/// last.
#[derive(Default)]
pub struct Chain {
    stack: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.stack.push(middleware);
        self
    }

    /// Fold the stack around `endpoint` and return the entry handler.
    pub fn handler(self, endpoint: Arc<dyn Handler>) -> Arc<dyn Handler> {
        self.stack
            .into_iter()
            .rev()
            .fold(endpoint, |next, middleware| middleware.wrap(next))
    }
}

/// The framework's view of the client address.
pub fn client_ip(peer: &SocketAddr) -> String {
    peer.ip().to_string()
}

/// Box a complete in-memory body.
pub fn full_body(data: impl Into<Bytes>) -> BoxedBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Constructs a plain-text response, used for limiter denials and
/// compressor failures.
pub fn plain_text_response(status: StatusCode, body: String) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full_body(body))
        .unwrap()
}

/// Runs a user callback so that a panic inside it cannot poison the
/// middleware's own state.
pub(crate) fn shielded<F: FnOnce()>(callback: F) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)).is_err() {
        warn!("middleware callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chain_wraps_in_insertion_order() {
        struct Tag(&'static str);

        impl Middleware for Tag {
            fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
                let tag = self.0;
                Arc::new(move |req: HttpRequest, peer: SocketAddr| {
                    let next = Arc::clone(&next);
                    async move {
                        let mut response = next.call(req, peer).await;
                        response
                            .headers_mut()
                            .append("x-seen-by", hyper::header::HeaderValue::from_static(tag));
                        response
                    }
                })
            }
        }

        let handler = Chain::new()
            .with(Arc::new(Tag("outer")))
            .with(Arc::new(Tag("inner")))
            .handler(Arc::new(|_req, _peer| async move {
                Response::new(full_body("done"))
            }));

        let peer: SocketAddr = "192.168.0.1:13143".parse().unwrap();
        let req = Request::builder().uri("/").body(full_body("")).unwrap();
        let response = handler.call(req, peer).await;

        // Responses travel back outward: the inner tag lands first.
        let seen: Vec<_> = response.headers().get_all("x-seen-by").iter().collect();
        assert_eq!(seen, ["inner", "outer"]);
    }

    #[test]
    fn client_ip_is_peer_address_without_port() {
        let peer: SocketAddr = "10.1.2.3:8080".parse().unwrap();
        assert_eq!(client_ip(&peer), "10.1.2.3");
    }
}
