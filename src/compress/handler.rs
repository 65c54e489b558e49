use bytes::BytesMut;
use futures_util::future::BoxFuture;
use http_body_util::BodyExt;
use hyper::header::{HeaderValue, ACCEPT, ACCEPT_ENCODING, CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, VARY};
use hyper::{HeaderMap, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tracing::error;

use super::codec::CodecWriter;
use super::config::CompressConfig;
use crate::chain::{
    client_ip, full_body, plain_text_response, Handler, HttpRequest, HttpResponse, Middleware,
};

/// Writers idling in the pool beyond this are dropped on release.
const MAX_IDLE_WRITERS: usize = 64;

/// Response compression middleware.
///
/// Encodes downstream response bodies through a pooled codec writer,
/// negotiating applicability from the request headers and fixing up
/// `Content-Encoding`, `Content-Length`, and `Vary` so the
/// transformation is invisible to the handler that produced the body.
pub struct Compressor {
    inner: Arc<Inner>,
}

struct Inner {
    config: CompressConfig,
    pool: CodecPool,
}

impl Compressor {
    pub fn new(config: CompressConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: config.validated(),
                pool: CodecPool::new(),
            }),
        }
    }

    pub fn handler(&self) -> Arc<dyn Middleware> {
        Arc::new(CompressMiddleware {
            inner: Arc::clone(&self.inner),
        })
    }

    /// No background tasks to tear down.
    pub fn stop(&self) {}
}

/// Free list of unbound codec writers.
///
/// Same acquire/release shape as a connection pool: `acquire` pops an
/// idle writer or builds a fresh one from the factory, `release` parks
/// the writer unless the pool is full.
struct CodecPool {
    free: Mutex<Vec<Box<dyn CodecWriter>>>,
}

impl CodecPool {
    fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    fn acquire(&self, config: &CompressConfig) -> Box<dyn CodecWriter> {
        let pooled = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        pooled.unwrap_or_else(|| (config.codec_factory)(config))
    }

    fn release(&self, mut writer: Box<dyn CodecWriter>) {
        writer.discard();
        let mut free = self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if free.len() < MAX_IDLE_WRITERS {
            free.push(writer);
        }
    }
}

struct CompressMiddleware {
    inner: Arc<Inner>,
}

impl Middleware for CompressMiddleware {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(CompressHandler {
            inner: Arc::clone(&self.inner),
            next,
        })
    }
}

struct CompressHandler {
    inner: Arc<Inner>,
    next: Arc<dyn Handler>,
}

impl Handler for CompressHandler {
    fn call(&self, req: HttpRequest, peer: SocketAddr) -> BoxFuture<'static, HttpResponse> {
        let inner = Arc::clone(&self.inner);
        let next = Arc::clone(&self.next);

        Box::pin(async move {
            if !(inner.config.match_fn)(&req) && !can_compress_by_header(req.headers()) {
                return next.call(req, peer).await;
            }
            if inner.config.ip_whitelist.contains(&client_ip(&peer)) {
                return next.call(req, peer).await;
            }

            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let mut writer = inner.pool.acquire(&inner.config);

            // Bind the encoder to a fresh sink before running the rest
            // of the chain.
            if let Err(err) = writer.reset_encoder_sink(BytesMut::with_capacity(512)) {
                inner.pool.release(writer);
                return plain_text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!(
                        "[500] internal server error: compress writer error: {err}, method: {method}, path: {path}"
                    ),
                );
            }

            let response = next.call(req, peer).await;
            let (head, mut body) = response.into_parts();
            let status = head.status;

            if let Err(err) = writer.reset_response_head(head) {
                inner.pool.release(writer);
                return plain_text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!(
                        "[500] internal server error: response writer error: {err}, method: {method}, path: {path}"
                    ),
                );
            }

            // Forward the downstream status and stream its body through
            // the encoder. A failing frame leaves a truncated body; the
            // encoder is still closed cleanly below.
            writer.write_status(status);
            while let Some(frame) = body.frame().await {
                match frame {
                    Ok(frame) => {
                        if let Ok(data) = frame.into_data() {
                            if let Err(err) = writer.write(&data) {
                                error!(%err, method = %method, path = %path, "encoding response body failed");
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        error!(%err, method = %method, path = %path, "reading response body failed");
                        break;
                    }
                }
            }
            if let Err(err) = writer.stop() {
                error!(%err, method = %method, path = %path, "closing encoder failed");
            }

            let encoding = writer.content_encoding();
            let compressed_len = writer.output_len();
            let output = writer.take_output();
            let head = writer.take_response_head();
            inner.pool.release(writer);

            let mut head = match head {
                Some(head) => head,
                None => {
                    return plain_text_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!(
                            "[500] internal server error: response writer error: missing response head, method: {method}, path: {path}"
                        ),
                    )
                }
            };
            head.headers
                .insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
            head.headers
                .insert(VARY, HeaderValue::from_static("Accept-Encoding"));
            head.headers
                .insert(CONTENT_LENGTH, HeaderValue::from(compressed_len));
            Response::from_parts(head, full_body(output))
        })
    }
}

/// Header gate: the client must advertise gzip support, and the request
/// must not be a connection upgrade or an event-stream subscription.
fn can_compress_by_header(headers: &HeaderMap) -> bool {
    let header = |name| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
    };

    header(ACCEPT_ENCODING).contains("gzip")
        && !header(CONNECTION).contains("Upgrade")
        && !header(ACCEPT).contains("text/event-stream")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(hyper::header::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn gate_matching_is_case_sensitive() {
        assert!(!can_compress_by_header(&headers(&[(ACCEPT_ENCODING, "GZIP")])));
        assert!(can_compress_by_header(&headers(&[
            (ACCEPT_ENCODING, "gzip"),
            (CONNECTION, "keep-alive"),
        ])));
    }

    #[test]
    fn header_gate_requires_gzip_support() {
        assert!(can_compress_by_header(&headers(&[(ACCEPT_ENCODING, "gzip, br")])));
        assert!(!can_compress_by_header(&headers(&[(ACCEPT_ENCODING, "br")])));
        assert!(!can_compress_by_header(&HeaderMap::new()));
    }

    #[test]
    fn header_gate_rejects_upgrades_and_event_streams() {
        assert!(!can_compress_by_header(&headers(&[
            (ACCEPT_ENCODING, "gzip"),
            (CONNECTION, "Upgrade"),
        ])));
        assert!(!can_compress_by_header(&headers(&[
            (ACCEPT_ENCODING, "gzip"),
            (ACCEPT, "text/event-stream"),
        ])));
    }
}
