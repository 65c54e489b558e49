use bytes::buf::Writer;
use bytes::{BufMut, Bytes, BytesMut};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use hyper::header::CONTENT_LENGTH;
use hyper::http::response::Parts;
use hyper::StatusCode;
use std::io::{self, Write as _};
use std::mem;

pub const GZIP_ENCODING: &str = "gzip";
pub const DEFLATE_ENCODING: &str = "deflate";

/// Response-writer adapter that encodes everything written through it.
///
/// A writer cycles through three states: unbound (idle in the pool, no
/// sink), bound (encoder attached to an output sink and forwarding
/// header edits to a response head), and closed (encoder flushed,
/// output ready to take). [`CodecWriter::discard`] forces a writer back
/// to unbound so it can return to the pool from any point in the
/// cycle.
pub trait CodecWriter: Send {
    /// Attach the encoder to a fresh output sink. Fails if an encoder
    /// is still bound from a previous request.
    fn reset_encoder_sink(&mut self, sink: BytesMut) -> io::Result<()>;

    /// Attach the response head that header rewrites are forwarded to.
    /// Fails if a head from a previous request was never taken back.
    fn reset_response_head(&mut self, head: Parts) -> io::Result<()>;

    /// Record the response status, stripping any stale `Content-Length`.
    fn write_status(&mut self, status: StatusCode);

    /// Encode one chunk. Any `Content-Length` the downstream handler
    /// set is stripped first, since the pre-compression value is wrong
    /// for the wire.
    fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Flush and close the encoder. Idempotent.
    fn stop(&mut self) -> io::Result<()>;

    /// Encoded bytes committed to the sink; final once [`CodecWriter::stop`]
    /// has run.
    fn output_len(&self) -> usize;

    /// Take the encoded output, leaving the writer unbound.
    fn take_output(&mut self) -> Bytes;

    /// Take back the response head installed by
    /// [`CodecWriter::reset_response_head`].
    fn take_response_head(&mut self) -> Option<Parts>;

    /// Drop any half-bound state so the writer can be pooled.
    fn discard(&mut self);

    /// The `Content-Encoding` token this writer produces.
    fn content_encoding(&self) -> &'static str;
}

enum EncoderState<E> {
    Unbound,
    Bound(E),
    Closed(BytesMut),
}

/// [`CodecWriter`] producing a gzip stream.
pub struct GzipWriter {
    level: Compression,
    state: EncoderState<GzEncoder<Writer<BytesMut>>>,
    head: Option<Parts>,
}

impl GzipWriter {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
            state: EncoderState::Unbound,
            head: None,
        }
    }
}

impl CodecWriter for GzipWriter {
    fn reset_encoder_sink(&mut self, sink: BytesMut) -> io::Result<()> {
        if let EncoderState::Bound(_) = self.state {
            return Err(io::Error::other("gzip encoder is still bound to a sink"));
        }
        self.state = EncoderState::Bound(GzEncoder::new(sink.writer(), self.level));
        Ok(())
    }

    fn reset_response_head(&mut self, head: Parts) -> io::Result<()> {
        if self.head.is_some() {
            return Err(io::Error::other("gzip writer still holds a response head"));
        }
        self.head = Some(head);
        Ok(())
    }

    fn write_status(&mut self, status: StatusCode) {
        if let Some(head) = self.head.as_mut() {
            head.headers.remove(CONTENT_LENGTH);
            head.status = status;
        }
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        if let Some(head) = self.head.as_mut() {
            head.headers.remove(CONTENT_LENGTH);
        }
        match self.state {
            EncoderState::Bound(ref mut encoder) => encoder.write_all(chunk),
            _ => Err(io::Error::other("gzip encoder is not bound to a sink")),
        }
    }

    fn stop(&mut self) -> io::Result<()> {
        match mem::replace(&mut self.state, EncoderState::Unbound) {
            EncoderState::Bound(encoder) => {
                let sink = encoder.finish()?;
                self.state = EncoderState::Closed(sink.into_inner());
                Ok(())
            }
            other => {
                self.state = other;
                Ok(())
            }
        }
    }

    fn output_len(&self) -> usize {
        match self.state {
            EncoderState::Closed(ref output) => output.len(),
            _ => 0,
        }
    }

    fn take_output(&mut self) -> Bytes {
        match mem::replace(&mut self.state, EncoderState::Unbound) {
            EncoderState::Closed(output) => output.freeze(),
            other => {
                self.state = other;
                Bytes::new()
            }
        }
    }

    fn take_response_head(&mut self) -> Option<Parts> {
        self.head.take()
    }

    fn discard(&mut self) {
        self.state = EncoderState::Unbound;
        self.head = None;
    }

    fn content_encoding(&self) -> &'static str {
        GZIP_ENCODING
    }
}

/// [`CodecWriter`] producing a raw deflate stream.
pub struct DeflateWriter {
    level: Compression,
    state: EncoderState<DeflateEncoder<Writer<BytesMut>>>,
    head: Option<Parts>,
}

impl DeflateWriter {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
            state: EncoderState::Unbound,
            head: None,
        }
    }
}

impl CodecWriter for DeflateWriter {
    fn reset_encoder_sink(&mut self, sink: BytesMut) -> io::Result<()> {
        if let EncoderState::Bound(_) = self.state {
            return Err(io::Error::other("deflate encoder is still bound to a sink"));
        }
        self.state = EncoderState::Bound(DeflateEncoder::new(sink.writer(), self.level));
        Ok(())
    }

    fn reset_response_head(&mut self, head: Parts) -> io::Result<()> {
        if self.head.is_some() {
            return Err(io::Error::other("deflate writer still holds a response head"));
        }
        self.head = Some(head);
        Ok(())
    }

    fn write_status(&mut self, status: StatusCode) {
        if let Some(head) = self.head.as_mut() {
            head.headers.remove(CONTENT_LENGTH);
            head.status = status;
        }
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        if let Some(head) = self.head.as_mut() {
            head.headers.remove(CONTENT_LENGTH);
        }
        match self.state {
            EncoderState::Bound(ref mut encoder) => encoder.write_all(chunk),
            _ => Err(io::Error::other("deflate encoder is not bound to a sink")),
        }
    }

    fn stop(&mut self) -> io::Result<()> {
        match mem::replace(&mut self.state, EncoderState::Unbound) {
            EncoderState::Bound(encoder) => {
                let sink = encoder.finish()?;
                self.state = EncoderState::Closed(sink.into_inner());
                Ok(())
            }
            other => {
                self.state = other;
                Ok(())
            }
        }
    }

    fn output_len(&self) -> usize {
        match self.state {
            EncoderState::Closed(ref output) => output.len(),
            _ => 0,
        }
    }

    fn take_output(&mut self) -> Bytes {
        match mem::replace(&mut self.state, EncoderState::Unbound) {
            EncoderState::Closed(output) => output.freeze(),
            other => {
                self.state = other;
                Bytes::new()
            }
        }
    }

    fn take_response_head(&mut self) -> Option<Parts> {
        self.head.take()
    }

    fn discard(&mut self) {
        self.state = EncoderState::Unbound;
        self.head = None;
    }

    fn content_encoding(&self) -> &'static str {
        DEFLATE_ENCODING
    }
}
