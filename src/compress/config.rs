use std::collections::HashSet;
use std::sync::Arc;

use super::codec::{CodecWriter, DeflateWriter, GzipWriter};
use crate::chain::{match_all, MatchFn};

pub const NO_COMPRESSION: u32 = 0;
pub const BEST_SPEED: u32 = 1;
pub const DEFAULT_LEVEL: u32 = 6;
pub const BEST_COMPRESSION: u32 = 9;

/// Builds an unbound codec writer for the compressor's pool.
pub type CodecFactory = Arc<dyn Fn(&CompressConfig) -> Box<dyn CodecWriter> + Send + Sync>;

/// The default factory: gzip writers.
pub fn gzip_factory() -> CodecFactory {
    Arc::new(|config: &CompressConfig| -> Box<dyn CodecWriter> {
        Box::new(GzipWriter::new(config.level))
    })
}

pub fn deflate_factory() -> CodecFactory {
    Arc::new(|config: &CompressConfig| -> Box<dyn CodecWriter> {
        Box::new(DeflateWriter::new(config.level))
    })
}

pub struct CompressConfig {
    pub(crate) level: u32,
    pub(crate) ip_whitelist: HashSet<String>,
    pub(crate) match_fn: MatchFn,
    pub(crate) codec_factory: CodecFactory,
}

impl CompressConfig {
    pub fn new() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            ip_whitelist: HashSet::new(),
            match_fn: match_all(),
            codec_factory: gzip_factory(),
        }
    }

    /// Compression level in `[0, 9]`; out-of-range values fall back to
    /// [`DEFAULT_LEVEL`].
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Client IPs whose responses are never compressed. Extends the
    /// current set.
    pub fn with_ip_whitelist<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ip_whitelist.extend(ips.into_iter().map(Into::into));
        self
    }

    /// Requests accepted by this predicate are compressed regardless of
    /// their headers; others still qualify through the header gate.
    pub fn with_match_fn(mut self, match_fn: MatchFn) -> Self {
        self.match_fn = match_fn;
        self
    }

    pub fn with_codec_factory(mut self, codec_factory: CodecFactory) -> Self {
        self.codec_factory = codec_factory;
        self
    }

    /// Clamp out-of-range fields to their defaults.
    pub(crate) fn validated(mut self) -> Self {
        if self.level > BEST_COMPRESSION {
            self.level = DEFAULT_LEVEL;
        }
        self
    }
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self::new()
    }
}
