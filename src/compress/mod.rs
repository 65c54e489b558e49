//! Response compression middleware and the gzip/deflate codec writers
//! it pools across requests.

mod codec;
mod config;
mod handler;

pub use codec::{CodecWriter, DeflateWriter, GzipWriter, DEFLATE_ENCODING, GZIP_ENCODING};
pub use config::{
    deflate_factory, gzip_factory, CodecFactory, CompressConfig, BEST_COMPRESSION, BEST_SPEED,
    DEFAULT_LEVEL, NO_COMPRESSION,
};
pub use handler::Compressor;
