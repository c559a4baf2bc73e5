//! Screenshot compression before upload.

mod compressor;

pub use compressor::{
    compress, compress_with_encoder, compress_with_retry, compress_with_retry_using,
    CompressedImage, CompressionError, CompressionPolicy, ImageEncoder, JpegImageEncoder,
    DEFAULT_MAX_DIMENSION, DEFAULT_QUALITY,
};

#[cfg(test)]
pub(crate) use compressor::testing;
