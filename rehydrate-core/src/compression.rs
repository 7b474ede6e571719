/*!
Reversible compression for record payloads and compressed envelopes.

Only the gzip member format is produced. Input that does not start with the
gzip magic bytes, or that ends before the trailer, is a codec error; partial
output is never returned.
*/

use crate::{HydrateError, Result};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Byte-level compression used by [`Codec`](crate::Codec) and the envelope serializer
pub trait CompressionAdapter: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Short identifier used in logs
    fn algorithm_name(&self) -> &str;
}

/// DEFLATE in a gzip container
///
/// ```rust
/// use rehydrate_core::compression::{CompressionAdapter, GzipCompressor};
///
/// let gzip = GzipCompressor::with_level(9);
/// let document = br#"{"title":"draft","body":"draft draft draft draft"}"#;
/// let packed = gzip.compress(document)?;
/// assert_eq!(gzip.decompress(&packed)?, document);
/// # Ok::<(), rehydrate_core::HydrateError>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: Compression,
}

impl GzipCompressor {
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    /// Levels above 9 are clamped
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }

    pub fn level(&self) -> u32 {
        self.level.level()
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), self.level);
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| HydrateError::codec(format!("gzip compression failed: {e}")))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if !data.starts_with(&GZIP_MAGIC) {
            return Err(HydrateError::codec("payload is not gzip data"));
        }

        let mut inflated = Vec::with_capacity(data.len() * 2);
        GzDecoder::new(data)
            .read_to_end(&mut inflated)
            .map_err(|e| HydrateError::codec(format!("gzip decompression failed: {e}")))?;
        Ok(inflated)
    }

    fn algorithm_name(&self) -> &str {
        "gzip"
    }
}
