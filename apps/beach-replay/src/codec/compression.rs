use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::Compressor;
use crate::error::CodecError;
use crate::protocol::CompressionType;

#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Compressor for Passthrough {
    fn kind(&self) -> CompressionType {
        CompressionType::None
    }

    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }

    fn decompress(&self, bytes: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
        if bytes.len() > limit {
            return Err(CodecError::FrameTooLarge {
                size: bytes.len(),
                limit,
            });
        }
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Gzip {
    level: Compression,
}

impl Default for Gzip {
    fn default() -> Self {
        Self {
            level: Compression::fast(),
        }
    }
}

impl Compressor for Gzip {
    fn kind(&self) -> CompressionType {
        CompressionType::Gzip
    }

    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), self.level);
        encoder.write_all(bytes).map_err(CodecError::Compression)?;
        encoder.finish().map_err(CodecError::Compression)
    }

    fn decompress(&self, bytes: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
        let mut decoder = GzDecoder::new(bytes).take(limit as u64 + 1);
        let mut out = Vec::with_capacity(bytes.len().saturating_mul(2).min(limit));
        decoder
            .read_to_end(&mut out)
            .map_err(CodecError::Compression)?;
        if out.len() > limit {
            return Err(CodecError::FrameTooLarge {
                size: out.len(),
                limit,
            });
        }
        Ok(out)
    }
}
