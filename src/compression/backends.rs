// SPDX-License-Identifier: MIT
//! Concrete compression backends
//!
//! `NoCompression` and `ZlibBackend` are always compiled in. The Brotli, LZ4
//! and Zstd backends are gated behind cargo features of the same name.

use std::fmt;
use std::io::{Read, Write};

use super::{CompressionError, CompressionType};

/// A compress/decompress pair for one [`CompressionType`]
pub trait CompressionBackend: Send + Sync + fmt::Debug {
    /// Identifier written next to payloads produced by this backend
    fn kind(&self) -> CompressionType;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;
}

/// Pass-through backend
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl CompressionBackend for NoCompression {
    fn kind(&self) -> CompressionType {
        CompressionType::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }
}

/// zlib (DEFLATE) backend
#[derive(Debug, Clone, Copy)]
pub struct ZlibBackend {
    level: flate2::Compression,
}

impl ZlibBackend {
    pub fn new(level: u32) -> Self {
        Self {
            level: flate2::Compression::new(level.min(9)),
        }
    }
}

impl Default for ZlibBackend {
    fn default() -> Self {
        Self {
            level: flate2::Compression::default(),
        }
    }
}

impl CompressionBackend for ZlibBackend {
    fn kind(&self) -> CompressionType {
        CompressionType::Zlib
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        use flate2::write::ZlibEncoder;

        // Text/JSON usually lands around half its size
        let estimated_size = (data.len() / 2).max(256);
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(estimated_size), self.level);
        encoder
            .write_all(data)
            .map_err(|e| CompressionError::compress(self.kind(), e))?;
        encoder
            .finish()
            .map_err(|e| CompressionError::compress(self.kind(), e))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        use flate2::read::ZlibDecoder;

        let mut decompressed = Vec::with_capacity(data.len().saturating_mul(3).max(1024));
        ZlibDecoder::new(data)
            .read_to_end(&mut decompressed)
            .map_err(|e| CompressionError::decompress(self.kind(), e))?;
        Ok(decompressed)
    }
}

/// Brotli backend
#[cfg(feature = "brotli")]
#[derive(Debug, Clone, Copy)]
pub struct BrotliBackend {
    quality: u32,
    lgwin: u32,
}

#[cfg(feature = "brotli")]
impl Default for BrotliBackend {
    fn default() -> Self {
        Self {
            quality: 6,
            lgwin: 22,
        }
    }
}

#[cfg(feature = "brotli")]
impl CompressionBackend for BrotliBackend {
    fn kind(&self) -> CompressionType {
        CompressionType::Brotli
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut compressed = Vec::with_capacity(data.len() / 2);
        {
            // The stream is finalized when the writer is dropped
            let mut writer =
                brotli::CompressorWriter::new(&mut compressed, 4096, self.quality, self.lgwin);
            writer
                .write_all(data)
                .map_err(|e| CompressionError::compress(self.kind(), e))?;
        }
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut decompressed = Vec::new();
        brotli::Decompressor::new(data, 4096)
            .read_to_end(&mut decompressed)
            .map_err(|e| CompressionError::decompress(self.kind(), e))?;
        Ok(decompressed)
    }
}

/// LZ4 frame-format backend
#[cfg(feature = "lz4")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Backend;

#[cfg(feature = "lz4")]
impl CompressionBackend for Lz4Backend {
    fn kind(&self) -> CompressionType {
        CompressionType::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::with_capacity(data.len() / 2));
        encoder
            .write_all(data)
            .map_err(|e| CompressionError::compress(self.kind(), e))?;
        encoder
            .finish()
            .map_err(|e| CompressionError::compress(self.kind(), e))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut decompressed = Vec::new();
        lz4_flex::frame::FrameDecoder::new(data)
            .read_to_end(&mut decompressed)
            .map_err(|e| CompressionError::decompress(self.kind(), e))?;
        Ok(decompressed)
    }
}

/// Zstandard backend
#[cfg(feature = "zstd")]
#[derive(Debug, Clone, Copy)]
pub struct ZstdBackend {
    level: i32,
}

#[cfg(feature = "zstd")]
impl Default for ZstdBackend {
    fn default() -> Self {
        Self { level: 3 }
    }
}

#[cfg(feature = "zstd")]
impl CompressionBackend for ZstdBackend {
    fn kind(&self) -> CompressionType {
        CompressionType::Zstd
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        zstd::encode_all(data, self.level).map_err(|e| CompressionError::compress(self.kind(), e))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        zstd::decode_all(data).map_err(|e| CompressionError::decompress(self.kind(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        br#"{"title":"Harbor map","author":"survey team","tags":["coast","survey"]}"#
            .repeat(40)
    }

    fn assert_round_trip(backend: &dyn CompressionBackend) {
        let data = sample();
        let compressed = backend.compress(&data).unwrap();
        assert_eq!(backend.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_none_is_identity() {
        let data = sample();
        assert_eq!(NoCompression.compress(&data).unwrap(), data);
    }

    #[test]
    fn test_zlib_round_trip_and_shrinks() {
        let backend = ZlibBackend::default();
        assert_round_trip(&backend);
        assert!(backend.compress(&sample()).unwrap().len() < sample().len());
    }

    #[test]
    fn test_zlib_rejects_garbage() {
        let err = ZlibBackend::default()
            .decompress(b"definitely not zlib")
            .unwrap_err();
        assert!(matches!(err, CompressionError::Decompress { kind: CompressionType::Zlib, .. }));
    }

    #[test]
    fn test_zlib_empty_input() {
        let backend = ZlibBackend::new(1);
        let compressed = backend.compress(&[]).unwrap();
        assert!(backend.decompress(&compressed).unwrap().is_empty());
    }

    #[cfg(feature = "brotli")]
    #[test]
    fn test_brotli_round_trip() {
        assert_round_trip(&BrotliBackend::default());
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn test_lz4_round_trip() {
        assert_round_trip(&Lz4Backend);
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn test_zstd_round_trip() {
        assert_round_trip(&ZstdBackend::default());
    }
}
