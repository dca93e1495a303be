// SPDX-License-Identifier: MIT
//! Compression backends, the backend registry and adaptive selection
//!
//! Every compressed section records the [`CompressionType`] that produced
//! it, so one file may mix backends and decoding never needs a hint from
//! the caller.

pub mod adaptive;
pub mod backends;
pub mod registry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ContainerError;

pub use adaptive::{AdaptiveConfig, AdaptiveSelector, DataHint};
pub use backends::CompressionBackend;
pub use registry::CompressionRegistry;

/// Compression type identifiers, stored as one byte per section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionType {
    /// Stored as-is
    None = 0,
    /// DEFLATE with zlib framing; always available
    Zlib = 1,
    /// High-ratio compressor, best on text
    Brotli = 2,
    /// LZ4 frame format (streaming)
    Lz4 = 3,
    /// Large-window compressor for big binary payloads
    Zstd = 4,
}

impl CompressionType {
    /// Get all compression types in id order
    pub fn all() -> &'static [CompressionType] {
        &[
            CompressionType::None,
            CompressionType::Zlib,
            CompressionType::Brotli,
            CompressionType::Lz4,
            CompressionType::Zstd,
        ]
    }

    /// Byte written to the container
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Map a stored byte back to a type
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Zlib),
            2 => Some(Self::Brotli),
            3 => Some(Self::Lz4),
            4 => Some(Self::Zstd),
            _ => None,
        }
    }

    /// Backends that may be missing from a build
    pub fn is_optional(self) -> bool {
        matches!(self, Self::Brotli | Self::Lz4 | Self::Zstd)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Zlib => "zlib",
            Self::Brotli => "brotli",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for CompressionType {
    type Error = ContainerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or_else(|| {
            ContainerError::Format(format!("{} is not a valid compression type", value))
        })
    }
}

impl FromStr for CompressionType {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "zlib" => Ok(Self::Zlib),
            "brotli" => Ok(Self::Brotli),
            "lz4" => Ok(Self::Lz4),
            "zstd" => Ok(Self::Zstd),
            other => Err(ContainerError::Validation(format!(
                "Unknown compression type: {}",
                other
            ))),
        }
    }
}

/// Backend-level compression failures
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("{kind} backend is not available in this build")]
    Unavailable { kind: CompressionType },

    #[error("{kind} compression failed: {message}")]
    Compress {
        kind: CompressionType,
        message: String,
    },

    #[error("{kind} decompression failed: {message}")]
    Decompress {
        kind: CompressionType,
        message: String,
    },

    #[error("Adaptive compression failed: {primary}; fallback also failed: {fallback}")]
    FallbackFailed { primary: String, fallback: String },
}

impl CompressionError {
    pub(crate) fn compress(kind: CompressionType, err: impl fmt::Display) -> Self {
        Self::Compress {
            kind,
            message: err.to_string(),
        }
    }

    pub(crate) fn decompress(kind: CompressionType, err: impl fmt::Display) -> Self {
        Self::Decompress {
            kind,
            message: err.to_string(),
        }
    }
}
