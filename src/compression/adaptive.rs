// SPDX-License-Identifier: MIT
//! Adaptive backend selection
//!
//! Picks a backend from simple data characteristics:
//! - Payload size (large binary blobs favour the large-window backend)
//! - Fraction of printable ASCII (text favours the high-ratio backend)
//! - A coarse hint supplied by the caller (structured data favours LZ4 frames)
//!
//! Only backends present in the registry are considered, and any failure
//! falls back to zlib.

use std::sync::Arc;

use super::{CompressionError, CompressionRegistry, CompressionType};

/// Coarse description of the payload being compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataHint {
    Binary,
    Text,
    Json,
    Structured,
    Image,
}

impl DataHint {
    #[inline]
    fn is_structured(self) -> bool {
        matches!(self, DataHint::Json | DataHint::Structured)
    }
}

/// Selector thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveConfig {
    /// Inputs longer than this prefer zstd
    pub large_input_threshold: usize,
    /// Printable-ASCII fraction above which brotli is preferred
    pub text_ratio_threshold: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            large_input_threshold: 8 * 1024,
            text_ratio_threshold: 0.6,
        }
    }
}

/// Heuristic compressor over a [`CompressionRegistry`]
#[derive(Debug, Clone)]
pub struct AdaptiveSelector {
    registry: Arc<CompressionRegistry>,
    config: AdaptiveConfig,
}

impl AdaptiveSelector {
    pub fn new(registry: Arc<CompressionRegistry>) -> Self {
        Self::with_config(registry, AdaptiveConfig::default())
    }

    pub fn with_config(registry: Arc<CompressionRegistry>, config: AdaptiveConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &CompressionRegistry {
        &self.registry
    }

    /// Pick the preferred backend for `data` without compressing
    pub fn choose(&self, data: &[u8], hint: DataHint) -> CompressionType {
        if self.registry.is_available(CompressionType::Zstd)
            && data.len() > self.config.large_input_threshold
        {
            CompressionType::Zstd
        } else if self.registry.is_available(CompressionType::Brotli)
            && printable_ratio(data) > self.config.text_ratio_threshold
        {
            CompressionType::Brotli
        } else if self.registry.is_available(CompressionType::Lz4) && hint.is_structured() {
            CompressionType::Lz4
        } else {
            CompressionType::Zlib
        }
    }

    /// Compress with the heuristically chosen backend
    ///
    /// Returns the compressed bytes together with the type that actually
    /// produced them. A failing backend is retried with zlib.
    pub fn compress(
        &self,
        data: &[u8],
        hint: DataHint,
    ) -> Result<(Vec<u8>, CompressionType), CompressionError> {
        let chosen = self.choose(data, hint);

        match self.registry.compress(chosen, data) {
            Ok(compressed) => {
                tracing::debug!(
                    "Adaptive compression chose {} ({} -> {} bytes, hint {:?})",
                    chosen,
                    data.len(),
                    compressed.len(),
                    hint
                );
                Ok((compressed, chosen))
            }
            Err(primary) if chosen != CompressionType::Zlib => {
                tracing::warn!("{}; falling back to zlib", primary);
                self.registry
                    .compress(CompressionType::Zlib, data)
                    .map(|compressed| (compressed, CompressionType::Zlib))
                    .map_err(|fallback| CompressionError::FallbackFailed {
                        primary: primary.to_string(),
                        fallback: fallback.to_string(),
                    })
            }
            Err(primary) => Err(CompressionError::FallbackFailed {
                primary: primary.to_string(),
                fallback: "zlib was the primary choice".to_string(),
            }),
        }
    }

    /// Decompress a payload whose type was read from the stream
    pub fn decompress(
        &self,
        data: &[u8],
        kind: CompressionType,
    ) -> Result<Vec<u8>, CompressionError> {
        self.registry.decompress(kind, data)
    }
}

/// Fraction of bytes in the printable ASCII range (0x20..=0x7E)
pub fn printable_ratio(data: &[u8]) -> f64 {
    let printable = data.iter().filter(|&&b| (32..=126).contains(&b)).count();
    printable as f64 / data.len().max(1) as f64
}

/// Shannon entropy (bits per symbol) of a byte histogram
pub fn histogram_entropy(counts: &[u64; 256]) -> f64 {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }

    let total = total as f64;
    counts
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let probability = count as f64 / total;
            -probability * probability.log2()
        })
        .sum()
}

/// Shannon entropy (bits per symbol) of a byte slice
pub fn shannon_entropy(data: &[u8]) -> f64 {
    let mut counts = [0u64; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }
    histogram_entropy(&counts)
}
