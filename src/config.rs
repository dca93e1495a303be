// SPDX-License-Identifier: MIT
//! Encoder configuration
//!
//! Defaults match the reference behaviour: fixed zlib for every section, no
//! pyramid, layer deduplication on. [`EncoderConfig::from_env`] overrides
//! individual settings from `K2SH_*` environment variables.

use crate::compression::{AdaptiveConfig, CompressionType};
use crate::error::{ContainerError, Result};
use crate::format::MAX_IMAGE_SIZE;
use crate::pyramid::PyramidConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    /// Let the adaptive selector choose a backend per section
    pub adaptive_compression: bool,
    /// Per-section backends used when adaptive compression is off
    pub metadata_compression: CompressionType,
    pub image_compression: CompressionType,
    pub hotspots_compression: CompressionType,
    pub layers_compression: CompressionType,
    pub adaptive: AdaptiveConfig,
    /// Store the image as a pyramid instead of a single PNG
    pub pyramid_enabled: bool,
    pub pyramid: PyramidConfig,
    /// Store layers with identical content once
    pub deduplicate_layers: bool,
    /// Upscale images below the minimum side length
    pub upscale_small_images: bool,
    /// Largest accepted width or height
    pub max_image_size: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            adaptive_compression: false,
            metadata_compression: CompressionType::Zlib,
            image_compression: CompressionType::Zlib,
            hotspots_compression: CompressionType::Zlib,
            layers_compression: CompressionType::Zlib,
            adaptive: AdaptiveConfig::default(),
            pyramid_enabled: false,
            pyramid: PyramidConfig::default(),
            deduplicate_layers: true,
            upscale_small_images: false,
            max_image_size: MAX_IMAGE_SIZE,
        }
    }
}

impl EncoderConfig {
    /// Defaults overridden by `K2SH_*` environment variables
    ///
    /// Unparseable values fall back to the default for that setting.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (used by `from_env`)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let compression = |key: &str, default: CompressionType| {
            lookup(key)
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };
        let flag = |key: &str, default: bool| lookup(key).and_then(|s| parse_bool(&s)).unwrap_or(default);

        let section_default = compression("K2SH_COMPRESSION", CompressionType::Zlib);

        let pyramid = PyramidConfig {
            levels: lookup("K2SH_PYRAMID_LEVELS")
                .and_then(|s| parse_levels(&s))
                .unwrap_or(defaults.pyramid.levels),
            quality: lookup("K2SH_PYRAMID_QUALITY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pyramid.quality),
            use_ssim: flag("K2SH_PYRAMID_SSIM", defaults.pyramid.use_ssim),
            entropy_threshold: lookup("K2SH_PYRAMID_ENTROPY_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pyramid.entropy_threshold),
            ssim_threshold: lookup("K2SH_PYRAMID_SSIM_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pyramid.ssim_threshold),
            ..defaults.pyramid
        };

        Self {
            adaptive_compression: flag("K2SH_ADAPTIVE_COMPRESSION", defaults.adaptive_compression),
            metadata_compression: compression("K2SH_METADATA_COMPRESSION", section_default),
            image_compression: compression("K2SH_IMAGE_COMPRESSION", section_default),
            hotspots_compression: compression("K2SH_HOTSPOTS_COMPRESSION", section_default),
            layers_compression: compression("K2SH_LAYERS_COMPRESSION", section_default),
            adaptive: AdaptiveConfig {
                large_input_threshold: lookup("K2SH_ADAPTIVE_LARGE_INPUT")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.adaptive.large_input_threshold),
                text_ratio_threshold: lookup("K2SH_ADAPTIVE_TEXT_RATIO")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.adaptive.text_ratio_threshold),
            },
            pyramid_enabled: flag("K2SH_PYRAMID", defaults.pyramid_enabled),
            pyramid,
            deduplicate_layers: flag("K2SH_DEDUP_LAYERS", defaults.deduplicate_layers),
            upscale_small_images: flag("K2SH_UPSCALE_SMALL_IMAGES", defaults.upscale_small_images),
            max_image_size: lookup("K2SH_MAX_IMAGE_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_image_size),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_image_size == 0 || self.max_image_size > MAX_IMAGE_SIZE {
            return Err(ContainerError::validation(format!(
                "K2SH_MAX_IMAGE_SIZE must be between 1 and {}",
                MAX_IMAGE_SIZE
            )));
        }

        let ratio = self.adaptive.text_ratio_threshold;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(ContainerError::validation(format!(
                "K2SH_ADAPTIVE_TEXT_RATIO must be within 0..=1, got {}",
                ratio
            )));
        }

        if self.pyramid_enabled {
            self.pyramid.validate()?;
        }

        Ok(())
    }

    pub fn with_adaptive_compression(mut self, enabled: bool) -> Self {
        self.adaptive_compression = enabled;
        self
    }

    /// Use one backend for every section
    pub fn with_compression(mut self, kind: CompressionType) -> Self {
        self.metadata_compression = kind;
        self.image_compression = kind;
        self.hotspots_compression = kind;
        self.layers_compression = kind;
        self
    }

    pub fn with_pyramid(mut self, enabled: bool) -> Self {
        self.pyramid_enabled = enabled;
        self
    }

    pub fn with_pyramid_config(mut self, pyramid: PyramidConfig) -> Self {
        self.pyramid = pyramid;
        self
    }

    pub fn with_layer_deduplication(mut self, enabled: bool) -> Self {
        self.deduplicate_layers = enabled;
        self
    }

    pub fn with_upscale_small_images(mut self, enabled: bool) -> Self {
        self.upscale_small_images = enabled;
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Comma-separated positive sizes, e.g. `2048,1024,512`
fn parse_levels(value: &str) -> Option<Vec<u32>> {
    let levels: Vec<u32> = value
        .split(',')
        .map(|part| part.trim().parse().ok().filter(|&size: &u32| size > 0))
        .collect::<Option<_>>()?;
    (!levels.is_empty()).then_some(levels)
}
