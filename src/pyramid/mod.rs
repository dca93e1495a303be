// SPDX-License-Identifier: MIT
//! Multi-resolution image pyramid
//!
//! The base image is resized to a descending series of longest-side targets.
//! Each level picks its own pixel format: images with alpha stay PNG, busy
//! images (high grayscale entropy) or levels that are near-identical to the
//! previous one (high SSIM) go lossy, everything else stays lossless.

pub mod blob;
pub mod ssim;

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::error::{ImageFormatHint, UnsupportedError, UnsupportedErrorKind};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageError, ImageFormat};

use crate::compression::adaptive::histogram_entropy;
use crate::compression::{AdaptiveSelector, CompressionRegistry, CompressionType, DataHint};
use crate::error::{ContainerError, Result};

pub use blob::{decode_blob, encode_blob, is_pyramid};

/// Pixel encoding of a pyramid level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PixelFormat {
    /// Lossless
    Png = 0,
    /// Legacy lossy
    Jpeg = 1,
    /// Modern lossy
    WebP = 2,
}

impl PixelFormat {
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_lossy(self) -> bool {
        !matches!(self, PixelFormat::Png)
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Png => "PNG",
            PixelFormat::Jpeg => "JPEG",
            PixelFormat::WebP => "WEBP",
        }
    }

    /// Formats to try, in order, when `self` is requested
    fn fallback_chain(self) -> &'static [PixelFormat] {
        match self {
            PixelFormat::WebP => &[PixelFormat::WebP, PixelFormat::Jpeg, PixelFormat::Png],
            PixelFormat::Jpeg => &[PixelFormat::Jpeg, PixelFormat::Png],
            PixelFormat::Png => &[PixelFormat::Png],
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for PixelFormat {
    type Error = ContainerError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PixelFormat::Png),
            1 => Ok(PixelFormat::Jpeg),
            2 => Ok(PixelFormat::WebP),
            other => Err(ContainerError::format(format!(
                "{} is not a valid pixel format",
                other
            ))),
        }
    }
}

/// Pyramid generation settings
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidConfig {
    /// Longest-side targets; sorted descending and deduplicated before use
    pub levels: Vec<u32>,
    /// Explicit per-level formats (by emitted level index); missing entries are PNG.
    /// A lossy entry for an image with alpha is replaced by PNG.
    pub level_formats: Option<Vec<PixelFormat>>,
    /// JPEG/WebP quality, 1..=100
    pub quality: u8,
    pub use_ssim: bool,
    /// Entropy (bits) above which a level goes lossy
    pub entropy_threshold: f64,
    /// SSIM against the previous level at or above which a level goes lossy
    pub ssim_threshold: f64,
    /// Minimum entropy before SSIM may force a lossy level
    pub ssim_min_entropy: f64,
    /// Longest side used by the downsampled SSIM estimator
    pub ssim_downsample: u32,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            levels: vec![2048, 1024, 512, 256],
            level_formats: None,
            quality: 80,
            use_ssim: true,
            entropy_threshold: 5.0,
            ssim_threshold: 0.995,
            ssim_min_entropy: 1.0,
            ssim_downsample: 256,
        }
    }
}

impl PyramidConfig {
    pub fn validate(&self) -> Result<()> {
        if self.levels.is_empty() {
            return Err(ContainerError::validation("Pyramid needs at least one level"));
        }
        if self.levels.iter().any(|&size| size == 0) {
            return Err(ContainerError::validation("Pyramid level sizes must be positive"));
        }
        if self.levels.len() > u8::MAX as usize {
            return Err(ContainerError::validation(format!(
                "Too many pyramid levels: {}",
                self.levels.len()
            )));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(ContainerError::validation(format!(
                "Pyramid quality must be within 1..=100, got {}",
                self.quality
            )));
        }
        if self.ssim_downsample == 0 {
            return Err(ContainerError::validation("SSIM downsample size must be positive"));
        }
        Ok(())
    }

    /// Targets largest first, without duplicates
    pub fn target_sizes(&self) -> Vec<u32> {
        let mut sizes = self.levels.clone();
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        sizes.dedup();
        sizes
    }
}

/// Encodes pixels into a [`PixelFormat`]
///
/// Implementations advertise what they can produce through [`supports`];
/// the generator never asks for an unsupported format.
///
/// [`supports`]: PixelEncoder::supports
pub trait PixelEncoder: Send + Sync + fmt::Debug {
    fn supports(&self, format: PixelFormat) -> bool;

    fn encode(&self, image: &DynamicImage, format: PixelFormat, quality: u8) -> Result<Vec<u8>>;
}

/// PNG and JPEG through the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateEncoder;

impl PixelEncoder for ImageCrateEncoder {
    fn supports(&self, format: PixelFormat) -> bool {
        matches!(format, PixelFormat::Png | PixelFormat::Jpeg)
    }

    fn encode(&self, image: &DynamicImage, format: PixelFormat, quality: u8) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        match format {
            PixelFormat::Png => {
                image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
            }
            PixelFormat::Jpeg => {
                let rgb = image.to_rgb8();
                JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(&rgb)?;
            }
            PixelFormat::WebP => {
                let hint = ImageFormatHint::Exact(ImageFormat::WebP);
                return Err(ImageError::Unsupported(UnsupportedError::from_format_and_kind(
                    hint.clone(),
                    UnsupportedErrorKind::Format(hint),
                ))
                .into());
            }
        }
        Ok(bytes)
    }
}

/// One framed pyramid level as stored on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidLevel {
    pub level_id: u8,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub quality: u8,
    pub compression: CompressionType,
    /// Encoded pixels, compressed with `compression`
    pub payload: Vec<u8>,
}

impl PyramidLevel {
    /// Decompressed PNG/JPEG/WebP bytes
    pub fn image_bytes(&self, registry: &CompressionRegistry) -> Result<Vec<u8>> {
        Ok(registry.decompress(self.compression, &self.payload)?)
    }
}

/// How level payloads are compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelCompression {
    /// Heuristic choice with an image hint
    Adaptive,
    Fixed(CompressionType),
}

/// Builds pyramid levels from a base image
#[derive(Debug, Clone)]
pub struct PyramidGenerator {
    config: PyramidConfig,
    selector: AdaptiveSelector,
    compression: LevelCompression,
    encoder: Arc<dyn PixelEncoder>,
}

impl PyramidGenerator {
    pub fn new(config: PyramidConfig, registry: Arc<CompressionRegistry>) -> Self {
        Self {
            config,
            selector: AdaptiveSelector::new(registry),
            compression: LevelCompression::Adaptive,
            encoder: Arc::new(ImageCrateEncoder),
        }
    }

    pub fn with_compression(mut self, compression: LevelCompression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_selector(mut self, selector: AdaptiveSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn PixelEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn config(&self) -> &PyramidConfig {
        &self.config
    }

    /// Generate every level, largest first
    ///
    /// A target that would repeat the previous level's dimensions is skipped,
    /// as is a level that no format manages to encode. Level ids are assigned
    /// in emission order, so level 0 is always the largest.
    pub fn generate(&self, image: &DynamicImage) -> Result<Vec<PyramidLevel>> {
        self.config.validate()?;

        let mut levels = Vec::new();
        let mut previous: Option<DynamicImage> = None;

        for target in self.config.target_sizes() {
            let level_image = resize_to_longest_side(image, target);
            if let Some(prev) = &previous {
                if prev.width() == level_image.width() && prev.height() == level_image.height() {
                    tracing::debug!(
                        "Skipping pyramid target {}: same size as previous level",
                        target
                    );
                    continue;
                }
            }

            let requested = match &self.config.level_formats {
                Some(formats) => {
                    let format = formats.get(levels.len()).copied().unwrap_or(PixelFormat::Png);
                    if format.is_lossy() && level_image.color().has_alpha() {
                        tracing::warn!(
                            "Pyramid level {} requested {} but the image has alpha; using PNG",
                            levels.len(),
                            format
                        );
                        PixelFormat::Png
                    } else {
                        format
                    }
                }
                None => self.choose_format(&level_image, previous.as_ref()),
            };

            match self.encode_level(&level_image, requested) {
                Some((format, bytes)) => {
                    let (payload, compression) = self.compress(&bytes)?;
                    tracing::debug!(
                        "Pyramid level {}: {}x{} {} ({} -> {} bytes, {})",
                        levels.len(),
                        level_image.width(),
                        level_image.height(),
                        format,
                        bytes.len(),
                        payload.len(),
                        compression
                    );
                    levels.push(PyramidLevel {
                        level_id: levels.len() as u8,
                        width: level_image.width(),
                        height: level_image.height(),
                        format,
                        quality: self.config.quality,
                        compression,
                        payload,
                    });
                }
                None => tracing::warn!(
                    "Skipping pyramid level {}x{}: every encoding failed",
                    level_image.width(),
                    level_image.height()
                ),
            }

            previous = Some(level_image);
        }

        Ok(levels)
    }

    /// Generate and frame the pyramid container
    pub fn generate_blob(&self, image: &DynamicImage) -> Result<Vec<u8>> {
        encode_blob(&self.generate(image)?)
    }

    /// Heuristic format for one level
    pub fn choose_format(&self, level: &DynamicImage, previous: Option<&DynamicImage>) -> PixelFormat {
        if level.color().has_alpha() {
            return PixelFormat::Png;
        }

        let luma = level.to_luma8();
        let entropy = gray_entropy(&luma);

        if self.config.use_ssim {
            if let Some(prev) = previous {
                let prev_luma = imageops::resize(
                    &prev.to_luma8(),
                    luma.width(),
                    luma.height(),
                    FilterType::Triangle,
                );
                if let Some(score) = ssim::ssim(&luma, &prev_luma, self.config.ssim_downsample) {
                    if score >= self.config.ssim_threshold && entropy > self.config.ssim_min_entropy {
                        return self.lossy_format();
                    }
                }
            }
        }

        if entropy > self.config.entropy_threshold {
            self.lossy_format()
        } else {
            PixelFormat::Png
        }
    }

    fn lossy_format(&self) -> PixelFormat {
        if self.encoder.supports(PixelFormat::WebP) {
            PixelFormat::WebP
        } else {
            PixelFormat::Jpeg
        }
    }

    /// Walk the fallback chain; `None` when every format fails
    fn encode_level(&self, image: &DynamicImage, requested: PixelFormat) -> Option<(PixelFormat, Vec<u8>)> {
        for &format in requested.fallback_chain() {
            if !self.encoder.supports(format) {
                continue;
            }
            match self.encoder.encode(image, format, self.config.quality) {
                Ok(bytes) => return Some((format, bytes)),
                Err(e) => tracing::warn!("{} encoding failed, trying next format: {}", format, e),
            }
        }
        None
    }

    fn compress(&self, bytes: &[u8]) -> Result<(Vec<u8>, CompressionType)> {
        match self.compression {
            LevelCompression::Adaptive => Ok(self.selector.compress(bytes, DataHint::Image)?),
            LevelCompression::Fixed(kind) => Ok((self.selector.registry().compress(kind, bytes)?, kind)),
        }
    }
}

/// Resize so the longest side equals `target`, keeping the aspect ratio
///
/// Images already within the target are returned unchanged.
pub fn resize_to_longest_side(image: &DynamicImage, target: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if width.max(height) <= target {
        return image.clone();
    }

    let (new_width, new_height) = if width >= height {
        (target, scale_side(height, target, width))
    } else {
        (scale_side(width, target, height), target)
    };
    image.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

#[inline]
fn scale_side(side: u32, target: u32, longest: u32) -> u32 {
    ((side as u64 * target as u64) / longest as u64).max(1) as u32
}

/// Shannon entropy of an 8-bit grayscale histogram
pub fn gray_entropy(image: &GrayImage) -> f64 {
    let mut histogram = [0u64; 256];
    for pixel in image.as_raw() {
        histogram[*pixel as usize] += 1;
    }
    histogram_entropy(&histogram)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> Arc<CompressionRegistry> {
        Arc::new(CompressionRegistry::builtin())
    }

    fn generator(config: PyramidConfig) -> PyramidGenerator {
        PyramidGenerator::new(config, registry())
    }

    fn solid(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([128, 128, 128])))
    }

    fn noise(width: u32, height: u32) -> DynamicImage {
        let mut state = 7u32;
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |_, _| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let [a, b, c, _] = state.to_le_bytes();
            Rgb([a, b, c])
        }))
    }

    /// Encoder that claims WebP support and fails on selected formats
    #[derive(Debug, Default)]
    struct FakeEncoder {
        fail_webp: bool,
        fail_jpeg: bool,
        fail_png: bool,
        calls: AtomicUsize,
    }

    impl PixelEncoder for FakeEncoder {
        fn supports(&self, _format: PixelFormat) -> bool {
            true
        }

        fn encode(&self, image: &DynamicImage, format: PixelFormat, quality: u8) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let fails = match format {
                PixelFormat::WebP => self.fail_webp,
                PixelFormat::Jpeg => self.fail_jpeg,
                PixelFormat::Png => self.fail_png,
            };
            if fails {
                return Err(ContainerError::format(format!("{} encoder broken", format)));
            }
            match format {
                PixelFormat::WebP => Ok(b"RIFFfake".to_vec()),
                other => ImageCrateEncoder.encode(image, other, quality),
            }
        }
    }

    #[test]
    fn test_pixel_format_bytes() {
        for format in [PixelFormat::Png, PixelFormat::Jpeg, PixelFormat::WebP] {
            assert_eq!(PixelFormat::try_from(format.as_u8()).unwrap(), format);
        }
        assert!(PixelFormat::try_from(3).unwrap_err().is_format());
    }

    #[test]
    fn test_target_sizes_sorted_and_deduplicated() {
        let config = PyramidConfig {
            levels: vec![256, 1024, 256, 2048],
            ..PyramidConfig::default()
        };
        assert_eq!(config.target_sizes(), vec![2048, 1024, 256]);
    }

    #[test]
    fn test_config_validation() {
        assert!(PyramidConfig::default().validate().is_ok());
        let empty = PyramidConfig { levels: vec![], ..PyramidConfig::default() };
        assert!(empty.validate().is_err());
        let zero_quality = PyramidConfig { quality: 0, ..PyramidConfig::default() };
        assert!(zero_quality.validate().is_err());
    }

    #[test]
    fn test_resize_preserves_aspect_ratio() {
        let resized = resize_to_longest_side(&solid(1000, 500), 256);
        assert_eq!((resized.width(), resized.height()), (256, 128));
        let tall = resize_to_longest_side(&solid(300, 900), 300);
        assert_eq!((tall.width(), tall.height()), (100, 300));
        let unchanged = resize_to_longest_side(&solid(100, 80), 256);
        assert_eq!((unchanged.width(), unchanged.height()), (100, 80));
    }

    #[test]
    fn test_solid_gray_levels_are_png_and_monotonic() {
        let levels = generator(PyramidConfig::default()).generate(&solid(512, 512)).unwrap();
        let sizes: Vec<u32> = levels.iter().map(|l| l.width).collect();
        assert_eq!(sizes, vec![512, 256]);
        assert!(levels.iter().all(|l| l.format == PixelFormat::Png));
        assert_eq!(levels[0].level_id, 0);
        assert_eq!(levels[1].level_id, 1);
    }

    #[test]
    fn test_noise_goes_lossy() {
        let gen = generator(PyramidConfig { levels: vec![64], ..PyramidConfig::default() });
        let levels = gen.generate(&noise(64, 64)).unwrap();
        assert_eq!(levels[0].format, PixelFormat::Jpeg);

        let bytes = levels[0].image_bytes(&registry()).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
    }

    #[test]
    fn test_alpha_stays_png() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_fn(64, 64, |x, y| {
            Rgba([(x * 4) as u8, (y * 4) as u8, ((x * y) % 256) as u8, 200])
        }));
        let gen = generator(PyramidConfig { levels: vec![64, 32], ..PyramidConfig::default() });
        let levels = gen.generate(&image).unwrap();
        assert!(levels.iter().all(|l| l.format == PixelFormat::Png));

        let decoded = image::load_from_memory(&levels[0].image_bytes(&registry()).unwrap()).unwrap();
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn test_webp_preferred_when_supported() {
        let gen = generator(PyramidConfig { levels: vec![32], ..PyramidConfig::default() })
            .with_encoder(Arc::new(FakeEncoder::default()));
        let levels = gen.generate(&noise(32, 32)).unwrap();
        assert_eq!(levels[0].format, PixelFormat::WebP);
    }

    #[test]
    fn test_webp_failure_steps_down_to_jpeg_then_png() {
        let gen = generator(PyramidConfig { levels: vec![32], ..PyramidConfig::default() })
            .with_encoder(Arc::new(FakeEncoder { fail_webp: true, ..FakeEncoder::default() }));
        assert_eq!(gen.generate(&noise(32, 32)).unwrap()[0].format, PixelFormat::Jpeg);

        let gen = gen.with_encoder(Arc::new(FakeEncoder {
            fail_webp: true,
            fail_jpeg: true,
            ..FakeEncoder::default()
        }));
        assert_eq!(gen.generate(&noise(32, 32)).unwrap()[0].format, PixelFormat::Png);
    }

    #[test]
    fn test_level_skipped_when_every_encoding_fails() {
        let encoder = Arc::new(FakeEncoder {
            fail_webp: true,
            fail_jpeg: true,
            fail_png: true,
            ..FakeEncoder::default()
        });
        let gen = generator(PyramidConfig { levels: vec![32, 16], ..PyramidConfig::default() })
            .with_encoder(encoder.clone());
        let levels = gen.generate(&noise(32, 32)).unwrap();
        assert!(levels.is_empty());
        assert!(encoder.calls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_explicit_formats_override_heuristic() {
        let config = PyramidConfig {
            levels: vec![64, 32],
            level_formats: Some(vec![PixelFormat::Jpeg]),
            ..PyramidConfig::default()
        };
        let levels = generator(config).generate(&solid(64, 64)).unwrap();
        assert_eq!(levels[0].format, PixelFormat::Jpeg);
        assert_eq!(levels[1].format, PixelFormat::Png);
    }

    #[test]
    fn test_explicit_lossy_format_keeps_alpha() {
        let config = PyramidConfig {
            levels: vec![64, 32],
            level_formats: Some(vec![PixelFormat::Jpeg, PixelFormat::WebP]),
            ..PyramidConfig::default()
        };
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(64, 64, Rgba([9, 8, 7, 100])));
        let levels = generator(config).generate(&image).unwrap();
        assert_eq!(levels.len(), 2);
        assert!(levels.iter().all(|level| level.format == PixelFormat::Png));

        let png = levels[0].image_bytes(&CompressionRegistry::builtin()).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.to_rgba8().get_pixel(3, 3), &Rgba([9, 8, 7, 100]));
    }

    #[test]
    fn test_fixed_compression_recorded_per_level() {
        let gen = generator(PyramidConfig { levels: vec![32], ..PyramidConfig::default() })
            .with_compression(LevelCompression::Fixed(CompressionType::None));
        let levels = gen.generate(&solid(32, 32)).unwrap();
        assert_eq!(levels[0].compression, CompressionType::None);
        assert!(levels[0].payload.starts_with(b"\x89PNG"));
    }

    #[test]
    fn test_ssim_drives_lossy_for_repeated_detail() {
        // Four gray bands: entropy of 2 bits, well under the entropy threshold
        let bands = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 64, |x, _| {
            let v = (x / 16 * 60) as u8;
            Rgb([v, v, v])
        }));
        let gen = generator(PyramidConfig::default());
        assert!((gray_entropy(&bands.to_luma8()) - 2.0).abs() < 1e-9);
        assert_eq!(gen.choose_format(&bands, None), PixelFormat::Png);
        assert_eq!(gen.choose_format(&bands, Some(&bands)), PixelFormat::Jpeg);

        let no_ssim = generator(PyramidConfig { use_ssim: false, ..PyramidConfig::default() });
        assert_eq!(no_ssim.choose_format(&bands, Some(&bands)), PixelFormat::Png);
    }
}
