// SPDX-License-Identifier: MIT
//! Container encoder
//!
//! Builds the in-memory model, then writes it in one pass:
//!
//! 1. Every section is serialized and compressed into memory; any
//!    validation failure surfaces here, before a byte is written.
//! 2. A zeroed header placeholder is written, followed by the framed
//!    sections. Offsets come from the writer's stream position.
//! 3. The header is filled in and written back over the placeholder.

use std::fs::File;
use std::io::{BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use image::imageops::FilterType;
use image::DynamicImage;
use serde_json::Value;

use crate::compression::{AdaptiveSelector, CompressionRegistry, CompressionType, DataHint};
use crate::config::EncoderConfig;
use crate::error::{ContainerError, Result};
use crate::format::{flags, Header, SectionKind, HEADER_SIZE, MIN_IMAGE_SIZE};
use crate::hotspot::{Hotspot, Shape, SpatialIndex};
use crate::layers::DataLayerManager;
use crate::metadata::Metadata;
use crate::pyramid::{
    encode_blob, ImageCrateEncoder, LevelCompression, PixelEncoder, PixelFormat, PyramidGenerator,
};

/// One serialized section, ready to be written
#[derive(Debug)]
struct PreparedSection {
    kind: SectionKind,
    /// `None` for the image section, which carries no compression byte
    compression: Option<CompressionType>,
    payload: Vec<u8>,
    /// Any backend other than none was used inside this section
    compressed: bool,
}

/// Builder for K2SH containers
#[derive(Debug)]
pub struct ContainerEncoder {
    config: EncoderConfig,
    registry: Arc<CompressionRegistry>,
    pixel_encoder: Arc<dyn PixelEncoder>,
    metadata: Option<Metadata>,
    image: Option<DynamicImage>,
    hotspots: SpatialIndex,
    layers: DataLayerManager,
}

impl ContainerEncoder {
    /// Encoder with default configuration and every compiled-in backend
    pub fn new() -> Self {
        Self::with_config(EncoderConfig::default())
    }

    pub fn with_config(config: EncoderConfig) -> Self {
        let layers = DataLayerManager::with_deduplication(config.deduplicate_layers);
        Self {
            config,
            registry: Arc::new(CompressionRegistry::default()),
            pixel_encoder: Arc::new(ImageCrateEncoder),
            metadata: None,
            image: None,
            hotspots: SpatialIndex::new(),
            layers,
        }
    }

    /// Use a specific backend registry
    pub fn with_registry(mut self, registry: Arc<CompressionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Use a specific pixel encoder for the image section
    pub fn with_pixel_encoder(mut self, encoder: Arc<dyn PixelEncoder>) -> Self {
        self.pixel_encoder = encoder;
        self
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Load the base image from a file
    pub fn set_image(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let image = image::open(path.as_ref())?;
        self.set_dynamic_image(image)
    }

    /// Load the base image from encoded bytes (PNG, JPEG, ...)
    pub fn set_image_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let image = image::load_from_memory(bytes)?;
        self.set_dynamic_image(image)
    }

    /// Set the base image, normalized to 8-bit RGB or RGBA
    pub fn set_dynamic_image(&mut self, image: DynamicImage) -> Result<()> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(ContainerError::validation(format!(
                "Image has no pixels: {}x{}",
                width, height
            )));
        }
        if width > self.config.max_image_size || height > self.config.max_image_size {
            return Err(ContainerError::validation(format!(
                "Image too large: {}x{} exceeds max {}",
                width, height, self.config.max_image_size
            )));
        }

        let mut image = normalize_pixels(image);
        if self.config.upscale_small_images && (width < MIN_IMAGE_SIZE || height < MIN_IMAGE_SIZE) {
            let (target_width, target_height) = (width.max(MIN_IMAGE_SIZE), height.max(MIN_IMAGE_SIZE));
            tracing::debug!(
                "Upscaling {}x{} image to {}x{}",
                width,
                height,
                target_width,
                target_height
            );
            image = image.resize_exact(target_width, target_height, FilterType::Lanczos3);
        }

        self.image = Some(image);
        Ok(())
    }

    pub fn image(&self) -> Option<&DynamicImage> {
        self.image.as_ref()
    }

    /// Merge metadata fields, overwriting existing keys
    pub fn add_metadata(&mut self, metadata: Metadata) {
        match &mut self.metadata {
            Some(existing) => existing.update(metadata.into_map()),
            None => self.metadata = Some(metadata),
        }
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Add a hotspot with a generated id
    pub fn add_hotspot(&mut self, shape: Shape, data: Value) -> Result<String> {
        self.hotspots.add(shape, data)
    }

    /// Add a fully specified hotspot
    pub fn add_hotspot_with(&mut self, hotspot: Hotspot) -> Result<()> {
        self.hotspots.insert(hotspot)
    }

    pub fn hotspots(&self) -> &SpatialIndex {
        &self.hotspots
    }

    /// Mutable access for reordering or removal before encoding
    pub fn hotspots_mut(&mut self) -> &mut SpatialIndex {
        &mut self.hotspots
    }

    /// Add a data layer; returns the id that stores its content
    pub fn add_data_layer(&mut self, id: impl Into<String>, data: Value) -> Result<String> {
        self.layers.add_layer(id, data)
    }

    pub fn data_layers(&self) -> &DataLayerManager {
        &self.layers
    }

    /// Check the model without writing anything
    pub fn validate(&self) -> Result<()> {
        self.config.validate()?;
        if let Some(metadata) = &self.metadata {
            metadata.validate()?;
        }
        Ok(())
    }

    /// Encode to a file
    pub fn encode(&self, path: impl AsRef<Path>) -> Result<Header> {
        let path = path.as_ref();
        // Prepare first so a validation failure leaves no partial file behind
        let sections = self.prepare_sections()?;
        let mut writer = BufWriter::new(File::create(path)?);
        let header = write_sections(&mut writer, &sections)?;
        writer.flush()?;
        tracing::debug!("Wrote container to {}", path.display());
        Ok(header)
    }

    /// Encode into any seekable writer, starting at its current position
    pub fn write_to<W: Write + Seek>(&self, writer: &mut W) -> Result<Header> {
        let sections = self.prepare_sections()?;
        write_sections(writer, &sections)
    }

    /// Encode into a new byte buffer
    pub fn finalize(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.write_to(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    fn selector(&self) -> AdaptiveSelector {
        AdaptiveSelector::with_config(self.registry.clone(), self.config.adaptive)
    }

    fn prepare_sections(&self) -> Result<Vec<PreparedSection>> {
        self.validate()?;
        let selector = self.selector();
        let mut sections = Vec::with_capacity(SectionKind::all().len());

        if let Some(metadata) = &self.metadata {
            let mut metadata = metadata.clone();
            metadata.normalize()?;
            let json = metadata.to_json_bytes()?;
            sections.push(self.compress_section(
                &selector,
                SectionKind::Metadata,
                &json,
                self.config.metadata_compression,
            )?);
        }

        if let Some(image) = &self.image {
            sections.push(self.prepare_image(&selector, image)?);
            for warning in self.hotspots.validate_against(image.width(), image.height()) {
                tracing::warn!("{}", warning);
            }
        }

        if !self.hotspots.is_empty() {
            let hotspots: Vec<&Hotspot> = self.hotspots.hotspots().collect();
            let json = serde_json::to_vec(&hotspots).map_err(|e| {
                ContainerError::validation(format!("Hotspots are not serializable: {}", e))
            })?;
            sections.push(self.compress_section(
                &selector,
                SectionKind::Hotspots,
                &json,
                self.config.hotspots_compression,
            )?);
        }

        if !self.layers.is_empty() {
            let json = serde_json::to_vec(&self.layers.to_stored()).map_err(|e| {
                ContainerError::validation(format!("Data layers are not serializable: {}", e))
            })?;
            sections.push(self.compress_section(
                &selector,
                SectionKind::DataLayers,
                &json,
                self.config.layers_compression,
            )?);
        }

        Ok(sections)
    }

    fn compress_section(
        &self,
        selector: &AdaptiveSelector,
        kind: SectionKind,
        data: &[u8],
        fixed: CompressionType,
    ) -> Result<PreparedSection> {
        let (payload, compression) = if self.config.adaptive_compression {
            selector.compress(data, DataHint::Json)?
        } else {
            (self.registry.compress(fixed, data)?, fixed)
        };

        Ok(PreparedSection {
            kind,
            compression: Some(compression),
            compressed: compression != CompressionType::None,
            payload,
        })
    }

    fn prepare_image(&self, selector: &AdaptiveSelector, image: &DynamicImage) -> Result<PreparedSection> {
        if self.config.pyramid_enabled {
            let compression = if self.config.adaptive_compression {
                LevelCompression::Adaptive
            } else {
                LevelCompression::Fixed(self.config.image_compression)
            };
            let generator = PyramidGenerator::new(self.config.pyramid.clone(), self.registry.clone())
                .with_selector(selector.clone())
                .with_compression(compression)
                .with_encoder(self.pixel_encoder.clone());

            let levels = generator.generate(image)?;
            if !levels.is_empty() {
                let compressed = levels
                    .iter()
                    .any(|level| level.compression != CompressionType::None);
                return Ok(PreparedSection {
                    kind: SectionKind::Image,
                    compression: None,
                    payload: encode_blob(&levels)?,
                    compressed,
                });
            }
            tracing::warn!("Every pyramid level failed to encode; storing a single PNG instead");
        }

        let payload = self.pixel_encoder.encode(image, PixelFormat::Png, 100)?;
        Ok(PreparedSection {
            kind: SectionKind::Image,
            compression: None,
            payload,
            compressed: false,
        })
    }
}

impl Default for ContainerEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_pixels(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image,
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

fn write_sections<W: Write + Seek>(writer: &mut W, sections: &[PreparedSection]) -> Result<Header> {
    let start = writer.stream_position()?;
    writer.write_all(&[0u8; HEADER_SIZE])?;

    let mut header = Header::new();
    for section in sections {
        let payload_len = u32::try_from(section.payload.len()).map_err(|_| {
            ContainerError::validation(format!(
                "{} section too large: {} bytes",
                section.kind.name(),
                section.payload.len()
            ))
        })?;

        let offset = writer.stream_position()? - start;
        writer.write_all(&payload_len.to_le_bytes())?;
        if let Some(compression) = section.compression {
            writer.write_all(&[compression.as_u8()])?;
        }
        writer.write_all(&section.payload)?;

        header.set_flag(section.kind.flag());
        header.set_section_offset(section.kind, offset);
        if section.compressed {
            header.set_flag(flags::IS_COMPRESSED);
        }

        tracing::debug!(
            "Wrote {} section at offset {} ({} bytes, {})",
            section.kind.name(),
            offset,
            section.payload.len(),
            section
                .compression
                .map(|c| c.name())
                .unwrap_or("framed")
        );
    }

    let end = writer.stream_position()?;
    writer.seek(SeekFrom::Start(start))?;
    header.write_to(writer)?;
    writer.seek(SeekFrom::Start(end))?;

    Ok(header)
}
