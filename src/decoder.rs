// SPDX-License-Identifier: MIT
//! Container decoder
//!
//! Parses the header, then each section the flags announce. Every offset and
//! length is checked against the input before it is used; anything out of
//! range, unknown or unparseable is a format error.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::compression::{CompressionRegistry, CompressionType};
use crate::container::{ContainerStats, DecodedContainer, DecodedLevel, ImageData, SectionStats};
use crate::error::{ContainerError, Result};
use crate::format::{flags, Header, SectionKind, SliceReader};
use crate::hotspot::Hotspot;
use crate::layers::{DataLayerManager, StoredLayers};
use crate::metadata::Metadata;
use crate::pyramid::{decode_blob, is_pyramid};

/// Reader for K2SH containers
#[derive(Debug, Clone)]
pub struct ContainerDecoder {
    registry: Arc<CompressionRegistry>,
}

/// One section's payload after framing, before parsing
struct RawSection<'a> {
    payload: &'a [u8],
    stats: SectionStats,
}

impl ContainerDecoder {
    /// Decoder with every compiled-in backend
    pub fn new() -> Self {
        Self::with_registry(Arc::new(CompressionRegistry::default()))
    }

    pub fn with_registry(registry: Arc<CompressionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CompressionRegistry {
        &self.registry
    }

    /// Decode a container file
    pub fn decode_file(&self, path: impl AsRef<Path>) -> Result<DecodedContainer> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        tracing::debug!("Read {} bytes from {}", data.len(), path.display());
        self.decode_slice(&data)
    }

    /// Decode everything a reader yields
    pub fn decode_reader<R: Read>(&self, mut reader: R) -> Result<DecodedContainer> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.decode_slice(&data)
    }

    /// Decode an in-memory container
    pub fn decode_slice(&self, data: &[u8]) -> Result<DecodedContainer> {
        let header = Header::from_bytes(data)?;
        if header.has_flag(flags::HAS_ENCRYPTION) {
            return Err(ContainerError::format(
                "Encrypted containers are not supported",
            ));
        }

        let mut stats = ContainerStats {
            total_size: data.len() as u64,
            ..ContainerStats::default()
        };

        let metadata = match self.section(data, &header, SectionKind::Metadata)? {
            Some(raw) => {
                let json = self.decompress(&raw)?;
                stats.sections.push(raw.stats);
                Metadata::from_json_bytes(&json)?
            }
            None => Metadata::default(),
        };

        let image = match self.section(data, &header, SectionKind::Image)? {
            Some(raw) => {
                stats.sections.push(raw.stats);
                Some(self.decode_image(raw.payload)?)
            }
            None => None,
        };

        let hotspots: Vec<Hotspot> = match self.section(data, &header, SectionKind::Hotspots)? {
            Some(raw) => {
                let json = self.decompress(&raw)?;
                stats.sections.push(raw.stats);
                serde_json::from_slice(&json).map_err(|e| {
                    ContainerError::format(format!("Failed to unpack hotspots: {}", e))
                })?
            }
            None => Vec::new(),
        };

        let layers = match self.section(data, &header, SectionKind::DataLayers)? {
            Some(raw) => {
                let json = self.decompress(&raw)?;
                stats.sections.push(raw.stats);
                let stored: StoredLayers = serde_json::from_slice(&json)
                    .map_err(|e| {
                        ContainerError::format(format!("Failed to unpack data layers: {}", e))
                    })?;
                DataLayerManager::from_stored(stored)?
            }
            None => DataLayerManager::new(),
        };

        stats.pyramid_levels = match &image {
            Some(ImageData::Pyramid(levels)) => levels.len(),
            _ => 0,
        };
        stats.hotspot_count = hotspots.len();
        stats.data_layer_count = layers.len();

        tracing::debug!(
            "Decoded container: {} sections, {} hotspots, {} data layers",
            stats.sections.len(),
            stats.hotspot_count,
            stats.data_layer_count
        );

        Ok(DecodedContainer {
            header,
            metadata,
            image,
            hotspots,
            layers,
            stats,
        })
    }

    /// Locate and frame a section, if the header announces it
    fn section<'a>(
        &self,
        data: &'a [u8],
        header: &Header,
        kind: SectionKind,
    ) -> Result<Option<RawSection<'a>>> {
        if !header.has_section(kind) {
            return Ok(None);
        }

        let offset = header.section_offset(kind);
        let start = usize::try_from(offset).map_err(|_| {
            ContainerError::format(format!("{} offset {} out of range", kind.name(), offset))
        })?;
        let mut reader = SliceReader::at(data, start)?;

        let length = reader.read_u32(&format!("{} length", kind.name()))? as usize;
        let compression = match kind {
            SectionKind::Image => None,
            _ => Some(CompressionType::try_from(
                reader.read_u8(&format!("{} compression", kind.name()))?,
            )?),
        };
        let payload = reader.take(length, &format!("{} section", kind.name()))?;

        Ok(Some(RawSection {
            payload,
            stats: SectionStats {
                kind,
                offset,
                size: (reader.position() - start) as u64,
                compression,
            },
        }))
    }

    fn decompress(&self, raw: &RawSection<'_>) -> Result<Vec<u8>> {
        let kind = raw.stats.compression.unwrap_or(CompressionType::None);
        Ok(self.registry.decompress(kind, raw.payload)?)
    }

    fn decode_image(&self, payload: &[u8]) -> Result<ImageData> {
        if !is_pyramid(payload) {
            return Ok(ImageData::Legacy(payload.to_vec()));
        }

        let levels = decode_blob(payload)?
            .into_iter()
            .map(|level| {
                let data = level.image_bytes(&self.registry)?;
                Ok(DecodedLevel {
                    level_id: level.level_id,
                    width: level.width,
                    height: level.height,
                    format: level.format,
                    quality: level.quality,
                    compression: level.compression,
                    data,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ImageData::Pyramid(levels))
    }
}

impl Default for ContainerDecoder {
    fn default() -> Self {
        Self::new()
    }
}
