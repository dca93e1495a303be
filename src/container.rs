// SPDX-License-Identifier: MIT
//! Decoded container model
//!
//! Everything here is already decompressed and validated; accessors never
//! touch the original bytes again.

use image::DynamicImage;
use serde_json::{Map, Value};

use crate::compression::CompressionType;
use crate::error::{ContainerError, Result};
use crate::format::{Header, SectionKind};
use crate::hotspot::{Hotspot, SpatialIndex};
use crate::layers::DataLayerManager;
use crate::metadata::Metadata;
use crate::pyramid::PixelFormat;

/// One pyramid level with its encoded pixels decompressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLevel {
    pub level_id: u8,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub quality: u8,
    /// Backend the level was stored with
    pub compression: CompressionType,
    /// PNG, JPEG or WebP bytes
    pub data: Vec<u8>,
}

impl DecodedLevel {
    /// Decode the level's pixels
    pub fn to_image(&self) -> Result<DynamicImage> {
        decode_pixels(&self.data)
    }

    #[inline]
    fn longest_side(&self) -> u32 {
        self.width.max(self.height)
    }
}

/// Contents of the image section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageData {
    /// Single encoded image without pyramid framing
    Legacy(Vec<u8>),
    /// Pyramid levels in stored order
    Pyramid(Vec<DecodedLevel>),
}

/// Where a section sat in the file and how it was stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionStats {
    pub kind: SectionKind,
    pub offset: u64,
    /// Frame size including the length prefix and compression byte
    pub size: u64,
    /// `None` for the image section, which has no section-level compression
    pub compression: Option<CompressionType>,
}

/// Container-level summary
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerStats {
    pub total_size: u64,
    pub sections: Vec<SectionStats>,
    pub pyramid_levels: usize,
    pub hotspot_count: usize,
    pub data_layer_count: usize,
}

impl ContainerStats {
    pub fn section(&self, kind: SectionKind) -> Option<&SectionStats> {
        self.sections.iter().find(|s| s.kind == kind)
    }
}

/// A fully decoded K2SH container
#[derive(Debug, Clone)]
pub struct DecodedContainer {
    pub(crate) header: Header,
    pub(crate) metadata: Metadata,
    pub(crate) image: Option<ImageData>,
    pub(crate) hotspots: Vec<Hotspot>,
    pub(crate) layers: DataLayerManager,
    pub(crate) stats: ContainerStats,
}

impl DecodedContainer {
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Metadata fields; empty when the container has no metadata section
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn has_pyramid(&self) -> bool {
        matches!(self.image, Some(ImageData::Pyramid(_)))
    }

    pub fn image_data(&self) -> Option<&ImageData> {
        self.image.as_ref()
    }

    /// Encoded bytes of the base image
    ///
    /// For a pyramid this is the largest level; ties go to the lowest id.
    pub fn image_bytes(&self) -> Option<&[u8]> {
        match self.image.as_ref()? {
            ImageData::Legacy(bytes) => Some(bytes),
            ImageData::Pyramid(_) => self.base_level().map(|level| level.data.as_slice()),
        }
    }

    /// Decoded pixels of the base image, if there is one
    pub fn base_image(&self) -> Result<Option<DynamicImage>> {
        self.image_bytes().map(decode_pixels).transpose()
    }

    /// Largest pyramid level
    pub fn base_level(&self) -> Option<&DecodedLevel> {
        self.pyramid_levels()
            .iter()
            .min_by_key(|level| (std::cmp::Reverse(level.longest_side()), level.level_id))
    }

    /// Pyramid levels in stored order; empty for a legacy image
    pub fn pyramid_levels(&self) -> &[DecodedLevel] {
        match &self.image {
            Some(ImageData::Pyramid(levels)) => levels,
            _ => &[],
        }
    }

    pub fn level(&self, level_id: u8) -> Option<&DecodedLevel> {
        self.pyramid_levels().iter().find(|l| l.level_id == level_id)
    }

    /// Smallest level whose longest side is at least `min_side`,
    /// or the largest level when none is big enough
    pub fn level_for_size(&self, min_side: u32) -> Option<&DecodedLevel> {
        self.pyramid_levels()
            .iter()
            .filter(|level| level.longest_side() >= min_side)
            .min_by_key(|level| (level.longest_side(), level.level_id))
            .or_else(|| self.base_level())
    }

    pub fn hotspots(&self) -> &[Hotspot] {
        &self.hotspots
    }

    /// Rebuild a spatial index over the decoded hotspots
    pub fn spatial_index(&self) -> Result<SpatialIndex> {
        SpatialIndex::from_hotspots(self.hotspots.iter().cloned())
    }

    /// Layer content; an empty object for unknown ids
    pub fn data_layer(&self, id: &str) -> Value {
        self.layers
            .get(id)
            .map(|layer| layer.data().clone())
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    /// Every readable layer id, aliases included, in the order they were added
    pub fn data_layer_ids(&self) -> Vec<&str> {
        self.layers.ids().collect()
    }

    pub fn data_layers(&self) -> &DataLayerManager {
        &self.layers
    }

    pub fn stats(&self) -> &ContainerStats {
        &self.stats
    }
}

fn decode_pixels(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(ContainerError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn level(level_id: u8, width: u32, height: u32) -> DecodedLevel {
        DecodedLevel {
            level_id,
            width,
            height,
            format: PixelFormat::Png,
            quality: 80,
            compression: CompressionType::None,
            data: vec![level_id],
        }
    }

    fn container(image: Option<ImageData>) -> DecodedContainer {
        let mut layers = DataLayerManager::new();
        layers.add_layer("prices", json!({"a": 1})).unwrap();
        DecodedContainer {
            header: Header::new(),
            metadata: Metadata::default(),
            image,
            hotspots: Vec::new(),
            layers,
            stats: ContainerStats::default(),
        }
    }

    #[test]
    fn test_base_level_is_largest_then_lowest_id() {
        let decoded = container(Some(ImageData::Pyramid(vec![
            level(0, 256, 128),
            level(1, 1024, 512),
            level(2, 512, 1024),
        ])));
        assert_eq!(decoded.base_level().unwrap().level_id, 1);
        assert_eq!(decoded.image_bytes(), Some(&[1u8][..]));
        assert!(decoded.has_pyramid());
    }

    #[test]
    fn test_level_for_size() {
        let decoded = container(Some(ImageData::Pyramid(vec![
            level(0, 1024, 512),
            level(1, 512, 256),
            level(2, 256, 128),
        ])));
        assert_eq!(decoded.level_for_size(300).unwrap().level_id, 1);
        assert_eq!(decoded.level_for_size(100).unwrap().level_id, 2);
        assert_eq!(decoded.level_for_size(5000).unwrap().level_id, 0);
    }

    #[test]
    fn test_legacy_image_has_no_levels() {
        let decoded = container(Some(ImageData::Legacy(vec![7, 8])));
        assert!(decoded.pyramid_levels().is_empty());
        assert_eq!(decoded.image_bytes(), Some(&[7u8, 8][..]));
        assert!(!decoded.has_pyramid());
    }

    #[test]
    fn test_missing_layer_is_empty_object() {
        let decoded = container(None);
        assert_eq!(decoded.data_layer("prices"), json!({"a": 1}));
        assert_eq!(decoded.data_layer("nope"), json!({}));
        assert_eq!(decoded.data_layer_ids(), vec!["prices"]);
        assert!(decoded.base_image().unwrap().is_none());
    }
}
