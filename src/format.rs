// SPDX-License-Identifier: MIT
//! K2SH on-disk layout
//!
//! Defines the fixed 56-byte header and the constants shared by the encoder
//! and decoder.

use std::io::{Read, Write};

use crate::error::{ContainerError, Result};

/// K2SH format magic bytes
pub const K2SH_MAGIC: &[u8; 4] = b"K2SH";

/// Format version written by this crate
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;

/// Header size in bytes
pub const HEADER_SIZE: usize = 56;

/// Trailing reserved bytes in the header (always written as zero)
pub const RESERVED_SIZE: usize = 14;

/// First payload byte of an image section holding a pyramid container
pub const PYRAMID_MARKER: u8 = 0x7F;

/// Smallest side the encoder upscales to when upscaling is enabled
pub const MIN_IMAGE_SIZE: u32 = 512;

/// Largest accepted side of a base image
pub const MAX_IMAGE_SIZE: u32 = 16384;

/// Feature flags
pub mod flags {
    /// Metadata section present
    pub const HAS_METADATA: u16 = 1 << 0;

    /// Image section present (pyramid container or legacy blob)
    pub const HAS_IMAGE_PYRAMID: u16 = 1 << 1;

    /// Hotspot section present
    pub const HAS_HOTSPOTS: u16 = 1 << 2;

    /// Data layer section present
    pub const HAS_DATA_LAYERS: u16 = 1 << 3;

    /// Reserved for encryption support (not implemented)
    pub const HAS_ENCRYPTION: u16 = 1 << 4;

    /// At least one section uses a compressing backend
    pub const IS_COMPRESSED: u16 = 1 << 5;

    /// Reserved for audio support
    pub const HAS_AUDIO: u16 = 1 << 6;

    /// Reserved for video support
    pub const HAS_VIDEO: u16 = 1 << 7;

    /// Every bit this version knows about
    pub const ALL_KNOWN: u16 = HAS_METADATA
        | HAS_IMAGE_PYRAMID
        | HAS_HOTSPOTS
        | HAS_DATA_LAYERS
        | HAS_ENCRYPTION
        | IS_COMPRESSED
        | HAS_AUDIO
        | HAS_VIDEO;
}

/// Sections of the container, in on-disk order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    /// Document metadata (JSON object)
    Metadata,

    /// Base image or image pyramid
    Image,

    /// Hotspot list (JSON array)
    Hotspots,

    /// Named data layers (JSON object)
    DataLayers,
}

impl SectionKind {
    /// Get all sections in order
    pub fn all() -> &'static [SectionKind] {
        &[
            SectionKind::Metadata,
            SectionKind::Image,
            SectionKind::Hotspots,
            SectionKind::DataLayers,
        ]
    }

    /// Get the name of the section
    pub fn name(&self) -> &'static str {
        match self {
            SectionKind::Metadata => "metadata",
            SectionKind::Image => "image pyramid",
            SectionKind::Hotspots => "hotspot map",
            SectionKind::DataLayers => "data layers",
        }
    }

    /// Feature flag gating the section
    pub fn flag(&self) -> u16 {
        match self {
            SectionKind::Metadata => flags::HAS_METADATA,
            SectionKind::Image => flags::HAS_IMAGE_PYRAMID,
            SectionKind::Hotspots => flags::HAS_HOTSPOTS,
            SectionKind::DataLayers => flags::HAS_DATA_LAYERS,
        }
    }
}

/// K2SH file header (56 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Magic bytes: "K2SH"
    pub magic: [u8; 4],

    pub version_major: u16,
    pub version_minor: u16,

    /// Feature flags, see [`flags`]
    pub flags: u16,

    /// Absolute section offsets; meaningful only when the matching flag is set
    pub metadata_offset: u64,
    pub image_offset: u64,
    pub hotspot_offset: u64,
    pub layers_offset: u64,
}

impl Header {
    /// Create an empty header for the current version
    pub fn new() -> Self {
        Self {
            magic: *K2SH_MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            flags: 0,
            metadata_offset: 0,
            image_offset: 0,
            hotspot_offset: 0,
            layers_offset: 0,
        }
    }

    /// Parse and validate a header from the start of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(ContainerError::validation(format!(
                "Header too small: {} bytes",
                bytes.len()
            )));
        }

        let magic: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != *K2SH_MAGIC {
            return Err(ContainerError::validation(format!(
                "Invalid magic bytes: expected {:?}, got {:?}",
                K2SH_MAGIC, magic
            )));
        }

        let header = Self {
            magic,
            version_major: read_u16(bytes, 4),
            version_minor: read_u16(bytes, 6),
            flags: read_u16(bytes, 8),
            metadata_offset: read_u64(bytes, 10),
            image_offset: read_u64(bytes, 18),
            hotspot_offset: read_u64(bytes, 26),
            layers_offset: read_u64(bytes, 34),
        };

        header.validate()?;
        Ok(header)
    }

    /// Validate the header contents
    pub fn validate(&self) -> Result<()> {
        if self.magic != *K2SH_MAGIC {
            return Err(ContainerError::validation("Invalid magic bytes"));
        }

        if self.version_major > VERSION_MAJOR {
            return Err(ContainerError::validation(format!(
                "Unsupported version: {}.{}",
                self.version_major, self.version_minor
            )));
        }

        if self.flags & !flags::ALL_KNOWN != 0 {
            return Err(ContainerError::validation(format!(
                "Invalid feature flags: {:#06x}",
                self.flags
            )));
        }

        for &section in SectionKind::all() {
            if self.has_flag(section.flag()) && self.section_offset(section) < HEADER_SIZE as u64 {
                return Err(ContainerError::validation(format!(
                    "Invalid {} offset: {}",
                    section.name(),
                    self.section_offset(section)
                )));
            }
        }

        Ok(())
    }

    #[inline]
    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u16) {
        self.flags |= flag;
    }

    pub fn clear_flag(&mut self, flag: u16) {
        self.flags &= !flag;
    }

    /// Whether a section is present
    #[inline]
    pub fn has_section(&self, section: SectionKind) -> bool {
        self.has_flag(section.flag())
    }

    /// Get the offset of a section
    #[inline]
    pub fn section_offset(&self, section: SectionKind) -> u64 {
        match section {
            SectionKind::Metadata => self.metadata_offset,
            SectionKind::Image => self.image_offset,
            SectionKind::Hotspots => self.hotspot_offset,
            SectionKind::DataLayers => self.layers_offset,
        }
    }

    /// Set the offset of a section
    pub fn set_section_offset(&mut self, section: SectionKind, offset: u64) {
        match section {
            SectionKind::Metadata => self.metadata_offset = offset,
            SectionKind::Image => self.image_offset = offset,
            SectionKind::Hotspots => self.hotspot_offset = offset,
            SectionKind::DataLayers => self.layers_offset = offset,
        }
    }

    /// Offsets of every present section
    pub fn section_offsets(&self) -> Vec<(SectionKind, u64)> {
        SectionKind::all()
            .iter()
            .filter(|section| self.has_section(**section))
            .map(|&section| (section, self.section_offset(section)))
            .collect()
    }

    /// Serialize to the fixed 56-byte layout, validating first
    pub fn to_bytes(&self) -> Result<[u8; HEADER_SIZE]> {
        self.validate()?;

        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..6].copy_from_slice(&self.version_major.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.version_minor.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.flags.to_le_bytes());
        bytes[10..18].copy_from_slice(&self.metadata_offset.to_le_bytes());
        bytes[18..26].copy_from_slice(&self.image_offset.to_le_bytes());
        bytes[26..34].copy_from_slice(&self.hotspot_offset.to_le_bytes());
        bytes[34..42].copy_from_slice(&self.layers_offset.to_le_bytes());
        // bytes[42..56] reserved

        Ok(bytes)
    }

    /// Read header from a reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);
        reader.take(HEADER_SIZE as u64).read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// Write header to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes()?)?;
        Ok(())
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

#[inline]
fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// Bound-checked little-endian cursor over a byte slice
///
/// Every read checks the remaining length first and reports truncation as a
/// format error naming `what`.
#[derive(Debug, Clone)]
pub(crate) struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn at(data: &'a [u8], pos: usize) -> Result<Self> {
        if pos > data.len() {
            return Err(ContainerError::format(format!(
                "Offset {} beyond end of data ({} bytes)",
                pos,
                data.len()
            )));
        }
        Ok(Self { data, pos })
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(ContainerError::format(format!(
                "Truncated {}: need {} bytes, {} available",
                what,
                len,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    pub(crate) fn read_u32(&mut self, what: &str) -> Result<u32> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
