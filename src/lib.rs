// SPDX-License-Identifier: MIT
//! # K2SH Container
//!
//! A binary container that bundles an image (or a multi-resolution image
//! pyramid) with document metadata, interactive hotspots and named JSON data
//! layers in a single file.
//!
//! ## Format Overview
//!
//! A fixed 56-byte header carries feature flags and absolute offsets to each
//! section. Sections are optional and individually compressed; the backend
//! used is recorded next to the payload, so a file can mix backends freely.
//!
//! ## Key Features
//!
//! - **Direct Section Access**: header offsets locate every section
//! - **Pluggable Compression**: none, zlib, brotli, lz4 and zstd behind a registry
//! - **Adaptive Selection**: a size and content heuristic picks the backend
//! - **Image Pyramids**: per-level PNG/JPEG choice by entropy and SSIM
//! - **Spatial Hotspots**: grid-indexed point and region queries
//! - **Deduplicated Layers**: identical layer content is stored once
//!
//! ## Format Specification
//!
//! ```text
//! K2SH Format v1.0
//! ================
//!
//! Header (56 bytes, little-endian):
//! - Magic: "K2SH" (4 bytes)
//! - Version major / minor (2 + 2 bytes)
//! - Flags (2 bytes)
//! - Metadata / image / hotspot / layers offsets (4 x 8 bytes)
//! - Reserved (14 bytes, zero)
//!
//! Metadata, hotspot and layer sections:
//! - Length (4 bytes) | compression type (1 byte) | payload
//!
//! Image section:
//! - Length (4 bytes) | payload
//!   payload is a single encoded image, or 0x7F | level count | levels
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use k2sh_container::{ContainerDecoder, ContainerEncoder, Metadata, Shape};
//! use serde_json::json;
//!
//! let mut encoder = ContainerEncoder::new();
//! encoder.add_metadata(Metadata::new("Floor plan", "Survey team"));
//! encoder
//!     .add_hotspot(Shape::rectangle(10.0, 10.0, 110.0, 60.0), json!({"room": "lobby"}))
//!     .unwrap();
//! encoder.add_data_layer("occupancy", json!({"lobby": 12})).unwrap();
//!
//! let bytes = encoder.finalize().unwrap();
//!
//! let container = ContainerDecoder::new().decode_slice(&bytes).unwrap();
//! assert_eq!(container.metadata().title(), Some("Floor plan"));
//! assert_eq!(container.data_layer("occupancy")["lobby"], 12);
//!
//! let index = container.spatial_index().unwrap();
//! assert_eq!(index.point_query(50.0, 30.0).unwrap().data["room"], "lobby");
//! ```

pub mod compression;
pub mod config;
pub mod container;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod format;
pub mod hotspot;
pub mod layers;
pub mod metadata;
pub mod pyramid;

// Re-export main types
pub use compression::{
    AdaptiveConfig, AdaptiveSelector, CompressionBackend, CompressionError, CompressionRegistry,
    CompressionType, DataHint,
};
pub use config::EncoderConfig;
pub use container::{ContainerStats, DecodedContainer, DecodedLevel, ImageData, SectionStats};
pub use decoder::ContainerDecoder;
pub use encoder::ContainerEncoder;
pub use error::{ContainerError, Result};
pub use format::{flags, Header, SectionKind, HEADER_SIZE, K2SH_MAGIC};
pub use hotspot::{BoundingBox, Hotspot, LayoutOrder, Shape, SpatialIndex};
pub use layers::{DataLayer, DataLayerManager, LayerDiff};
pub use metadata::Metadata;
pub use pyramid::{
    ImageCrateEncoder, LevelCompression, PixelEncoder, PixelFormat, PyramidConfig,
    PyramidGenerator, PyramidLevel,
};
