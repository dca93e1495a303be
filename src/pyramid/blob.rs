// SPDX-License-Identifier: MIT
//! Pyramid container framing
//!
//! ```text
//! 0x7F | level_count u8 | level*
//! level: level_id u8 | width u32 | height u32 | format u8 | quality u8
//!        | comp_type u8 | comp_len u32 | payload[comp_len]
//! ```

use super::{PixelFormat, PyramidLevel};
use crate::compression::CompressionType;
use crate::error::{ContainerError, Result};
use crate::format::{SliceReader, PYRAMID_MARKER};

/// Fixed bytes preceding each level payload
pub const LEVEL_HEADER_SIZE: usize = 16;

/// True when `bytes` starts with the pyramid marker
#[inline]
pub fn is_pyramid(bytes: &[u8]) -> bool {
    bytes.first() == Some(&PYRAMID_MARKER)
}

/// Frame already-compressed levels into a pyramid container
pub fn encode_blob(levels: &[PyramidLevel]) -> Result<Vec<u8>> {
    let count = u8::try_from(levels.len()).map_err(|_| {
        ContainerError::validation(format!("Too many pyramid levels: {}", levels.len()))
    })?;

    let total: usize = levels
        .iter()
        .map(|level| LEVEL_HEADER_SIZE + level.payload.len())
        .sum();
    let mut blob = Vec::with_capacity(2 + total);
    blob.push(PYRAMID_MARKER);
    blob.push(count);

    for level in levels {
        let payload_len = u32::try_from(level.payload.len()).map_err(|_| {
            ContainerError::validation(format!(
                "Pyramid level {} payload too large: {} bytes",
                level.level_id,
                level.payload.len()
            ))
        })?;
        blob.push(level.level_id);
        blob.extend_from_slice(&level.width.to_le_bytes());
        blob.extend_from_slice(&level.height.to_le_bytes());
        blob.push(level.format.as_u8());
        blob.push(level.quality);
        blob.push(level.compression.as_u8());
        blob.extend_from_slice(&payload_len.to_le_bytes());
        blob.extend_from_slice(&level.payload);
    }

    Ok(blob)
}

/// Parse a pyramid container; payloads stay compressed
pub fn decode_blob(bytes: &[u8]) -> Result<Vec<PyramidLevel>> {
    let mut reader = SliceReader::new(bytes);
    let marker = reader.read_u8("pyramid marker")?;
    if marker != PYRAMID_MARKER {
        return Err(ContainerError::format(format!(
            "Invalid pyramid marker: {:#04x}",
            marker
        )));
    }

    let count = reader.read_u8("pyramid level count")?;
    let mut levels = Vec::with_capacity(count as usize);
    for index in 0..count {
        let level_id = reader.read_u8("pyramid level header")?;
        let width = reader.read_u32("pyramid level header")?;
        let height = reader.read_u32("pyramid level header")?;
        let format = PixelFormat::try_from(reader.read_u8("pyramid level header")?)?;
        let quality = reader.read_u8("pyramid level header")?;
        let compression = CompressionType::try_from(reader.read_u8("pyramid level header")?)?;
        let payload_len = reader.read_u32("pyramid level header")? as usize;
        let payload = reader
            .take(payload_len, &format!("pyramid level {} payload", index))?
            .to_vec();

        levels.push(PyramidLevel {
            level_id,
            width,
            height,
            format,
            quality,
            compression,
            payload,
        });
    }

    if reader.remaining() != 0 {
        tracing::warn!(
            "Ignoring {} trailing bytes after pyramid levels",
            reader.remaining()
        );
    }

    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(level_id: u8, width: u32, payload: &[u8]) -> PyramidLevel {
        PyramidLevel {
            level_id,
            width,
            height: width / 2,
            format: PixelFormat::Png,
            quality: 80,
            compression: CompressionType::None,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_blob_layout() {
        let blob = encode_blob(&[level(0, 1024, b"abc")]).unwrap();
        assert_eq!(blob[0], PYRAMID_MARKER);
        assert_eq!(blob[1], 1);
        assert_eq!(blob[2], 0);
        assert_eq!(&blob[3..7], &1024u32.to_le_bytes());
        assert_eq!(&blob[7..11], &512u32.to_le_bytes());
        assert_eq!(blob[11], 0);
        assert_eq!(blob[12], 80);
        assert_eq!(blob[13], 0);
        assert_eq!(&blob[14..18], &3u32.to_le_bytes());
        assert_eq!(&blob[18..], b"abc");
        assert_eq!(blob.len(), 2 + LEVEL_HEADER_SIZE + 3);
    }

    #[test]
    fn test_blob_parse_back() {
        let levels = vec![level(0, 512, b"first"), level(1, 256, b"")];
        let decoded = decode_blob(&encode_blob(&levels).unwrap()).unwrap();
        assert_eq!(decoded, levels);
        assert!(is_pyramid(&encode_blob(&levels).unwrap()));
        assert!(!is_pyramid(b"\x89PNG"));
    }

    #[test]
    fn test_truncated_level_is_format_error() {
        let blob = encode_blob(&[level(0, 64, b"payload")]).unwrap();
        for cut in [1, 5, blob.len() - 1] {
            assert!(decode_blob(&blob[..cut]).unwrap_err().is_format());
        }
    }

    #[test]
    fn test_unknown_format_and_compression_bytes() {
        let mut blob = encode_blob(&[level(0, 64, b"x")]).unwrap();
        blob[11] = 9;
        assert!(decode_blob(&blob).unwrap_err().is_format());

        let mut blob = encode_blob(&[level(0, 64, b"x")]).unwrap();
        blob[13] = 200;
        assert!(decode_blob(&blob).unwrap_err().is_format());
    }

    #[test]
    fn test_bad_marker() {
        assert!(decode_blob(&[0x10, 0]).unwrap_err().is_format());
        assert!(decode_blob(&[]).unwrap_err().is_format());
    }
}
