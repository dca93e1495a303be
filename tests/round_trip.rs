// SPDX-License-Identifier: MIT
//! Encode/decode round trips across compression types and image layouts

use std::sync::Arc;

use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use serde_json::json;
use tempfile::TempDir;

use k2sh_container::{
    flags, CompressionRegistry, CompressionType, ContainerDecoder, ContainerEncoder,
    DecodedContainer, EncoderConfig, Hotspot, Metadata, PixelFormat, SectionKind, Shape,
};

fn solid_gray(size: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(size, size, Rgb([128, 128, 128])))
}

fn sample_metadata() -> Metadata {
    let mut metadata = Metadata::new("Harbour map", "Survey team");
    metadata.insert("description", "Ferry terminals and piers");
    metadata.insert("tags", json!(["harbour", "transit"]));
    metadata.insert("custom_fields", json!({"revision": 3, "scale": 0.25}));
    metadata
}

/// Encoder populated with one of everything
fn populated_encoder(config: EncoderConfig) -> ContainerEncoder {
    let mut encoder = ContainerEncoder::with_config(config);
    encoder.set_dynamic_image(solid_gray(256)).unwrap();
    encoder.add_metadata(sample_metadata());
    encoder
        .add_hotspot(Shape::rectangle(10.0, 10.0, 60.0, 40.0), json!({"pier": 1}))
        .unwrap();
    encoder
        .add_hotspot(Shape::circle(150.0, 150.0, 20.0), json!({"buoy": "red"}))
        .unwrap();
    encoder
        .add_hotspot_with(
            Hotspot::with_id(
                "terminal",
                Shape::polygon(vec![(80.0, 80.0), (120.0, 80.0), (100.0, 120.0)]),
                json!({"name": "North terminal"}),
            )
            .priority(9)
            .lazy(true),
        )
        .unwrap();
    encoder
        .add_data_layer("timetable", json!({"06:00": ["A", "B"], "07:30": ["C"]}))
        .unwrap();
    encoder
        .add_data_layer("fares", json!({"adult": 4.5, "child": 2.25}))
        .unwrap();
    encoder
}

fn decode(bytes: &[u8]) -> DecodedContainer {
    ContainerDecoder::new().decode_slice(bytes).unwrap()
}

fn assert_model_round_trips(encoder: &ContainerEncoder, decoded: &DecodedContainer) {
    let original = encoder.metadata().unwrap();
    for (key, value) in original.as_map() {
        assert_eq!(decoded.metadata().get(key), Some(value), "metadata field {}", key);
    }
    assert!(decoded.metadata().created_date().is_some());

    let expected: Vec<&Hotspot> = encoder.hotspots().hotspots().collect();
    let actual: Vec<&Hotspot> = decoded.hotspots().iter().collect();
    assert_eq!(actual, expected);

    for id in encoder.data_layers().ids() {
        assert_eq!(
            &decoded.data_layer(id),
            encoder.data_layers().get(id).unwrap().data()
        );
    }

    let base = decoded.base_image().unwrap().unwrap().to_rgb8();
    assert_eq!(base, encoder.image().unwrap().to_rgb8());
}

#[test]
fn test_round_trip_every_compression_type() {
    for &kind in CompressionType::all() {
        for pyramid in [false, true] {
            let config = EncoderConfig::default()
                .with_compression(kind)
                .with_pyramid(pyramid);
            let encoder = populated_encoder(config);
            let bytes = encoder.finalize().unwrap();
            let decoded = decode(&bytes);

            assert_model_round_trips(&encoder, &decoded);
            assert_eq!(decoded.has_pyramid(), pyramid, "{} pyramid={}", kind, pyramid);

            let stats = decoded.stats();
            for section in [SectionKind::Metadata, SectionKind::Hotspots, SectionKind::DataLayers] {
                assert_eq!(stats.section(section).unwrap().compression, Some(kind));
            }
            assert_eq!(
                decoded.header().has_flag(flags::IS_COMPRESSED),
                kind != CompressionType::None
            );
        }
    }
}

#[test]
fn test_round_trip_adaptive() {
    for pyramid in [false, true] {
        let config = EncoderConfig::default()
            .with_adaptive_compression(true)
            .with_pyramid(pyramid);
        let encoder = populated_encoder(config);
        let decoded = decode(&encoder.finalize().unwrap());
        assert_model_round_trips(&encoder, &decoded);
        assert_eq!(decoded.stats().sections.len(), 4);
    }
}

#[test]
fn test_example_scenario() {
    let config = EncoderConfig::default()
        .with_pyramid(true)
        .with_adaptive_compression(true);
    let mut encoder = ContainerEncoder::with_config(config);
    encoder.set_dynamic_image(solid_gray(512)).unwrap();
    encoder.add_metadata(Metadata::new("T", "A"));
    encoder
        .add_hotspot(Shape::rectangle(10.0, 10.0, 100.0, 100.0), json!({"note": "h1"}))
        .unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scenario.k2sh");
    encoder.encode(&path).unwrap();

    let decoded = ContainerDecoder::new().decode_file(&path).unwrap();
    assert_eq!(decoded.metadata().title(), Some("T"));
    assert_eq!(decoded.metadata().author(), Some("A"));

    assert_eq!(decoded.hotspots().len(), 1);
    let hotspot = &decoded.hotspots()[0];
    assert_eq!(hotspot.shape, Shape::rectangle(10.0, 10.0, 100.0, 100.0));
    assert_eq!(hotspot.data, json!({"note": "h1"}));

    let levels = decoded.pyramid_levels();
    assert!(!levels.is_empty());
    assert!(levels.iter().all(|level| level.format == PixelFormat::Png));

    let level0 = decoded.level(0).unwrap();
    let image = level0.to_image().unwrap();
    assert_eq!((image.width(), image.height()), (512, 512));
    assert_eq!(image.to_rgb8().get_pixel(0, 0), &Rgb([128, 128, 128]));
}

#[test]
fn test_file_and_reader_agree() {
    let encoder = populated_encoder(EncoderConfig::default());
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("harbour.k2sh");
    encoder.encode(&path).unwrap();

    let from_file = ContainerDecoder::new().decode_file(&path).unwrap();
    let from_reader = ContainerDecoder::new()
        .decode_reader(std::fs::File::open(&path).unwrap())
        .unwrap();
    assert_eq!(from_file.hotspots(), from_reader.hotspots());
    assert_eq!(from_file.metadata(), from_reader.metadata());
    assert_eq!(from_file.stats(), from_reader.stats());
}

#[test]
fn test_alpha_image_round_trips_with_pyramid() {
    let rgba = RgbaImage::from_fn(300, 200, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 40, 128]));
    let mut encoder = ContainerEncoder::with_config(EncoderConfig::default().with_pyramid(true));
    encoder.set_dynamic_image(DynamicImage::ImageRgba8(rgba.clone())).unwrap();

    let decoded = decode(&encoder.finalize().unwrap());
    assert!(decoded
        .pyramid_levels()
        .iter()
        .all(|level| level.format == PixelFormat::Png));
    assert_eq!(decoded.base_image().unwrap().unwrap().to_rgba8(), rgba);
}

#[test]
fn test_deduplicated_layers_round_trip() {
    let mut encoder = ContainerEncoder::new();
    let content = json!({"zone": "A", "capacity": 40});
    assert_eq!(encoder.add_data_layer("monday", content.clone()).unwrap(), "monday");
    assert_eq!(encoder.add_data_layer("tuesday", content.clone()).unwrap(), "monday");

    let decoded = decode(&encoder.finalize().unwrap());
    assert_eq!(decoded.data_layer("monday"), content);
    assert_eq!(decoded.data_layer("tuesday"), content);
    assert_eq!(decoded.data_layers().canonical_id("tuesday"), Some("monday"));
    assert_eq!(decoded.data_layer("wednesday"), json!({}));
}

#[test]
fn test_layer_ids_keep_insertion_order() {
    let mut encoder = ContainerEncoder::new();
    encoder.add_data_layer("zeta", json!({"n": 1})).unwrap();
    encoder.add_data_layer("alpha", json!({"n": 2})).unwrap();
    encoder.add_data_layer("mid", json!({"n": 1})).unwrap();
    encoder.add_data_layer("beta", json!([3])).unwrap();

    let decoded = decode(&encoder.finalize().unwrap());
    assert_eq!(decoded.data_layer_ids(), vec!["zeta", "alpha", "mid", "beta"]);
    assert_eq!(decoded.data_layers().canonical_id("mid"), Some("zeta"));
}

#[test]
fn test_spatial_index_rebuilt_from_decoded_hotspots() {
    let encoder = populated_encoder(EncoderConfig::default());
    let decoded = decode(&encoder.finalize().unwrap());
    let index = decoded.spatial_index().unwrap();

    assert_eq!(index.point_query(20.0, 20.0).unwrap().data, json!({"pier": 1}));
    assert_eq!(index.point_query(100.0, 95.0).unwrap().id, "terminal");
    assert!(index.point_query(250.0, 10.0).is_none());
}

#[test]
fn test_decoder_without_optional_backends_reads_zlib_files() {
    let encoder = populated_encoder(EncoderConfig::default());
    let bytes = encoder.finalize().unwrap();
    let decoder = ContainerDecoder::with_registry(Arc::new(CompressionRegistry::builtin()));
    let decoded = decoder.decode_slice(&bytes).unwrap();
    assert_model_round_trips(&encoder, &decoded);
}
