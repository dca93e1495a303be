// SPDX-License-Identifier: MIT
//! Encode/decode throughput across compression backends

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use image::{DynamicImage, Rgb, RgbImage};
use serde_json::{json, Value};

use k2sh_container::{
    AdaptiveSelector, CompressionRegistry, CompressionType, ContainerDecoder, ContainerEncoder,
    DataHint, EncoderConfig, Metadata, Shape, SpatialIndex,
};

fn create_test_layer() -> Value {
    let rows: Vec<Value> = (0..2_000)
        .map(|i| json!({"id": i, "name": format!("item-{}", i), "price": i as f64 * 1.25}))
        .collect();
    json!({ "rows": rows })
}

fn create_test_image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(1024, 768, |x, y| {
        Rgb([(x / 4) as u8, (y / 3) as u8, ((x + y) / 8) as u8])
    }))
}

fn build_encoder(config: EncoderConfig, image: &DynamicImage, layer: &Value) -> ContainerEncoder {
    let mut encoder = ContainerEncoder::with_config(config);
    encoder.set_dynamic_image(image.clone()).unwrap();
    encoder.add_metadata(Metadata::new("Benchmark", "criterion"));
    for i in 0..50 {
        let x = (i % 10) as f64 * 100.0;
        let y = (i / 10) as f64 * 100.0;
        encoder
            .add_hotspot(Shape::rectangle(x, y, x + 80.0, y + 80.0), json!({ "i": i }))
            .unwrap();
    }
    encoder.add_data_layer("catalogue", layer.clone()).unwrap();
    encoder
}

fn benchmark_section_compression(c: &mut Criterion) {
    let data = serde_json::to_vec(&create_test_layer()).unwrap();
    let registry = CompressionRegistry::default();

    let mut group = c.benchmark_group("compress_layer");
    group.throughput(Throughput::Bytes(data.len() as u64));
    for kind in registry.available() {
        group.bench_with_input(BenchmarkId::from_parameter(kind), &data, |b, data| {
            b.iter(|| registry.compress(kind, black_box(data)).unwrap())
        });
    }
    group.finish();

    let selector = AdaptiveSelector::new(std::sync::Arc::new(CompressionRegistry::default()));
    c.bench_function("adaptive_compress_layer", |b| {
        b.iter(|| selector.compress(black_box(&data), DataHint::Json).unwrap())
    });
}

fn benchmark_encode(c: &mut Criterion) {
    let image = create_test_image();
    let layer = create_test_layer();

    let mut group = c.benchmark_group("encode");
    group.sample_size(10);
    for (name, config) in [
        ("zlib", EncoderConfig::default()),
        ("none", EncoderConfig::default().with_compression(CompressionType::None)),
        ("adaptive", EncoderConfig::default().with_adaptive_compression(true)),
        ("pyramid", EncoderConfig::default().with_pyramid(true)),
    ] {
        let encoder = build_encoder(config, &image, &layer);
        group.bench_function(name, |b| b.iter(|| encoder.finalize().unwrap()));
    }
    group.finish();
}

fn benchmark_decode(c: &mut Criterion) {
    let bytes = build_encoder(
        EncoderConfig::default().with_adaptive_compression(true),
        &create_test_image(),
        &create_test_layer(),
    )
    .finalize()
    .unwrap();
    let decoder = ContainerDecoder::new();

    c.bench_function("decode_adaptive", |b| {
        b.iter(|| decoder.decode_slice(black_box(&bytes)).unwrap())
    });
}

fn benchmark_point_query(c: &mut Criterion) {
    let mut index = SpatialIndex::new();
    for i in 0..10_000 {
        let x = (i % 100) as f64 * 40.0;
        let y = (i / 100) as f64 * 40.0;
        index
            .add(Shape::rectangle(x, y, x + 30.0, y + 30.0), Value::Null)
            .unwrap();
    }

    c.bench_function("point_query_10k", |b| {
        b.iter(|| index.point_query(black_box(2015.0), black_box(1995.0)))
    });
}

criterion_group!(
    benches,
    benchmark_section_compression,
    benchmark_encode,
    benchmark_decode,
    benchmark_point_query
);
criterion_main!(benches);
