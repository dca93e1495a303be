// SPDX-License-Identifier: MIT
//! Basic usage example for K2SH containers
//!
//! Run with `RUST_LOG=k2sh_container=debug` to see per-section decisions.

use image::{DynamicImage, Rgb, RgbImage};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use k2sh_container::{ContainerDecoder, ContainerEncoder, EncoderConfig, Metadata, Shape};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== K2SH Container - Basic Usage ===\n");

    // Step 1: Build the model
    println!("1. Building container model...");
    let config = EncoderConfig::from_env()
        .with_pyramid(true)
        .with_adaptive_compression(true);
    let mut encoder = ContainerEncoder::with_config(config);

    let image = RgbImage::from_fn(1200, 800, |x, y| {
        if (x / 100 + y / 100) % 2 == 0 {
            Rgb([230, 230, 220])
        } else {
            Rgb([40, 60, 90])
        }
    });
    encoder.set_dynamic_image(DynamicImage::ImageRgb8(image))?;

    let mut metadata = Metadata::new("Gallery floor plan", "Facilities");
    metadata.insert("description", "Ground floor with exhibit rooms");
    metadata.insert("tags", json!(["museum", "floor-0"]));
    encoder.add_metadata(metadata);

    let lobby = encoder.add_hotspot(
        Shape::rectangle(50.0, 50.0, 350.0, 250.0),
        json!({"room": "Lobby", "capacity": 120}),
    )?;
    encoder.add_hotspot(
        Shape::circle(700.0, 400.0, 80.0),
        json!({"room": "Rotunda"}),
    )?;
    encoder.add_hotspot(
        Shape::polygon(vec![(900.0, 100.0), (1150.0, 100.0), (1150.0, 500.0)]),
        json!({"room": "East wing"}),
    )?;
    println!("   Hotspots: {}", encoder.hotspots().len());

    let hours = json!({"mon": "closed", "tue": "10-18", "wed": "10-18"});
    encoder.add_data_layer("opening_hours", hours.clone())?;
    let canonical = encoder.add_data_layer("holiday_hours", hours)?;
    println!("   holiday_hours stored as: {}", canonical);

    // Step 2: Encode
    println!("\n2. Encoding...");
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("gallery.k2sh");
    let header = encoder.encode(&path)?;
    println!("   Wrote {} ({} bytes)", path.display(), std::fs::metadata(&path)?.len());
    for (section, offset) in header.section_offsets() {
        println!("   {:<14} @ {}", section.name(), offset);
    }

    // Step 3: Decode
    println!("\n3. Decoding...");
    let container = ContainerDecoder::new().decode_file(&path)?;
    println!("   Title: {:?}", container.metadata().title());
    for level in container.pyramid_levels() {
        println!(
            "   Level {}: {}x{} {} ({})",
            level.level_id, level.width, level.height, level.format, level.compression
        );
    }
    for section in &container.stats().sections {
        println!(
            "   {:<14} {:>8} bytes {}",
            section.kind.name(),
            section.size,
            section.compression.map(|c| c.name()).unwrap_or("-")
        );
    }

    // Step 4: Query
    println!("\n4. Querying...");
    let index = container.spatial_index()?;
    if let Some(hit) = index.point_query(100.0, 100.0) {
        println!("   (100, 100) -> {} (lobby: {})", hit.data["room"], hit.id == lobby);
    }
    println!("   holiday_hours: {}", container.data_layer("holiday_hours"));
    println!("   missing layer: {}", container.data_layer("nope"));

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
