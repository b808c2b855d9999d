//! Shared fixtures for integration tests.

#![allow(dead_code)]

pub mod socket_guard;

use std::io::Cursor;
use std::path::Path;

use acquire_core::EngineConfig;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{Value, json};

/// Engine settings that keep retries and cooldowns in the millisecond range.
pub fn fast_config(downloads_dir: &Path) -> EngineConfig {
    EngineConfig {
        download_workers: 4,
        retry_attempts: 2,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        blocking_cooldown_secs: 0,
        request_timeout_secs: 10,
        connect_timeout_secs: 5,
        downloads_dir: downloads_dir.to_path_buf(),
        ..EngineConfig::default()
    }
}

/// IIIF Presentation 2 manifest whose page `i` lives at `{base}/img/{i}.jpg`.
pub fn v2_manifest(base: &str, pages: usize, pdf_url: Option<&str>) -> Value {
    let canvases: Vec<Value> = (0..pages)
        .map(|i| {
            json!({
                "@id": format!("{base}/canvas/{i}"),
                "@type": "sc:Canvas",
                "images": [{
                    "resource": {"@id": format!("{base}/img/{i}.jpg"), "format": "image/jpeg"}
                }]
            })
        })
        .collect();
    let mut manifest = json!({
        "@context": "http://iiif.io/api/presentation/2/context.json",
        "@id": format!("{base}/iiif/book-1/manifest.json"),
        "label": "Test Book of Hours",
        "sequences": [{"canvases": canvases}]
    });
    if let Some(pdf_url) = pdf_url {
        manifest["rendering"] = json!({"@id": pdf_url, "format": "application/pdf"});
    }
    manifest
}

/// A real baseline JPEG.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

/// A PDF with one embedded JPEG page per image, built through the crate's
/// own assembler.
pub fn pdf_with_pages(pages: usize) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let images: Vec<_> = (0..pages)
        .map(|i| {
            let path = dir.path().join(format!("p{i}.jpg"));
            std::fs::write(&path, jpeg_bytes(64, 96)).unwrap();
            path
        })
        .collect();
    let output = dir.path().join("doc.pdf");
    acquire_core::pdf::generate_pdf_from_images(&images, &output).unwrap();
    std::fs::read(output).unwrap()
}
