//! Common test utilities for integration tests
//! Builds synthetic volumes with known annotations and matching image files

#![allow(dead_code)]

use image::{GrayImage, Luma};
use ndarray::{Array3, Array4};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tilefeed::backend::label_image_coordinates;
use tilefeed::{Dataset, MemoryBackend};

/// Synthetic volume with ground truth annotations
#[derive(Clone, Debug)]
pub struct TestVolume {
    pub name: String,
    /// `(c, z, x, y)`
    pub pixels: Array4<f32>,
    /// `(z, x, y)`, 0 where unlabeled
    pub labels: Array3<u32>,
    /// Annotated pixels per label value
    pub label_counts: BTreeMap<u32, usize>,
}

/// A square label blob: label value, centre `(z, x, y)` and half width in x/y
#[derive(Clone, Copy, Debug)]
pub struct Blob {
    pub label: u32,
    pub center: [usize; 3],
    pub radius: usize,
}

pub fn blob(label: u32, center: [usize; 3], radius: usize) -> Blob {
    Blob {
        label,
        center,
        radius,
    }
}

/// Generate a volume with a per-channel gradient and square label blobs
///
/// Pixel `(c, z, x, y)` holds `1000c + 100z + 10x + y`. Later blobs
/// overwrite earlier ones where they overlap; blobs are clipped to the volume.
pub fn generate_volume_with_blobs(
    name: &str,
    channels: usize,
    shape_zxy: [usize; 3],
    blobs: &[Blob],
) -> TestVolume {
    let [nz, nx, ny] = shape_zxy;
    let pixels = Array4::from_shape_fn((channels, nz, nx, ny), |(c, z, x, y)| {
        (1000 * c + 100 * z + 10 * x + y) as f32
    });

    let mut labels = Array3::<u32>::zeros((nz, nx, ny));
    for b in blobs {
        let [z, cx, cy] = b.center;
        let xs = cx.saturating_sub(b.radius)..(cx + b.radius + 1).min(nx);
        for x in xs {
            let ys = cy.saturating_sub(b.radius)..(cy + b.radius + 1).min(ny);
            for y in ys {
                labels[[z, x, y]] = b.label;
            }
        }
    }

    let mut label_counts = BTreeMap::new();
    for &value in labels.iter().filter(|&&v| v != 0) {
        *label_counts.entry(value).or_insert(0) += 1;
    }

    TestVolume {
        name: name.to_string(),
        pixels,
        labels,
        label_counts,
    }
}

pub fn backend_from_volumes(volumes: &[TestVolume]) -> MemoryBackend {
    let mut backend = MemoryBackend::new();
    for v in volumes {
        backend.add_image(v.name.clone(), v.pixels.clone(), label_image_coordinates(&v.labels));
    }
    backend
}

pub fn dataset_from_volumes(volumes: &[TestVolume]) -> Dataset<MemoryBackend> {
    Dataset::new(backend_from_volumes(volumes)).unwrap()
}

/// Two volumes with three labels of different frequency
pub fn standard_volumes() -> Vec<TestVolume> {
    vec![
        generate_volume_with_blobs(
            "first",
            2,
            [1, 20, 16],
            &[blob(1, [0, 5, 5], 2), blob(2, [0, 14, 10], 1)],
        ),
        generate_volume_with_blobs(
            "second",
            2,
            [1, 12, 12],
            &[blob(1, [0, 6, 6], 3), blob(3, [0, 0, 11], 0)],
        ),
    ]
}

/// Write a grayscale image where pixel `(x, y)` is `10x + y`, plus a label
/// image holding `labels` as `(x, y, value)`. Returns both paths.
pub fn write_png_pair(
    dir: &Path,
    name: &str,
    width: u32,
    height: u32,
    labels: &[(u32, u32, u8)],
) -> (PathBuf, PathBuf) {
    let image_path = dir.join(format!("{name}.png"));
    let label_path = dir.join(format!("{name}_labels.png"));

    GrayImage::from_fn(width, height, |x, y| Luma([(10 * x + y) as u8]))
        .save(&image_path)
        .unwrap();
    let mut label_image = GrayImage::new(width, height);
    for &(x, y, value) in labels {
        label_image.put_pixel(x, y, Luma([value]));
    }
    label_image.save(&label_path).unwrap();

    (image_path, label_path)
}
