use crate::backend::ImageBackend;
use crate::error::{TileError, TileResult};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{BTreeMap, BTreeSet};

/// One annotated pixel together with its training weight
#[derive(Clone, Debug, PartialEq)]
pub struct LabelPoint {
    /// Index of the image the point belongs to
    pub image: usize,
    /// Position as (z, x, y)
    pub zxy: [usize; 3],
    pub weight: f32,
}

impl LabelPoint {
    /// Full coordinate as (image, z, x, y)
    pub fn coordinate(&self) -> [usize; 4] {
        [self.image, self.zxy[0], self.zxy[1], self.zxy[2]]
    }
}

/// Annotated points of every label, plus per-image counts.
///
/// Built once from the backend. Point order within a label is the scan order
/// of the images and never changes afterwards; only weights are mutable.
#[derive(Clone, Debug, Default)]
pub struct LabelIndex {
    points: BTreeMap<u32, Vec<LabelPoint>>,
    counts: Vec<BTreeMap<u32, usize>>,
}

impl LabelIndex {
    /// Scan the label annotations of every image of `backend`.
    pub fn scan<B: ImageBackend + ?Sized>(backend: &B) -> TileResult<Self> {
        let image_count = backend.image_count();
        log::info!("Scanning label annotations of {image_count} images...");

        let pb = ProgressBar::new(image_count as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }

        let mut points: BTreeMap<u32, Vec<LabelPoint>> = BTreeMap::new();
        let mut raw_counts = Vec::with_capacity(image_count);
        for image in 0..image_count {
            let coords = backend.load_label_coordinates(image)?;
            let mut image_counts = BTreeMap::new();
            for (label, positions) in coords {
                image_counts.insert(label, positions.len());
                points
                    .entry(label)
                    .or_default()
                    .extend(positions.into_iter().map(|zxy| LabelPoint {
                        image,
                        zxy,
                        weight: 1.0,
                    }));
            }
            raw_counts.push(image_counts);
            pb.inc(1);
        }
        pb.finish_with_message("done");

        // every image lists every label, absent ones with 0
        let counts = raw_counts
            .into_iter()
            .map(|mut image_counts| {
                for label in points.keys() {
                    image_counts.entry(*label).or_insert(0);
                }
                image_counts
            })
            .collect();

        let index = LabelIndex { points, counts };
        log::info!(
            "Found {} annotated pixels in {} labels",
            index.points.values().map(Vec::len).sum::<usize>(),
            index.points.len()
        );
        for (label, pts) in &index.points {
            log::info!("  label {label}: {} pixels", pts.len());
        }
        Ok(index)
    }

    /// All label values, ascending
    pub fn labels(&self) -> Vec<u32> {
        self.points.keys().copied().collect()
    }

    pub fn contains(&self, label: u32) -> bool {
        self.points.contains_key(&label)
    }

    pub fn points(&self, label: u32) -> Option<&[LabelPoint]> {
        self.points.get(&label).map(Vec::as_slice)
    }

    pub fn points_mut(&mut self, label: u32) -> Option<&mut Vec<LabelPoint>> {
        self.points.get_mut(&label)
    }

    /// Per-label counts of one image
    pub fn image_counts(&self, image: usize) -> Option<&BTreeMap<u32, usize>> {
        self.counts.get(image)
    }

    /// Per-label counts over all images
    pub fn total_counts(&self) -> BTreeMap<u32, usize> {
        self.points
            .iter()
            .map(|(label, pts)| (*label, pts.len()))
            .collect()
    }

    /// Coordinates of every label as `(image, z, x, y)` vectors
    pub fn coordinate_map(&self) -> BTreeMap<u32, Vec<Vec<usize>>> {
        self.points
            .iter()
            .map(|(label, pts)| {
                (
                    *label,
                    pts.iter().map(|p| p.coordinate().to_vec()).collect(),
                )
            })
            .collect()
    }
}

/// Check a label coordinate map against the image shapes `(c, z, x, y)`.
///
/// Every point has to be `(image, z, x, y)` with an existing image, lie
/// inside that image, and appear only once per label. The error names the
/// first offending point.
pub fn validate_coordinate_map(
    map: &BTreeMap<u32, Vec<Vec<usize>>>,
    shapes: &[[usize; 4]],
) -> TileResult<()> {
    for (label, coords) in map {
        let mut seen = BTreeSet::new();
        for coord in coords {
            if coord.len() != 4 {
                return Err(TileError::InvalidCoordinateMap(format!(
                    "label {label}: point {coord:?} has {} components, expected 4",
                    coord.len()
                )));
            }
            let Some(shape) = shapes.get(coord[0]) else {
                return Err(TileError::InvalidCoordinateMap(format!(
                    "label {label}: image {} of point {coord:?} does not exist",
                    coord[0]
                )));
            };
            if coord[1..].iter().zip(&shape[1..]).any(|(c, s)| c >= s) {
                return Err(TileError::InvalidCoordinateMap(format!(
                    "label {label}: point {coord:?} outside image of shape {shape:?}"
                )));
            }
            if !seen.insert(coord.as_slice()) {
                return Err(TileError::InvalidCoordinateMap(format!(
                    "label {label}: duplicate point {coord:?}"
                )));
            }
        }
    }
    Ok(())
}
