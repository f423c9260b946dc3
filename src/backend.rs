//! Image sources the dataset reads from and writes predictions to.

use crate::error::{check_arity, TileError, TileResult};
use crate::store::{clipped_extent, ProbMapStore};
use image::{DynamicImage, ImageBuffer, Pixel};
use ndarray::{s, Array3, Array4, ArrayView3, Axis};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Annotated `(z, x, y)` positions per label value of one image.
pub type LabelCoordinates = BTreeMap<u32, Vec<[usize; 3]>>;

/// Storage the dataset is built on.
///
/// Images are `(channel, z, x, y)` arrays addressed by index. Label
/// annotations are sparse `(z, x, y)` positions per label value.
pub trait ImageBackend {
    fn image_count(&self) -> usize;

    /// Shape `(c, z, x, y)` of an image
    fn image_shape(&self, index: usize) -> TileResult<[usize; 4]>;

    fn image_name(&self, index: usize) -> String {
        format!("image_{index}")
    }

    fn load_image(&self, index: usize) -> TileResult<Cow<'_, Array4<f32>>>;

    /// Annotated positions per label, in scan order.
    fn load_label_coordinates(&self, index: usize) -> TileResult<LabelCoordinates>;

    /// Merge a `(z, x, y)` block into the probability map of `image`/`label`
    /// at `pos`, creating a zero-filled map first if there is none.
    fn save_tile(
        &mut self,
        tile: ArrayView3<'_, f32>,
        image: usize,
        label: u32,
        pos: [usize; 3],
    ) -> TileResult<()>;
}

struct StoredImage {
    name: String,
    pixels: Array4<f32>,
    labels: LabelCoordinates,
}

/// Backend holding all images in memory.
///
/// Probability maps are kept in memory too unless a [`ProbMapStore`] is
/// attached with [`MemoryBackend::with_store`].
#[derive(Default)]
pub struct MemoryBackend {
    images: Vec<StoredImage>,
    probmaps: BTreeMap<(usize, u32), Array3<f32>>,
    store: Option<ProbMapStore>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write probability maps to `store` instead of keeping them in memory.
    pub fn with_store(mut self, store: ProbMapStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Add an image with explicit annotations, returns its index.
    pub fn add_image(
        &mut self,
        name: impl Into<String>,
        pixels: Array4<f32>,
        labels: LabelCoordinates,
    ) -> usize {
        self.images.push(StoredImage {
            name: name.into(),
            pixels,
            labels,
        });
        self.images.len() - 1
    }

    /// Add an image annotated by a `(z, x, y)` label image; every nonzero
    /// value is a label.
    pub fn add_labeled_image(
        &mut self,
        name: impl Into<String>,
        pixels: Array4<f32>,
        label_image: &Array3<u32>,
    ) -> TileResult<usize> {
        let spatial = &pixels.shape()[1..];
        if spatial != label_image.shape() {
            return Err(TileError::InvalidCoordinateMap(format!(
                "label image shape {:?} does not match image shape {:?}",
                label_image.shape(),
                spatial
            )));
        }
        Ok(self.add_image(name, pixels, label_image_coordinates(label_image)))
    }

    /// Load image files, each optionally paired with a label image.
    ///
    /// Every file is one z-slice; colour channels become image channels.
    pub fn from_image_files<P: AsRef<Path>>(files: &[(P, Option<P>)]) -> TileResult<Self> {
        let mut backend = MemoryBackend::new();
        for (image_path, label_path) in files {
            let image_path = image_path.as_ref();
            let pixels = image_to_array(&open_image(image_path)?);

            let labels = match label_path {
                Some(label_path) => {
                    let label_path = label_path.as_ref();
                    let label_pixels = image_to_array(&open_image(label_path)?);
                    let label_image = label_pixels
                        .index_axis(Axis(0), 0)
                        .mapv(|v| v.round().max(0.0) as u32);
                    if label_image.shape() != &pixels.shape()[1..] {
                        return Err(TileError::InvalidCoordinateMap(format!(
                            "label image {} does not match the size of {}",
                            label_path.display(),
                            image_path.display()
                        )));
                    }
                    label_image_coordinates(&label_image)
                }
                None => LabelCoordinates::new(),
            };

            let name = image_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("image_{}", backend.images.len()));
            log::debug!(
                "loaded {} with shape {:?} and {} labels",
                image_path.display(),
                pixels.shape(),
                labels.len()
            );
            backend.add_image(name, pixels, labels);
        }
        Ok(backend)
    }

    /// In-memory probability map, if anything was saved for it.
    pub fn probability_map(&self, image: usize, label: u32) -> Option<&Array3<f32>> {
        self.probmaps.get(&(image, label))
    }

    fn stored(&self, index: usize) -> TileResult<&StoredImage> {
        self.images.get(index).ok_or(TileError::ImageIndex {
            index,
            count: self.images.len(),
        })
    }
}

impl ImageBackend for MemoryBackend {
    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn image_shape(&self, index: usize) -> TileResult<[usize; 4]> {
        let dims = self.stored(index)?.pixels.dim();
        Ok([dims.0, dims.1, dims.2, dims.3])
    }

    fn image_name(&self, index: usize) -> String {
        self.images
            .get(index)
            .map(|img| img.name.clone())
            .unwrap_or_else(|| format!("image_{index}"))
    }

    fn load_image(&self, index: usize) -> TileResult<Cow<'_, Array4<f32>>> {
        Ok(Cow::Borrowed(&self.stored(index)?.pixels))
    }

    fn load_label_coordinates(&self, index: usize) -> TileResult<LabelCoordinates> {
        Ok(self.stored(index)?.labels.clone())
    }

    fn save_tile(
        &mut self,
        tile: ArrayView3<'_, f32>,
        image: usize,
        label: u32,
        pos: [usize; 3],
    ) -> TileResult<()> {
        let [_, z, x, y] = self.image_shape(image)?;
        let shape = [z, x, y];

        if let Some(store) = &self.store {
            let name = self.image_name(image);
            return store.write_tile(&name, label, shape, tile, pos);
        }

        let extent = clipped_extent(shape, pos, tile.shape());
        if extent.contains(&0) {
            return Ok(());
        }
        let map = self
            .probmaps
            .entry((image, label))
            .or_insert_with(|| Array3::zeros((z, x, y)));
        map.slice_mut(s![
            pos[0]..pos[0] + extent[0],
            pos[1]..pos[1] + extent[1],
            pos[2]..pos[2] + extent[2]
        ])
        .assign(&tile.slice(s![..extent[0], ..extent[1], ..extent[2]]));
        Ok(())
    }
}

/// Nonzero cells of a label image grouped by value, in `(z, x, y)` scan order.
pub fn label_image_coordinates(label_image: &Array3<u32>) -> LabelCoordinates {
    let mut coords = LabelCoordinates::new();
    for ((z, x, y), &value) in label_image.indexed_iter() {
        if value != 0 {
            coords.entry(value).or_default().push([z, x, y]);
        }
    }
    coords
}

fn open_image(path: &Path) -> TileResult<DynamicImage> {
    image::open(path).map_err(|source| TileError::Image {
        path: PathBuf::from(path),
        source,
    })
}

fn buffer_to_array<P>(buf: &ImageBuffer<P, Vec<P::Subpixel>>) -> Array4<f32>
where
    P: Pixel,
    P::Subpixel: Into<f32>,
{
    let (width, height) = buf.dimensions();
    let channels = P::CHANNEL_COUNT as usize;
    Array4::from_shape_fn((channels, 1, width as usize, height as usize), |(c, _, x, y)| {
        buf.get_pixel(x as u32, y as u32).channels()[c].into()
    })
}

/// Decoded image as `(c, 1, width, height)` with raw sample values.
pub fn image_to_array(img: &DynamicImage) -> Array4<f32> {
    match img {
        DynamicImage::ImageLuma8(buf) => buffer_to_array(buf),
        DynamicImage::ImageLumaA8(buf) => buffer_to_array(buf),
        DynamicImage::ImageRgb8(buf) => buffer_to_array(buf),
        DynamicImage::ImageRgba8(buf) => buffer_to_array(buf),
        DynamicImage::ImageLuma16(buf) => buffer_to_array(buf),
        DynamicImage::ImageLumaA16(buf) => buffer_to_array(buf),
        DynamicImage::ImageRgb16(buf) => buffer_to_array(buf),
        DynamicImage::ImageRgba16(buf) => buffer_to_array(buf),
        DynamicImage::ImageRgb32F(buf) => buffer_to_array(buf),
        DynamicImage::ImageRgba32F(buf) => buffer_to_array(buf),
        other => buffer_to_array(&other.to_rgba32f()),
    }
}

/// Fails unless `shape` has the `(c, z, x, y)` layout of `expected`.
pub(crate) fn check_spatial(shape: &[usize], expected: &[usize; 4]) -> TileResult<()> {
    check_arity("image", 4, shape.len())?;
    if shape != expected {
        return Err(TileError::InvalidConfig(format!(
            "loaded image has shape {shape:?}, backend reported {expected:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn test_label_image_coordinates_scan_order() {
        let mut labels = Array3::<u32>::zeros((1, 3, 2));
        labels[[0, 2, 1]] = 4;
        labels[[0, 0, 1]] = 4;
        labels[[0, 1, 0]] = 2;
        let coords = label_image_coordinates(&labels);
        assert_eq!(coords.keys().copied().collect::<Vec<_>>(), vec![2, 4]);
        assert_eq!(coords[&4], vec![[0, 0, 1], [0, 2, 1]]);
        assert_eq!(coords[&2], vec![[0, 1, 0]]);
    }

    #[test]
    fn test_memory_backend_shapes() {
        let mut backend = MemoryBackend::new();
        backend.add_image("a", Array4::zeros((2, 1, 5, 4)), LabelCoordinates::new());
        assert_eq!(backend.image_count(), 1);
        assert_eq!(backend.image_shape(0).unwrap(), [2, 1, 5, 4]);
        assert_eq!(backend.image_name(0), "a");
        assert!(matches!(
            backend.image_shape(3),
            Err(TileError::ImageIndex { index: 3, count: 1 })
        ));
    }

    #[test]
    fn test_labeled_image_shape_mismatch() {
        let mut backend = MemoryBackend::new();
        let labels = Array3::<u32>::zeros((1, 4, 4));
        assert!(backend
            .add_labeled_image("a", Array4::zeros((1, 1, 5, 4)), &labels)
            .is_err());
    }

    #[test]
    fn test_save_tile_in_memory() {
        let mut backend = MemoryBackend::new();
        backend.add_image("a", Array4::zeros((1, 1, 4, 4)), LabelCoordinates::new());
        let tile = Array3::from_elem((1, 3, 3), 1.0f32);
        backend.save_tile(tile.view(), 0, 7, [0, 2, 2]).unwrap();

        let map = backend.probability_map(0, 7).unwrap();
        assert_eq!(map.shape(), &[1, 4, 4]);
        assert_eq!(map.sum(), 4.0);
        assert_eq!(map[[0, 3, 3]], 1.0);
        assert!(backend.probability_map(0, 8).is_none());
    }

    #[test]
    fn test_save_tile_past_image_is_dropped() {
        let mut backend = MemoryBackend::new();
        backend.add_image("a", Array4::zeros((1, 1, 6, 4)), LabelCoordinates::new());
        let tile = Array3::from_elem((1, 2, 2), 1.0f32);
        backend.save_tile(tile.view(), 0, 1, [0, 8, 0]).unwrap();
        backend.save_tile(tile.view(), 0, 1, [0, 0, 4]).unwrap();
        backend.save_tile(tile.view(), 0, 1, [3, 0, 0]).unwrap();
        assert!(backend.probability_map(0, 1).is_none());
    }

    #[test]
    fn test_save_tile_to_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProbMapStore::new(dir.path()).unwrap();
        let mut backend = MemoryBackend::new().with_store(store.clone());
        backend.add_image("a", Array4::zeros((1, 1, 4, 4)), LabelCoordinates::new());
        let tile = Array3::from_elem((1, 2, 2), 0.25f32);
        backend.save_tile(tile.view(), 0, 1, [0, 1, 1]).unwrap();

        let map = store.read("a", 1).unwrap();
        assert_eq!(map[[0, 1, 1]], 0.25);
        assert!((map.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_image_to_array_axes() {
        // 3 wide, 2 high: x runs along the width
        let img = GrayImage::from_fn(3, 2, |x, y| Luma([(10 * x + y) as u8]));
        let arr = image_to_array(&DynamicImage::ImageLuma8(img));
        assert_eq!(arr.shape(), &[1, 1, 3, 2]);
        assert_eq!(arr[[0, 0, 2, 1]], 21.0);

        let img = RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]));
        let arr = image_to_array(&DynamicImage::ImageRgb8(img));
        assert_eq!(arr.shape(), &[3, 1, 2, 2]);
        assert_eq!(arr[[2, 0, 1, 1]], 3.0);
    }

    #[test]
    fn test_from_image_files() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("cells.png");
        let label_path = dir.path().join("cells_labels.png");
        RgbImage::from_fn(4, 3, |x, y| Rgb([x as u8, y as u8, 9]))
            .save(&image_path)
            .unwrap();
        let mut labels = GrayImage::new(4, 3);
        labels.put_pixel(1, 2, Luma([2]));
        labels.put_pixel(3, 0, Luma([5]));
        labels.save(&label_path).unwrap();

        let backend =
            MemoryBackend::from_image_files(&[(image_path.clone(), Some(label_path))]).unwrap();
        assert_eq!(backend.image_shape(0).unwrap(), [3, 1, 4, 3]);
        assert_eq!(backend.image_name(0), "cells");
        let coords = backend.load_label_coordinates(0).unwrap();
        assert_eq!(coords[&2], vec![[0, 1, 2]]);
        assert_eq!(coords[&5], vec![[0, 3, 0]]);

        let pixels = backend.load_image(0).unwrap();
        assert_eq!(pixels[[1, 0, 2, 1]], 1.0);
    }

    #[test]
    fn test_missing_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.png");
        let result = MemoryBackend::from_image_files(&[(missing, None)]);
        assert!(matches!(result, Err(TileError::Image { .. })));
    }
}
