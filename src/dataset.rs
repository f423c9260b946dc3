//! Tile extraction over a collection of images and their label annotations.

use crate::affine::{augmented_region, Interpolation};
use crate::annotations::{validate_coordinate_map, LabelIndex, LabelPoint};
use crate::backend::{check_spatial, ImageBackend};
use crate::error::{check_arity, SelectionKind, TileError, TileResult};
use crate::placement::random_pos_for_coordinate;
use crate::region::inner_region;
use crate::sampling::sample_region;
use crate::weights::{equalized_weights, label_to_weight_map};
use ndarray::{stack, Array3, Array4, ArrayView3, Axis, Ix3, Slice};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::collections::BTreeMap;

/// Rotation and shear applied to a tile, in degrees
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Augmentation {
    pub rotation: f64,
    pub shear: f64,
    /// Interpolation for pixel tiles; weight tiles always use nearest
    pub interpolation: Interpolation,
}

impl Augmentation {
    pub fn new(rotation: f64, shear: f64) -> Self {
        Augmentation {
            rotation,
            shear,
            interpolation: Interpolation::Nearest,
        }
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }
}

/// Pixel tile with matching weight tile and where it came from
#[derive(Clone, Debug)]
pub struct Tile {
    /// `(channels, z, x, y)`, grown by the padding on both sides
    pub pixels: Array4<f32>,
    /// `(labels, z, x, y)`
    pub weights: Array4<f32>,
    pub image: usize,
    pub pos: [isize; 3],
    pub size: [usize; 3],
    pub padding: [usize; 3],
    pub channels: Vec<usize>,
    pub labels: Vec<u32>,
    /// Label of the annotation the tile was placed around, for random tiles
    pub center_label: Option<u32>,
    pub augmentation: Augmentation,
}

/// Options for [`Dataset::random_training_tile`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingTileOptions {
    pub padding: [usize; 3],
    /// Favour rare labels when picking the anchor annotation
    pub equalized: bool,
    pub augmentation: Augmentation,
    /// Only place tiles around annotations of this label
    pub label_region: Option<u32>,
}

/// Images of a backend together with their label annotations and weights.
pub struct Dataset<B> {
    backend: B,
    shapes: Vec<[usize; 4]>,
    labels: LabelIndex,
}

fn stack_planes(planes: &[Array3<f32>], size: &[usize]) -> TileResult<Array4<f32>> {
    if planes.is_empty() {
        return Ok(Array4::zeros((0, size[0], size[1], size[2])));
    }
    let views: Vec<ArrayView3<'_, f32>> = planes.iter().map(|p| p.view()).collect();
    Ok(stack(Axis(0), &views)?)
}

impl<B: ImageBackend> Dataset<B> {
    /// Read shapes and label annotations of every image of `backend`.
    pub fn new(backend: B) -> TileResult<Self> {
        let shapes = (0..backend.image_count())
            .map(|i| backend.image_shape(i))
            .collect::<TileResult<Vec<_>>>()?;
        if let Some(first) = shapes.first() {
            if let Some(other) = shapes.iter().find(|s| s[0] != first[0]) {
                return Err(TileError::InvalidConfig(format!(
                    "images differ in channel count: {first:?} vs {other:?}"
                )));
            }
        }

        let labels = LabelIndex::scan(&backend)?;
        validate_coordinate_map(&labels.coordinate_map(), &shapes)?;
        log::info!(
            "dataset with {} images, {} channels, labels {:?}",
            shapes.len(),
            shapes.first().map_or(0, |s| s[0]),
            labels.labels()
        );
        Ok(Dataset {
            backend,
            shapes,
            labels,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn image_count(&self) -> usize {
        self.shapes.len()
    }

    /// Shape `(c, z, x, y)` of an image
    pub fn image_shape(&self, image: usize) -> TileResult<[usize; 4]> {
        self.shapes.get(image).copied().ok_or(TileError::ImageIndex {
            index: image,
            count: self.shapes.len(),
        })
    }

    fn spatial_shape(&self, image: usize) -> TileResult<[usize; 3]> {
        let [_, z, x, y] = self.image_shape(image)?;
        Ok([z, x, y])
    }

    pub fn channel_count(&self) -> usize {
        self.shapes.first().map_or(0, |s| s[0])
    }

    /// Label values present in the dataset, ascending
    pub fn label_values(&self) -> Vec<u32> {
        self.labels.labels()
    }

    /// Annotation count per label for one image
    pub fn label_counts(&self, image: usize) -> TileResult<&BTreeMap<u32, usize>> {
        self.labels.image_counts(image).ok_or(TileError::ImageIndex {
            index: image,
            count: self.shapes.len(),
        })
    }

    pub fn total_label_counts(&self) -> BTreeMap<u32, usize> {
        self.labels.total_counts()
    }

    /// Annotations as `(image, z, x, y)` coordinates per label
    pub fn coordinate_map(&self) -> BTreeMap<u32, Vec<Vec<usize>>> {
        self.labels.coordinate_map()
    }

    pub fn check_coordinate_map(&self, map: &BTreeMap<u32, Vec<Vec<usize>>>) -> TileResult<()> {
        validate_coordinate_map(map, &self.shapes)
    }

    pub fn is_valid_coordinate_map(&self, map: &BTreeMap<u32, Vec<Vec<usize>>>) -> bool {
        self.check_coordinate_map(map).is_ok()
    }

    pub fn label_points(&self, label: u32) -> TileResult<&[LabelPoint]> {
        self.labels.points(label).ok_or(TileError::NotInDataset {
            kind: SelectionKind::Label,
            value: label.into(),
        })
    }

    /// The `choice`-th annotation of `label`
    pub fn label_coordinate(&self, label: u32, choice: usize) -> TileResult<&LabelPoint> {
        let points = self.label_points(label)?;
        points.get(choice).ok_or_else(|| {
            TileError::InvalidCoordinateMap(format!(
                "label {label} has {} annotations, no index {choice}",
                points.len()
            ))
        })
    }

    pub fn label_weights(&self, label: u32) -> TileResult<Vec<f32>> {
        Ok(self.label_points(label)?.iter().map(|p| p.weight).collect())
    }

    /// Give every annotation of `label` the same weight.
    pub fn set_label_weight(&mut self, weight: f32, label: u32) -> TileResult<()> {
        let points = self.labels.points_mut(label).ok_or(TileError::NotInDataset {
            kind: SelectionKind::Label,
            value: label.into(),
        })?;
        for point in points.iter_mut() {
            point.weight = weight;
        }
        Ok(())
    }

    /// Set one weight per annotation of `label`, in annotation order.
    pub fn set_label_weights(&mut self, label: u32, weights: &[f32]) -> TileResult<()> {
        let points = self.labels.points_mut(label).ok_or(TileError::NotInDataset {
            kind: SelectionKind::Label,
            value: label.into(),
        })?;
        check_arity("label weights", points.len(), weights.len())?;
        for (point, &weight) in points.iter_mut().zip(weights) {
            point.weight = weight;
        }
        Ok(())
    }

    /// Weight labels by inverse frequency so that all weights sum to 1.
    pub fn equalize_label_weights(&mut self) -> BTreeMap<u32, f32> {
        let weights = equalized_weights(&self.labels.total_counts());
        for (&label, &weight) in &weights {
            if let Some(points) = self.labels.points_mut(label) {
                for point in points.iter_mut() {
                    point.weight = weight;
                }
            }
        }
        log::debug!("equalized label weights: {weights:?}");
        weights
    }

    /// Pixel tile of shape `(channels, z + 2pz, x + 2px, y + 2py)`.
    ///
    /// The tile is grown by `padding_zxy` on both sides of every axis; cells
    /// outside the image are mirrored in.
    pub fn pixel_tile(
        &self,
        image: usize,
        pos_zxy: [isize; 3],
        size_zxy: [usize; 3],
        channels: &[usize],
        padding_zxy: [usize; 3],
        augmentation: &Augmentation,
    ) -> TileResult<Array4<f32>> {
        let shape = self.image_shape(image)?;
        if let Some(&c) = channels.iter().find(|&&c| c >= shape[0]) {
            return Err(TileError::NotInDataset {
                kind: SelectionKind::Channel,
                value: c as u64,
            });
        }
        let pos: Vec<isize> = (0..3)
            .map(|i| pos_zxy[i] - padding_zxy[i] as isize)
            .collect();
        let size: Vec<usize> = (0..3).map(|i| size_zxy[i] + 2 * padding_zxy[i]).collect();
        log::debug!("pixel tile image {image} pos {pos:?} size {size:?} channels {channels:?}");

        let data = self.backend.load_image(image)?;
        check_spatial(data.shape(), &shape)?;

        let mut planes = Vec::with_capacity(channels.len());
        for &c in channels {
            let plane = data.index_axis(Axis(0), c).into_dyn();
            let tile = augmented_region(
                &shape[1..],
                &pos,
                &size,
                |p, s| sample_region(&plane, p, s, true),
                augmentation.rotation,
                augmentation.shear,
                augmentation.interpolation,
            )?;
            planes.push(tile.into_dimensionality::<Ix3>()?);
        }
        stack_planes(&planes, &size)
    }

    /// Weight tile of shape `(labels, z, x, y)`.
    ///
    /// Labels without annotations in this image give an all-zero plane.
    pub fn weight_tile(
        &self,
        image: usize,
        pos_zxy: [isize; 3],
        size_zxy: [usize; 3],
        labels: &[u32],
        augmentation: &Augmentation,
    ) -> TileResult<Array4<f32>> {
        let shape = self.image_shape(image)?;
        let mut planes = Vec::with_capacity(labels.len());
        for &label in labels {
            let in_image = self
                .label_points(label)?
                .iter()
                .filter(|p| p.image == image)
                .map(|p| (&p.zxy[..], p.weight));
            let tile = augmented_region(
                &shape[1..],
                &pos_zxy,
                &size_zxy,
                |p, s| label_to_weight_map(p, s, in_image.clone()),
                augmentation.rotation,
                augmentation.shear,
                Interpolation::Nearest,
            )?;
            planes.push(tile.into_dimensionality::<Ix3>()?);
        }
        stack_planes(&planes, &size_zxy)
    }

    /// Pixel and weight tile for the same region.
    #[allow(clippy::too_many_arguments)]
    pub fn training_tile(
        &self,
        image: usize,
        pos_zxy: [isize; 3],
        size_zxy: [usize; 3],
        channels: &[usize],
        labels: &[u32],
        padding_zxy: [usize; 3],
        augmentation: &Augmentation,
    ) -> TileResult<Tile> {
        let pixels = self.pixel_tile(image, pos_zxy, size_zxy, channels, padding_zxy, augmentation)?;
        let weights = self.weight_tile(image, pos_zxy, size_zxy, labels, augmentation)?;
        Ok(Tile {
            pixels,
            weights,
            image,
            pos: pos_zxy,
            size: size_zxy,
            padding: padding_zxy,
            channels: channels.to_vec(),
            labels: labels.to_vec(),
            center_label: None,
            augmentation: *augmentation,
        })
    }

    /// Pick a label, then one of its annotations, both at random.
    ///
    /// Labels are drawn uniformly, or by inverse frequency when `equalized`.
    /// With `only`, labels outside that list are never drawn.
    pub fn random_label_coordinate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        equalized: bool,
        only: Option<&[u32]>,
    ) -> TileResult<(u32, &LabelPoint)> {
        let counts: BTreeMap<u32, usize> = self
            .labels
            .total_counts()
            .into_iter()
            .filter(|&(label, n)| n > 0 && only.map_or(true, |ls| ls.contains(&label)))
            .collect();
        let labels: Vec<u32> = counts.keys().copied().collect();
        if labels.is_empty() {
            return Err(TileError::EmptyLabels);
        }

        let label = if equalized {
            let weights = equalized_weights(&counts);
            let dist = WeightedIndex::new(labels.iter().map(|l| weights[l]))
                .map_err(|_| TileError::EmptyLabels)?;
            labels[dist.sample(rng)]
        } else {
            labels[rng.gen_range(0..labels.len())]
        };

        let points = self.label_points(label)?;
        Ok((label, &points[rng.gen_range(0..points.len())]))
    }

    /// Random tile position of `size_zxy` that contains `point`.
    pub fn random_pos_for_coordinate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        point: &LabelPoint,
        size_zxy: [usize; 3],
    ) -> TileResult<[isize; 3]> {
        let shape = self.spatial_shape(point.image)?;
        Ok(random_pos_for_coordinate(rng, point.zxy, size_zxy, shape))
    }

    /// Training tile placed around a random annotation of one of `labels`.
    pub fn random_training_tile<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        size_zxy: [usize; 3],
        channels: &[usize],
        labels: &[u32],
        options: &TrainingTileOptions,
    ) -> TileResult<Tile> {
        let (label, point) = match options.label_region {
            Some(label) => {
                let points = self.label_points(label)?;
                if points.is_empty() {
                    return Err(TileError::EmptyLabels);
                }
                (label, &points[rng.gen_range(0..points.len())])
            }
            None => self.random_label_coordinate(rng, options.equalized, Some(labels))?,
        };

        let pos = self.random_pos_for_coordinate(rng, point, size_zxy)?;
        let mut tile = self.training_tile(
            point.image,
            pos,
            size_zxy,
            channels,
            labels,
            options.padding,
            &options.augmentation,
        )?;
        tile.center_label = Some(label);
        Ok(tile)
    }

    /// Write a `(z, x, y)` probability tile for `label` back to the backend.
    ///
    /// Parts of the tile outside the image are dropped.
    pub fn save_prediction_tile(
        &mut self,
        probs: ArrayView3<'_, f32>,
        image: usize,
        pos_zxy: [isize; 3],
        label: u32,
    ) -> TileResult<()> {
        let shape = self.spatial_shape(image)?;
        let region = inner_region(&shape, &pos_zxy, probs.shape())?;
        if region.is_outside() {
            return Ok(());
        }

        let cropped = probs.slice_each_axis(|ax| {
            let i = ax.axis.index();
            let before = region.padding[i].0;
            Slice::from(before..before + region.data_len(i))
        });
        let start = [
            region.pos[0] + region.tile_offset[0],
            region.pos[1] + region.tile_offset[1],
            region.pos[2] + region.tile_offset[2],
        ];
        self.backend.save_tile(cropped, image, label, start)
    }
}
