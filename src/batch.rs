//! Minibatch iterators for training and prediction.

use crate::backend::ImageBackend;
use crate::config::{PredictionConfig, TrainingConfig};
use crate::dataset::{Augmentation, Dataset, Tile, TrainingTileOptions};
use crate::error::{TileError, TileResult};
use crate::normalize::Normalization;
use crate::placement::tile_grid;
use crate::selection::Selection;
use ndarray::{stack, Array4, Array5, ArrayView4, ArrayView5, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Where a tile of a minibatch was taken from
#[derive(Clone, Debug, PartialEq)]
pub struct TileInfo {
    pub image: usize,
    pub pos: [isize; 3],
    pub center_label: Option<u32>,
    pub augmentation: Augmentation,
}

/// Training minibatch.
#[derive(Clone, Debug)]
pub struct Minibatch {
    /// `(batch, channels, z, x, y)`
    pub pixels: Array5<f32>,
    /// `(batch, labels, z, x, y)`
    pub weights: Array5<f32>,
    pub channels: Vec<usize>,
    pub labels: Vec<u32>,
    pub tiles: Vec<TileInfo>,
}

/// Pixel-only minibatch for prediction.
#[derive(Clone, Debug)]
pub struct PixelBatch {
    /// `(batch, channels, z, x, y)`
    pub pixels: Array5<f32>,
    pub channels: Vec<usize>,
    pub tiles: Vec<TileInfo>,
}

fn stack_tiles(tiles: &[Array4<f32>]) -> TileResult<Array5<f32>> {
    let views: Vec<ArrayView4<'_, f32>> = tiles.iter().map(|t| t.view()).collect();
    Ok(stack(Axis(0), &views)?)
}

impl Minibatch {
    fn from_tiles(tiles: Vec<Tile>, channels: Vec<usize>, labels: Vec<u32>) -> TileResult<Self> {
        let mut pixels = Vec::with_capacity(tiles.len());
        let mut weights = Vec::with_capacity(tiles.len());
        let mut infos = Vec::with_capacity(tiles.len());
        for tile in tiles {
            infos.push(TileInfo {
                image: tile.image,
                pos: tile.pos,
                center_label: tile.center_label,
                augmentation: tile.augmentation,
            });
            pixels.push(tile.pixels);
            weights.push(tile.weights);
        }
        Ok(Minibatch {
            pixels: stack_tiles(&pixels)?,
            weights: stack_tiles(&weights)?,
            channels,
            labels,
            tiles: infos,
        })
    }
}

fn sample_range<R: Rng + ?Sized>(rng: &mut R, (low, high): (f64, f64)) -> f64 {
    if low < high {
        rng.gen_range(low..=high)
    } else {
        low
    }
}

/// Endless stream of random training minibatches.
///
/// Every tile is placed around a randomly drawn annotation; see
/// [`Dataset::random_training_tile`].
pub struct TrainingBatch<'d, B, R = StdRng> {
    dataset: &'d Dataset<B>,
    config: TrainingConfig,
    normalization: Normalization,
    selection: Selection,
    rng: R,
}

impl<'d, B: ImageBackend> TrainingBatch<'d, B, StdRng> {
    /// Iterator seeded from `config.seed`, or from entropy if unset.
    pub fn new(dataset: &'d Dataset<B>, config: TrainingConfig) -> TileResult<Self> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(dataset, config, rng)
    }
}

impl<'d, B: ImageBackend, R: Rng> TrainingBatch<'d, B, R> {
    pub fn with_rng(dataset: &'d Dataset<B>, config: TrainingConfig, rng: R) -> TileResult<Self> {
        config.validate()?;
        let normalization = config.normalization()?;
        let mut selection = Selection::new(dataset.channel_count(), &dataset.label_values());
        if let Some(channels) = &config.channels {
            selection.select_channels(channels)?;
        }
        if let Some(labels) = &config.labels {
            selection.select_labels(labels)?;
        }
        log::info!(
            "training batches of {} tiles {:?}, channels {:?}, labels {:?}",
            config.batch_size,
            config.tile_size,
            selection.channels(),
            selection.labels()
        );
        Ok(TrainingBatch {
            dataset,
            config,
            normalization,
            selection,
            rng,
        })
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut Selection {
        &mut self.selection
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn set_normalization(&mut self, normalization: Normalization) {
        self.normalization = normalization;
    }

    fn draw_augmentation(&mut self) -> Augmentation {
        let interpolation = self.config.interpolation;
        if !self.config.augment {
            return Augmentation::default().with_interpolation(interpolation);
        }
        let rotation = sample_range(&mut self.rng, self.config.rotation_range);
        let shear = sample_range(&mut self.rng, self.config.shear_range);
        Augmentation::new(rotation, shear).with_interpolation(interpolation)
    }

    pub fn next_batch(&mut self) -> TileResult<Minibatch> {
        let channels = self.selection.channels().to_vec();
        let labels = self.selection.labels().to_vec();
        if labels.is_empty() {
            return Err(TileError::EmptyLabels);
        }

        let mut tiles = Vec::with_capacity(self.config.batch_size);
        for _ in 0..self.config.batch_size {
            let options = TrainingTileOptions {
                padding: self.config.padding,
                equalized: self.config.equalized,
                augmentation: self.draw_augmentation(),
                label_region: None,
            };
            tiles.push(self.dataset.random_training_tile(
                &mut self.rng,
                self.config.tile_size,
                &channels,
                &labels,
                &options,
            )?);
        }

        let mut batch = Minibatch::from_tiles(tiles, channels, labels)?;
        self.normalization.apply(batch.pixels.view_mut().into_dyn(), Axis(1));
        Ok(batch)
    }
}

impl<B: ImageBackend, R: Rng> Iterator for TrainingBatch<'_, B, R> {
    type Item = TileResult<Minibatch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

/// Tiles covering every image, grouped into minibatches, with write-back of
/// the predicted probabilities.
pub struct PredictionBatch<'d, B> {
    dataset: &'d mut Dataset<B>,
    config: PredictionConfig,
    normalization: Normalization,
    selection: Selection,
    positions: Vec<(usize, [isize; 3])>,
}

impl<'d, B: ImageBackend> PredictionBatch<'d, B> {
    pub fn new(dataset: &'d mut Dataset<B>, config: PredictionConfig) -> TileResult<Self> {
        config.validate()?;
        let normalization = config.normalization()?;
        let labels = config
            .labels
            .clone()
            .unwrap_or_else(|| dataset.label_values());
        let mut selection = Selection::new(dataset.channel_count(), &labels);
        if let Some(channels) = &config.channels {
            selection.select_channels(channels)?;
        }

        let mut positions = Vec::new();
        for image in 0..dataset.image_count() {
            let [_, z, x, y] = dataset.image_shape(image)?;
            for pos in tile_grid([z, x, y], config.tile_size)? {
                positions.push((image, pos));
            }
        }
        log::info!(
            "{} prediction tiles of {:?} over {} images",
            positions.len(),
            config.tile_size,
            dataset.image_count()
        );
        Ok(PredictionBatch {
            dataset,
            config,
            normalization,
            selection,
            positions,
        })
    }

    /// Number of minibatches
    pub fn len(&self) -> usize {
        self.positions.len().div_ceil(self.config.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut Selection {
        &mut self.selection
    }

    pub fn dataset(&self) -> &Dataset<B> {
        &*self.dataset
    }

    /// Tile positions `(image, pos)` of minibatch `index`
    pub fn positions(&self, index: usize) -> TileResult<&[(usize, [isize; 3])]> {
        if index >= self.len() {
            return Err(TileError::BatchIndex {
                index,
                count: self.len(),
            });
        }
        let start = index * self.config.batch_size;
        let end = (start + self.config.batch_size).min(self.positions.len());
        Ok(&self.positions[start..end])
    }

    pub fn get(&self, index: usize) -> TileResult<PixelBatch> {
        let channels = self.selection.channels().to_vec();
        let no_augmentation = Augmentation::default();
        let mut tiles = Vec::new();
        let mut infos = Vec::new();
        for &(image, pos) in self.positions(index)? {
            tiles.push(self.dataset.pixel_tile(
                image,
                pos,
                self.config.tile_size,
                &channels,
                self.config.padding,
                &no_augmentation,
            )?);
            infos.push(TileInfo {
                image,
                pos,
                center_label: None,
                augmentation: no_augmentation,
            });
        }

        let mut pixels = stack_tiles(&tiles)?;
        self.normalization.apply(pixels.view_mut().into_dyn(), Axis(1));
        Ok(PixelBatch {
            pixels,
            channels,
            tiles: infos,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = TileResult<PixelBatch>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Write predictions of shape `(batch, labels, z, x, y)` for minibatch
    /// `index` into the probability maps of the selected labels.
    pub fn put_probmap_data(&mut self, index: usize, probs: ArrayView5<'_, f32>) -> TileResult<()> {
        let positions = self.positions(index)?.to_vec();
        let labels = self.selection.labels().to_vec();
        let [z, x, y] = self.config.tile_size;
        let expected = vec![positions.len(), labels.len(), z, x, y];
        if probs.shape() != expected.as_slice() {
            return Err(TileError::ShapeMismatch {
                what: "prediction batch",
                expected,
                actual: probs.shape().to_vec(),
            });
        }

        for (k, &(image, pos)) in positions.iter().enumerate() {
            for (l, &label) in labels.iter().enumerate() {
                let tile = probs.index_axis_move(Axis(0), k).index_axis_move(Axis(0), l);
                self.dataset.save_prediction_tile(tile, image, pos, label)?;
            }
        }
        log::debug!("stored predictions of batch {index}");
        Ok(())
    }
}
