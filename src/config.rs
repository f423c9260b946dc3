//! Settings for the batch iterators, loadable from JSON files.

use crate::affine::Interpolation;
use crate::error::{TileError, TileResult};
use crate::normalize::Normalization;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn load_json<T: DeserializeOwned>(path: &Path) -> TileResult<T> {
    let text = fs::read_to_string(path).map_err(|source| TileError::Io {
        path: PathBuf::from(path),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| TileError::Json {
        path: PathBuf::from(path),
        source,
    })
}

fn check_tile_size(batch_size: usize, tile_size: &[usize; 3]) -> TileResult<()> {
    if batch_size == 0 {
        return Err(TileError::InvalidConfig("batch_size must be positive".to_string()));
    }
    if tile_size.contains(&0) {
        return Err(TileError::InvalidConfig(format!(
            "tile_size {tile_size:?} has an empty axis"
        )));
    }
    Ok(())
}

fn check_range(name: &str, (low, high): (f64, f64)) -> TileResult<()> {
    if !(low.is_finite() && high.is_finite()) || low > high {
        return Err(TileError::InvalidConfig(format!(
            "{name} ({low}, {high}) is not a valid range"
        )));
    }
    Ok(())
}

/// Settings of a [`TrainingBatch`](crate::batch::TrainingBatch).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub batch_size: usize,
    /// Tile size `(z, x, y)` of the weight tiles
    pub tile_size: [usize; 3],
    /// Pixel tiles grow by this on both sides of each axis
    pub padding: [usize; 3],
    /// Draw a random rotation and shear for every tile
    pub augment: bool,
    /// Degrees
    pub rotation_range: (f64, f64),
    /// Degrees
    pub shear_range: (f64, f64),
    pub interpolation: Interpolation,
    /// Pick anchor labels by inverse frequency instead of uniformly
    pub equalized: bool,
    /// One of `off`, `local`, `local_z_score`, `global`
    pub normalization: String,
    /// `(min, max)` for `global` normalization
    pub global_bounds: Option<(f32, f32)>,
    /// Channel subset, all channels if unset
    pub channels: Option<Vec<usize>>,
    /// Label subset, all labels if unset
    pub labels: Option<Vec<u32>>,
    /// Seed for the iterator's own random generator
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            batch_size: 4,
            tile_size: [1, 64, 64],
            padding: [0, 0, 0],
            augment: false,
            rotation_range: (-45.0, 45.0),
            shear_range: (-5.0, 5.0),
            interpolation: Interpolation::Nearest,
            equalized: false,
            normalization: "off".to_string(),
            global_bounds: None,
            channels: None,
            labels: None,
            seed: None,
        }
    }
}

impl TrainingConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> TileResult<Self> {
        let config: Self = load_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TileResult<()> {
        check_tile_size(self.batch_size, &self.tile_size)?;
        check_range("rotation_range", self.rotation_range)?;
        check_range("shear_range", self.shear_range)?;
        let (low, high) = self.shear_range;
        if low <= -90.0 || high >= 90.0 {
            return Err(TileError::InvalidConfig(format!(
                "shear_range ({low}, {high}) must lie strictly between -90 and 90 degrees"
            )));
        }
        self.normalization()?;
        Ok(())
    }

    pub fn normalization(&self) -> TileResult<Normalization> {
        Normalization::from_mode(&self.normalization, self.global_bounds)
    }
}

/// Settings of a [`PredictionBatch`](crate::batch::PredictionBatch).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub batch_size: usize,
    pub tile_size: [usize; 3],
    pub padding: [usize; 3],
    pub normalization: String,
    pub global_bounds: Option<(f32, f32)>,
    pub channels: Option<Vec<usize>>,
    /// Labels to write probability maps for; the dataset's labels if unset
    pub labels: Option<Vec<u32>>,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        PredictionConfig {
            batch_size: 4,
            tile_size: [1, 64, 64],
            padding: [0, 0, 0],
            normalization: "off".to_string(),
            global_bounds: None,
            channels: None,
            labels: None,
        }
    }
}

impl PredictionConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> TileResult<Self> {
        let config: Self = load_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TileResult<()> {
        check_tile_size(self.batch_size, &self.tile_size)?;
        self.normalization()?;
        Ok(())
    }

    pub fn normalization(&self) -> TileResult<Normalization> {
        Normalization::from_mode(&self.normalization, self.global_bounds)
    }
}
