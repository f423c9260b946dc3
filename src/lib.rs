//! Padded, augmented tile extraction for pixel-classification training.
//!
//! Images are `(channel, z, x, y)` volumes with sparse point annotations per
//! label. A [`Dataset`] cuts pixel tiles and matching weight tiles out of them;
//! [`TrainingBatch`] and [`PredictionBatch`] group tiles into minibatches.

pub mod affine;
pub mod annotations;
pub mod backend;
pub mod batch;
pub mod config;
pub mod dataset;
pub mod error;
pub mod normalize;
pub mod placement;
pub mod region;
pub mod sampling;
pub mod selection;
pub mod store;
pub mod weights;

pub use affine::Interpolation;
pub use annotations::LabelPoint;
pub use backend::{ImageBackend, LabelCoordinates, MemoryBackend};
pub use batch::{Minibatch, PixelBatch, PredictionBatch, TileInfo, TrainingBatch};
pub use config::{PredictionConfig, TrainingConfig};
pub use dataset::{Augmentation, Dataset, Tile, TrainingTileOptions};
pub use error::{SelectionKind, TileError, TileResult};
pub use normalize::Normalization;
pub use selection::Selection;
pub use store::ProbMapStore;
