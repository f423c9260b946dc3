use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which selection list an operation touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionKind {
    Channel,
    Label,
}

impl fmt::Display for SelectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionKind::Channel => write!(f, "channel"),
            SelectionKind::Label => write!(f, "label"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TileError {
    #[error("{what}: expected {expected} dimensions, got {actual}")]
    InvalidDimension {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("invalid label coordinate map: {0}")]
    InvalidCoordinateMap(String),
    #[error("{kind} {value} is not selected")]
    NotInSelection { kind: SelectionKind, value: u64 },
    #[error("{kind} {value} does not exist in the dataset")]
    NotInDataset { kind: SelectionKind, value: u64 },
    #[error("unsupported normalization mode: {0}")]
    UnsupportedNormalizationMode(String),
    #[error("image index {index} out of range ({count} images)")]
    ImageIndex { index: usize, count: usize },
    #[error("batch index {index} out of range ({count} batches)")]
    BatchIndex { index: usize, count: usize },
    #[error("{what}: expected shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("dataset holds no label annotations")]
    EmptyLabels,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("failed to read or write {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse json {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode image {path}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

pub type TileResult<T> = Result<T, TileError>;

/// Fails with `InvalidDimension` unless `actual == expected`.
pub(crate) fn check_arity(what: &'static str, expected: usize, actual: usize) -> TileResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(TileError::InvalidDimension {
            what,
            expected,
            actual,
        })
    }
}
