//! On-disk probability maps, one raw `f32` volume per (image, label).
//!
//! Each map is a little-endian `f32` file in `(z, x, y)` order next to a JSON
//! header describing it. Maps are created zero-filled on first write and
//! updated in place afterwards.

use crate::error::{TileError, TileResult};
use ndarray::{Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const CELL_BYTES: u64 = 4;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbMapHeader {
    pub image: String,
    pub label: u32,
    /// Spatial shape `(z, x, y)` of the map
    pub shape: [usize; 3],
}

#[derive(Clone, Debug)]
pub struct ProbMapStore {
    dir: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> TileError + '_ {
    move |source| TileError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Part of a tile at `pos` that fits into `shape`.
pub(crate) fn clipped_extent(shape: [usize; 3], pos: [usize; 3], tile: &[usize]) -> [usize; 3] {
    let mut extent = [0; 3];
    for axis in 0..3 {
        extent[axis] = tile[axis].min(shape[axis].saturating_sub(pos[axis]));
    }
    extent
}

impl ProbMapStore {
    pub fn new(dir: impl Into<PathBuf>) -> TileResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        Ok(ProbMapStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Data file of the map for `image` and `label`.
    pub fn map_path(&self, image: &str, label: u32) -> PathBuf {
        self.dir.join(format!("{image}_class_{label}.f32"))
    }

    fn header_path(&self, image: &str, label: u32) -> PathBuf {
        self.dir.join(format!("{image}_class_{label}.json"))
    }

    pub fn header(&self, image: &str, label: u32) -> TileResult<ProbMapHeader> {
        let path = self.header_path(image, label);
        let text = fs::read_to_string(&path).map_err(io_err(&path))?;
        serde_json::from_str(&text).map_err(|source| TileError::Json { path, source })
    }

    fn create(&self, image: &str, label: u32, shape: [usize; 3]) -> TileResult<()> {
        let path = self.map_path(image, label);
        let file = File::create(&path).map_err(io_err(&path))?;
        let cells = (shape[0] * shape[1] * shape[2]) as u64;
        file.set_len(cells * CELL_BYTES).map_err(io_err(&path))?;

        let header = ProbMapHeader {
            image: image.to_string(),
            label,
            shape,
        };
        let header_path = self.header_path(image, label);
        let text = serde_json::to_string_pretty(&header).map_err(|source| TileError::Json {
            path: header_path.clone(),
            source,
        })?;
        fs::write(&header_path, text).map_err(io_err(&header_path))?;
        log::debug!("created probability map {} with shape {:?}", path.display(), shape);
        Ok(())
    }

    /// Merge `tile` into the map at `pos`; cells past the map edge are dropped.
    pub fn write_tile(
        &self,
        image: &str,
        label: u32,
        shape: [usize; 3],
        tile: ArrayView3<'_, f32>,
        pos: [usize; 3],
    ) -> TileResult<()> {
        let path = self.map_path(image, label);
        if path.exists() {
            let header = self.header(image, label)?;
            if header.shape != shape {
                return Err(TileError::InvalidConfig(format!(
                    "probability map {} has shape {:?}, expected {:?}",
                    path.display(),
                    header.shape,
                    shape
                )));
            }
        } else {
            self.create(image, label, shape)?;
        }

        let extent = clipped_extent(shape, pos, tile.shape());
        if extent.contains(&0) {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(io_err(&path))?;
        let mut row = Vec::with_capacity(extent[2] * CELL_BYTES as usize);
        for z in 0..extent[0] {
            for x in 0..extent[1] {
                row.clear();
                for v in tile.index_axis(Axis(0), z).row(x).iter().take(extent[2]) {
                    row.extend_from_slice(&v.to_le_bytes());
                }
                let cell = ((pos[0] + z) * shape[1] + pos[1] + x) * shape[2] + pos[2];
                file.seek(SeekFrom::Start(cell as u64 * CELL_BYTES))
                    .map_err(io_err(&path))?;
                file.write_all(&row).map_err(io_err(&path))?;
            }
        }
        Ok(())
    }

    /// Load the whole map for `image` and `label`.
    pub fn read(&self, image: &str, label: u32) -> TileResult<Array3<f32>> {
        let header = self.header(image, label)?;
        let path = self.map_path(image, label);
        let mut bytes = Vec::new();
        File::open(&path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(io_err(&path))?;

        let cells = header.shape.iter().product::<usize>();
        if bytes.len() != cells * CELL_BYTES as usize {
            return Err(TileError::InvalidConfig(format!(
                "probability map {} holds {} bytes, expected {}",
                path.display(),
                bytes.len(),
                cells * CELL_BYTES as usize
            )));
        }
        let values: Vec<f32> = bytes
            .chunks_exact(CELL_BYTES as usize)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Array3::from_shape_vec(header.shape, values)?)
    }
}
