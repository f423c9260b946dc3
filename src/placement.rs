use crate::error::{TileError, TileResult};
use rand::Rng;

/// Random tile position along one axis that keeps `coord` inside the tile.
///
/// The tile stays inside the image when it fits; a tile longer than the axis
/// is centred on it instead.
pub fn random_axis_pos<R: Rng + ?Sized>(rng: &mut R, coord: usize, size: usize, shape: usize) -> isize {
    if size >= shape {
        return -(((size - shape) / 2) as isize);
    }
    let low = (coord + 1).saturating_sub(size);
    let high = coord.min(shape - size);
    if low >= high {
        return low as isize;
    }
    rng.gen_range(low..=high) as isize
}

/// Random `(z, x, y)` tile position containing `coord_zxy`.
///
/// # Arguments
/// * `coord_zxy` - Anchor position that has to end up inside the tile
/// * `size_zxy` - Tile size
/// * `shape_zxy` - Spatial image shape
pub fn random_pos_for_coordinate<R: Rng + ?Sized>(
    rng: &mut R,
    coord_zxy: [usize; 3],
    size_zxy: [usize; 3],
    shape_zxy: [usize; 3],
) -> [isize; 3] {
    let mut pos = [0isize; 3];
    for axis in 0..3 {
        pos[axis] = random_axis_pos(rng, coord_zxy[axis], size_zxy[axis], shape_zxy[axis]);
    }
    pos
}

/// Tile starts covering an axis of length `shape` with tiles of length `size`.
///
/// Tiles step by their size; the last one is aligned to the upper edge so no
/// tile leaves the image unless the image is shorter than one tile.
pub fn axis_tile_starts(shape: usize, size: usize) -> TileResult<Vec<isize>> {
    if size == 0 {
        return Err(TileError::InvalidConfig("tile size must be positive".to_string()));
    }
    if size >= shape {
        return Ok(vec![0]);
    }
    let mut starts: Vec<isize> = (0..)
        .step_by(size)
        .take_while(|&p| p + size < shape)
        .map(|p| p as isize)
        .collect();
    starts.push((shape - size) as isize);
    Ok(starts)
}

/// All `(z, x, y)` tile positions covering an image, z slowest.
pub fn tile_grid(shape_zxy: [usize; 3], size_zxy: [usize; 3]) -> TileResult<Vec<[isize; 3]>> {
    let zs = axis_tile_starts(shape_zxy[0], size_zxy[0])?;
    let xs = axis_tile_starts(shape_zxy[1], size_zxy[1])?;
    let ys = axis_tile_starts(shape_zxy[2], size_zxy[2])?;

    let mut grid = Vec::with_capacity(zs.len() * xs.len() * ys.len());
    for &z in &zs {
        for &x in &xs {
            for &y in &ys {
                grid.push([z, x, y]);
            }
        }
    }
    Ok(grid)
}
