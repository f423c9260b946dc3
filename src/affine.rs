use crate::error::{check_arity, TileError, TileResult};
use ndarray::{Array2, ArrayD, Dimension, IxDyn};
use serde::{Deserialize, Serialize};

/// Below this distance from `.5` a source coordinate counts as a rounding tie.
pub const TIE_EPSILON: f64 = 1e-6;

/// Represents a 2D rotation/shear about the origin and its parameters
#[derive(Clone, Debug)]
pub struct AffineTransform {
    /// 2x2 linear part, applied as `matrix * (col, row)`
    pub matrix: Array2<f64>,
    /// Rotation in degrees
    pub rotation: f64,
    /// Shear in degrees
    pub shear: f64,
}

impl AffineTransform {
    /// Create a transform rotating by `rotation` and shearing by `shear` degrees
    pub fn new(rotation: f64, shear: f64) -> Self {
        AffineTransform {
            matrix: create_affine_matrix(rotation, shear),
            rotation,
            shear,
        }
    }

    /// Create identity transformation
    pub fn identity() -> Self {
        AffineTransform::new(0.0, 0.0)
    }

    pub fn is_identity(&self) -> bool {
        self.rotation == 0.0 && self.shear == 0.0
    }
}

/// Build the 2x2 matrix `[[cos a, -sin(a + s)], [sin a, cos(a + s)]]`.
pub fn create_affine_matrix(rotation: f64, shear: f64) -> Array2<f64> {
    let a = rotation.to_radians();
    let s = shear.to_radians();

    let mut matrix = Array2::zeros((2, 2));
    matrix[[0, 0]] = a.cos();
    matrix[[0, 1]] = -(a + s).sin();
    matrix[[1, 0]] = a.sin();
    matrix[[1, 1]] = (a + s).cos();
    matrix
}

/// Apply affine transformation to a `(col, row)` point
pub fn apply_affine_transform(point: (f64, f64), transform: &AffineTransform) -> (f64, f64) {
    let (x, y) = point;
    let m = &transform.matrix;
    (m[[0, 0]] * x + m[[0, 1]] * y, m[[1, 0]] * x + m[[1, 1]] * y)
}

/// Get the inverse affine transformation
///
/// `None` for a degenerate matrix (shear of +-90 degrees).
pub fn invert_affine(transform: &AffineTransform) -> Option<AffineTransform> {
    let m = &transform.matrix;
    let det = m[[0, 0]] * m[[1, 1]] - m[[0, 1]] * m[[1, 0]];

    if det.abs() < 1e-10 {
        return None;
    }

    let mut inv_m = Array2::zeros((2, 2));
    inv_m[[0, 0]] = m[[1, 1]] / det;
    inv_m[[0, 1]] = -m[[0, 1]] / det;
    inv_m[[1, 0]] = -m[[1, 0]] / det;
    inv_m[[1, 1]] = m[[0, 0]] / det;

    Some(AffineTransform {
        matrix: inv_m,
        rotation: -transform.rotation,
        shear: -transform.shear,
    })
}

/// How output cells read the transformed source position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Closest source cell; halfway cases pick the lower index. Keeps label
    /// values intact.
    #[default]
    Nearest,
    /// Bilinear, cells outside the sampled box read as zero.
    Linear,
}

fn round_half_down(v: f64) -> isize {
    let f = v.floor();
    if (v - f - 0.5).abs() < TIE_EPSILON {
        f as isize
    } else {
        (v + 0.5).floor() as isize
    }
}

/// Value of the last two axes of `source` at `(row, col)`; `index` carries the
/// leading axes and is used as scratch for the trailing two.
fn sample_plane(
    source: &ArrayD<f32>,
    index: &mut [usize],
    row: f64,
    col: f64,
    interpolation: Interpolation,
) -> f32 {
    let ndim = index.len();
    let rows = source.shape()[ndim - 2] as isize;
    let cols = source.shape()[ndim - 1] as isize;

    let mut read = |r: isize, c: isize| -> f32 {
        if r < 0 || c < 0 || r >= rows || c >= cols {
            return 0.0;
        }
        index[ndim - 2] = r as usize;
        index[ndim - 1] = c as usize;
        source.get(&*index).copied().unwrap_or(0.0)
    };

    match interpolation {
        Interpolation::Nearest => read(round_half_down(row), round_half_down(col)),
        Interpolation::Linear => {
            let r0 = row.floor();
            let c0 = col.floor();
            let fr = (row - r0) as f32;
            let fc = (col - c0) as f32;
            let (r0, c0) = (r0 as isize, c0 as isize);

            let top = read(r0, c0) * (1.0 - fc) + read(r0, c0 + 1) * fc;
            let bottom = read(r0 + 1, c0) * (1.0 - fc) + read(r0 + 1, c0 + 1) * fc;
            top * (1.0 - fr) + bottom * fr
        }
    }
}

/// Extract a rotated/sheared tile without transforming the whole image.
///
/// The result equals rotating and shearing the source image about the centre
/// of the requested tile and then cutting out `size` cells at `pos`. Only the
/// last two axes are transformed. `sampler` is asked once for an enlarged box
/// around the tile that covers its whole transformed footprint; how that box
/// treats cells outside the image is up to the sampler.
///
/// With zero rotation and zero shear the sampler result for `(pos, size)` is
/// returned as is.
pub fn augmented_region<F>(
    image_shape: &[usize],
    pos: &[isize],
    size: &[usize],
    mut sampler: F,
    rotation: f64,
    shear: f64,
    interpolation: Interpolation,
) -> TileResult<ArrayD<f32>>
where
    F: FnMut(&[isize], &[usize]) -> TileResult<ArrayD<f32>>,
{
    check_arity("position", image_shape.len(), pos.len())?;
    check_arity("size", image_shape.len(), size.len())?;

    let transform = AffineTransform::new(rotation, shear);
    if transform.is_identity() {
        return sampler(pos, size);
    }
    let ndim = size.len();
    if ndim < 2 {
        return Err(TileError::InvalidDimension {
            what: "rotated tile",
            expected: 2,
            actual: ndim,
        });
    }

    let inverse = invert_affine(&transform).ok_or_else(|| {
        TileError::InvalidConfig(format!("shear of {shear} degrees collapses the tile"))
    })?;
    let (rows, cols) = (size[ndim - 2], size[ndim - 1]);
    let half_rows = rows as f64 / 2.0;
    let half_cols = cols as f64 / 2.0;

    // extent of the tile footprint in source space
    let mut reach_rows = 0.0f64;
    let mut reach_cols = 0.0f64;
    for &x in &[-half_cols, half_cols] {
        for &y in &[-half_rows, half_rows] {
            let (sx, sy) = apply_affine_transform((x, y), &inverse);
            reach_cols = reach_cols.max(sx.abs());
            reach_rows = reach_rows.max(sy.abs());
        }
    }
    let margin_rows = (reach_rows - half_rows).ceil().max(0.0) as usize + 1;
    let margin_cols = (reach_cols - half_cols).ceil().max(0.0) as usize + 1;

    let mut box_pos = pos.to_vec();
    let mut box_size = size.to_vec();
    box_pos[ndim - 2] -= margin_rows as isize;
    box_pos[ndim - 1] -= margin_cols as isize;
    box_size[ndim - 2] += 2 * margin_rows;
    box_size[ndim - 1] += 2 * margin_cols;

    let source = sampler(&box_pos, &box_size)?;
    check_arity("sampled box", ndim, source.ndim())?;
    log::trace!(
        "rotating tile {:?} by {}/{} deg through box {:?}",
        size,
        rotation,
        shear,
        box_size
    );

    let center_rows = margin_rows as f64 + half_rows;
    let center_cols = margin_cols as f64 + half_cols;
    let mut targets = Vec::with_capacity(rows * cols);
    for i in 0..rows {
        for j in 0..cols {
            let (sx, sy) =
                apply_affine_transform((j as f64 - half_cols, i as f64 - half_rows), &inverse);
            targets.push((sy + center_rows, sx + center_cols));
        }
    }

    let mut out = ArrayD::<f32>::zeros(IxDyn(size));
    let mut index = vec![0usize; ndim];
    for (idx, value) in out.indexed_iter_mut() {
        index[..ndim - 2].copy_from_slice(&idx.slice()[..ndim - 2]);
        let (row, col) = targets[idx[ndim - 2] * cols + idx[ndim - 1]];
        *value = sample_plane(&source, &mut index, row, col, interpolation);
    }
    Ok(out)
}
