//! Dense weight maps from sparse per-class annotations.

use crate::error::{check_arity, TileResult};
use ndarray::{ArrayD, IxDyn};
use std::collections::BTreeMap;

/// Weights for every coordinate of one class.
#[derive(Clone, Debug, PartialEq)]
pub enum ClassWeights {
    /// The same weight for each coordinate
    Uniform(f32),
    /// One weight per coordinate, in coordinate order
    PerPoint(Vec<f32>),
}

/// Write each point's weight into a zero array covering `size` cells at `pos`.
///
/// Points outside the region are skipped. If two points hit the same cell the
/// later one wins.
pub fn label_to_weight_map<'a, I>(pos: &[isize], size: &[usize], points: I) -> TileResult<ArrayD<f32>>
where
    I: IntoIterator<Item = (&'a [usize], f32)>,
{
    check_arity("size", pos.len(), size.len())?;
    let mut out = ArrayD::<f32>::zeros(IxDyn(size));
    let mut local = vec![0usize; size.len()];

    'points: for (point, weight) in points {
        check_arity("coordinate", size.len(), point.len())?;
        for (axis, &p) in point.iter().enumerate() {
            let offset = p as isize - pos[axis];
            if offset < 0 || offset >= size[axis] as isize {
                continue 'points;
            }
            local[axis] = offset as usize;
        }
        out[&local[..]] = weight;
    }
    Ok(out)
}

/// [`label_to_weight_map`] for a coordinate list with separate weights.
pub fn weight_map_from_coordinates(
    pos: &[isize],
    size: &[usize],
    coordinates: &[Vec<usize>],
    weights: &ClassWeights,
) -> TileResult<ArrayD<f32>> {
    match weights {
        ClassWeights::Uniform(w) => label_to_weight_map(
            pos,
            size,
            coordinates.iter().map(|c| (c.as_slice(), *w)),
        ),
        ClassWeights::PerPoint(ws) => {
            check_arity("weights", coordinates.len(), ws.len())?;
            label_to_weight_map(
                pos,
                size,
                coordinates.iter().map(Vec::as_slice).zip(ws.iter().copied()),
            )
        }
    }
}

/// Normalized inverse-frequency weights: `(1 / n_c) / sum_k (1 / n_k)`.
///
/// Classes without annotations get weight 0 and do not enter the sum.
pub fn equalized_weights(counts: &BTreeMap<u32, usize>) -> BTreeMap<u32, f32> {
    let norm: f64 = counts
        .values()
        .filter(|&&n| n > 0)
        .map(|&n| 1.0 / n as f64)
        .sum();

    counts
        .iter()
        .map(|(&label, &n)| {
            let w = if n == 0 || norm == 0.0 {
                0.0
            } else {
                (1.0 / n as f64) / norm
            };
            (label, w as f32)
        })
        .collect()
}
