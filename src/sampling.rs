//! Region reads that may extend past the image edges.

use crate::error::TileResult;
use crate::region::{inner_region, InnerRegion};
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice};

/// Mirror `index` back into `0..len`, repeating the edge cell.
///
/// `-1` maps to `0`, `-2` to `1`, `len` to `len - 1`; indices further away
/// bounce between both edges with period `2 * len`.
pub fn reflect_index(index: isize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let n = len as isize;
    let r = index.rem_euclid(2 * n);
    if r < n {
        r as usize
    } else {
        (2 * n - 1 - r) as usize
    }
}

/// The requested cells that lie inside the image.
fn requested_view<'v>(image: &'v ArrayViewD<'_, f32>, region: &InnerRegion) -> ArrayViewD<'v, f32> {
    image.slice_each_axis(|ax| {
        let i = ax.axis.index();
        let start = region.pos[i] + region.tile_offset[i];
        Slice::from(start..start + region.data_len(i))
    })
}

/// Read `size` cells starting at `pos`.
///
/// With `reflect` the result has exactly `size` cells, out-of-bounds cells are
/// mirrored from the image. Without it only the in-bounds part of the request is
/// returned and embedding it is left to the caller (see
/// [`sample_region_constant`]).
pub fn sample_region(
    image: &ArrayViewD<'_, f32>,
    pos: &[isize],
    size: &[usize],
    reflect: bool,
) -> TileResult<ArrayD<f32>> {
    let shape = image.shape().to_vec();
    let region = inner_region(&shape, pos, size)?;

    if !reflect {
        return Ok(requested_view(image, &region).to_owned());
    }
    if size.contains(&0) || shape.contains(&0) {
        return Ok(ArrayD::zeros(IxDyn(size)));
    }

    // axes the request misses entirely mirror from the whole axis
    let mut out = image
        .slice_each_axis(|ax| {
            let i = ax.axis.index();
            if region.size[i] == 0 {
                Slice::from(..)
            } else {
                Slice::from(region.pos[i]..region.pos[i] + region.size[i])
            }
        })
        .to_owned();

    for axis in 0..shape.len() {
        let start = if region.size[axis] == 0 { 0 } else { region.pos[axis] };
        let indices: Vec<usize> = (0..size[axis])
            .map(|k| reflect_index(pos[axis] + k as isize, shape[axis]) - start)
            .collect();
        let identity = indices.len() == out.len_of(Axis(axis))
            && indices.iter().enumerate().all(|(k, &i)| k == i);
        if !identity {
            out = out.select(Axis(axis), &indices);
        }
    }
    Ok(out)
}

/// Read `size` cells starting at `pos`, filling out-of-bounds cells with `fill`.
pub fn sample_region_constant(
    image: &ArrayViewD<'_, f32>,
    pos: &[isize],
    size: &[usize],
    fill: f32,
) -> TileResult<ArrayD<f32>> {
    let region = inner_region(image.shape(), pos, size)?;
    let mut out = ArrayD::from_elem(IxDyn(size), fill);
    if region.is_outside() {
        return Ok(out);
    }

    let data = requested_view(image, &region);
    out.slice_each_axis_mut(|ax| {
        let i = ax.axis.index();
        let before = region.padding[i].0;
        Slice::from(before..before + region.data_len(i))
    })
    .assign(&data);
    Ok(out)
}
