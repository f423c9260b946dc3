//! Per-axis arithmetic for region requests that may extend past the image.
//!
//! A request is a `(pos, size)` pair with one entry per image axis. `pos` may be
//! negative and `pos + size` may exceed the shape; everything here works on each
//! axis independently.

use crate::error::{check_arity, TileResult};

/// Per-axis `(before, after)` count of out-of-bounds cells of a request.
pub type Padding = Vec<(usize, usize)>;

/// In-bounds part of a region request.
///
/// `pos`/`size` describe the image region that has to be read to build the
/// requested tile. When the request sticks out of the image the region is grown
/// towards the image interior until it holds enough cells to mirror the padding
/// from, so `size` can be larger than the overlap itself. `tile_offset` is the
/// position of the first requested in-bounds cell inside that region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InnerRegion {
    pub pos: Vec<usize>,
    pub size: Vec<usize>,
    pub tile_offset: Vec<usize>,
    pub padding: Padding,
    /// The size of the original request
    pub tile_size: Vec<usize>,
}

impl InnerRegion {
    /// Number of requested cells along `axis` that lie inside the image.
    pub fn data_len(&self, axis: usize) -> usize {
        let (before, after) = self.padding[axis];
        self.tile_size[axis].saturating_sub(before + after)
    }

    /// True if the request does not touch the image on at least one axis.
    pub fn is_outside(&self) -> bool {
        (0..self.size.len()).any(|axis| self.data_len(axis) == 0)
    }
}

fn check_request(shape: &[usize], pos: &[isize], size: &[usize]) -> TileResult<()> {
    check_arity("position", shape.len(), pos.len())?;
    check_arity("size", shape.len(), size.len())
}

fn axis_padding(shape: usize, pos: isize, size: usize) -> (usize, usize) {
    let before = (-pos).max(0) as usize;
    let after = (pos + size as isize - shape as isize).max(0) as usize;
    (before, after)
}

/// Returns `(inner_pos, inner_size, tile_offset, padding)` for one axis.
fn axis_inner(shape: usize, pos: isize, size: usize) -> (usize, usize, usize, (usize, usize)) {
    let shape_i = shape as isize;
    let lo = pos.max(0);
    let hi = (pos + size as isize).min(shape_i);
    if hi <= lo {
        return (pos.clamp(0, shape_i) as usize, 0, 0, (0, size));
    }

    let (before, after) = axis_padding(shape, pos, size);
    let (lo, hi) = (lo as usize, hi as usize);
    let needed = (hi - lo).max(before).max(after).min(shape);

    let (start, end) = if hi - lo >= needed {
        (lo, hi)
    } else if after > 0 {
        // overlap ends at the upper edge, grow downwards
        (shape - needed, hi)
    } else {
        (lo, lo + needed)
    };
    (start, end - start, lo - start, (before, after))
}

/// Out-of-bounds widths of a request on every axis.
pub fn padding_size(shape: &[usize], pos: &[isize], size: &[usize]) -> TileResult<Padding> {
    check_request(shape, pos, size)?;
    Ok(shape
        .iter()
        .zip(pos.iter().zip(size))
        .map(|(&sh, (&p, &s))| axis_padding(sh, p, s))
        .collect())
}

/// Per-axis distance from `pos` to the last cell of the image.
pub fn distance_to_upper_edge(shape: &[usize], pos: &[isize]) -> TileResult<Vec<isize>> {
    check_arity("position", shape.len(), pos.len())?;
    Ok(shape
        .iter()
        .zip(pos)
        .map(|(&sh, &p)| sh as isize - 1 - p)
        .collect())
}

/// Splits a request into the image region to read and the padding around it.
pub fn inner_region(shape: &[usize], pos: &[isize], size: &[usize]) -> TileResult<InnerRegion> {
    check_request(shape, pos, size)?;

    let ndim = shape.len();
    let mut region = InnerRegion {
        pos: Vec::with_capacity(ndim),
        size: Vec::with_capacity(ndim),
        tile_offset: Vec::with_capacity(ndim),
        padding: Vec::with_capacity(ndim),
        tile_size: size.to_vec(),
    };
    for axis in 0..ndim {
        let (p, s, offset, pad) = axis_inner(shape[axis], pos[axis], size[axis]);
        region.pos.push(p);
        region.size.push(s);
        region.tile_offset.push(offset);
        region.padding.push(pad);
    }
    Ok(region)
}

/// True if any axis needs padding.
pub fn is_padded(padding: &[(usize, usize)]) -> bool {
    padding.iter().any(|&(before, after)| before > 0 || after > 0)
}
