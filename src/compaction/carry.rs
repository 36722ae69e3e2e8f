//! Carry propagation: turn tile-local offsets into global offsets.

use rayon::prelude::*;

/// Add each tile's carry-in to every element of that tile.
///
/// `carries[t]` is the exclusive prefix total of tile `t`. Tile 0 always has a
/// zero carry and is left untouched, so only `[tile, data.len())` is written.
/// Callers skip this entirely when `data.len() <= tile`.
pub fn propagate(data: &mut [u32], carries: &[u32], tile: usize) {
    debug_assert_eq!(carries.len(), data.len().div_ceil(tile));

    data.par_chunks_mut(tile)
        .zip(carries.par_iter())
        .skip(1)
        .for_each(|(chunk, &carry)| {
            for value in chunk {
                *value += carry;
            }
        });
}
