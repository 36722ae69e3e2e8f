//! Hierarchical work-efficient exclusive prefix sum.
//!
//! ## Algorithm
//! ```text
//! data  ──local scan per tile──►  tile-local offsets   +  one total per tile
//!                                                            │
//!                                    exclusive_scan(totals)  ◄┘  (same algorithm, next level)
//!                                                            │
//! tile-local offsets ──carry::propagate(totals)──► global offsets
//! ```
//!
//! Each tile is scanned with the Blelloch upsweep/downsweep. On CPU one rayon
//! task plays one thread group; the two phases inside a tile run in order, which
//! is what the two group barriers of the GPU kernel guarantee.

use rayon::prelude::*;

use super::carry;
use crate::util::{group_sum_levels, Error, Result};

/// Whether a scan needed the group-of-sums step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPass {
    /// Array fit in one tile; the local scan is already global.
    SingleTile,
    /// Several tiles; per-tile totals were scanned and carries are pending.
    MultiTile,
}

/// Group-sum scratch for one scan array, one `Vec` per recursion level.
#[derive(Debug, Clone, Default)]
pub struct GroupSums {
    levels: Vec<Vec<u32>>,
}

impl GroupSums {
    /// Scratch able to scan an array of `len` elements with tiles of `tile`.
    pub fn for_len(len: usize, tile: usize) -> Self {
        Self {
            levels: group_sum_levels(len, tile)
                .into_iter()
                .map(|n| vec![0; n])
                .collect(),
        }
    }

    /// Per-level group sums, level 0 first.
    pub fn levels(&self) -> &[Vec<u32>] {
        &self.levels
    }

    pub fn levels_mut(&mut self) -> &mut [Vec<u32>] {
        &mut self.levels
    }

    /// Level-0 carries (tile exclusive prefix totals) after a multi-tile scan.
    pub fn carries(&self) -> &[u32] {
        self.levels.first().map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Exclusive scan of one tile in place. Returns the tile total.
///
/// `tile.len()` must be a power of two; [`scan_tiles`] checks this.
pub(crate) fn scan_tile(tile: &mut [u32]) -> u32 {
    let n = tile.len();
    if n == 0 {
        return 0;
    }
    debug_assert!(n.is_power_of_two(), "tile length {n} is not a power of two");

    // Upsweep: partial sums up the implicit binary tree
    let mut offset = 1;
    while offset < n {
        for right in (2 * offset - 1..n).step_by(2 * offset) {
            tile[right] += tile[right - offset];
        }
        offset <<= 1;
    }

    let total = tile[n - 1];
    tile[n - 1] = 0;

    // Downsweep: push prefixes back down
    while offset > 1 {
        offset >>= 1;
        for right in (2 * offset - 1..n).step_by(2 * offset) {
            let left = tile[right - offset];
            tile[right - offset] = tile[right];
            tile[right] += left;
        }
    }

    total
}

/// Local scans plus the group-of-sums scan.
///
/// Leaves `data` with tile-local exclusive offsets and `sums[0]` with each
/// tile's exclusive prefix total. Carries are not applied; see
/// [`carry::propagate`]. `data.len()` and `tile` must be powers of two, and
/// `sums` must be shaped by [`GroupSums::for_len`] for that length.
pub fn scan_tiles(data: &mut [u32], sums: &mut [Vec<u32>], tile: usize) -> Result<ScanPass> {
    if data.is_empty() {
        return Ok(ScanPass::SingleTile);
    }
    if !data.len().is_power_of_two() || !tile.is_power_of_two() {
        return Err(Error::InvalidScanLength { len: data.len(), tile });
    }
    if data.len() <= tile {
        scan_tile(data);
        return Ok(ScanPass::SingleTile);
    }

    let (totals, deeper) = sums
        .split_first_mut()
        .ok_or(Error::ScratchTooSmall(data.len()))?;
    if totals.len() != data.len().div_ceil(tile) {
        return Err(Error::ScratchTooSmall(data.len()));
    }

    data.par_chunks_mut(tile)
        .zip(totals.par_iter_mut())
        .for_each(|(chunk, total)| *total = scan_tile(chunk));

    exclusive_scan(totals, deeper, tile)?;
    Ok(ScanPass::MultiTile)
}

/// Full exclusive prefix sum of `data` in place, at any depth.
pub fn exclusive_scan(data: &mut [u32], sums: &mut [Vec<u32>], tile: usize) -> Result<()> {
    if scan_tiles(data, sums, tile)? == ScanPass::MultiTile {
        carry::propagate(data, &sums[0], tile);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(input: &[u32]) -> Vec<u32> {
        let mut sum = 0;
        input
            .iter()
            .map(|&v| {
                let out = sum;
                sum += v;
                out
            })
            .collect()
    }

    fn pattern(len: usize, seed: u32) -> Vec<u32> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 31) & 1
            })
            .collect()
    }

    #[test]
    fn test_scan_tile() {
        let mut tile = vec![1, 1, 0, 1];
        assert_eq!(scan_tile(&mut tile), 3);
        assert_eq!(tile, vec![0, 1, 2, 2]);

        let mut single = vec![7];
        assert_eq!(scan_tile(&mut single), 7);
        assert_eq!(single, vec![0]);

        assert_eq!(scan_tile(&mut []), 0);
    }

    #[test]
    fn test_two_tile_example() {
        // Group size 2 → tile of 4 elements, two tiles
        let mask = [1, 1, 0, 1, 1, 0, 1, 1];

        let (mut left, mut right) = (mask[..4].to_vec(), mask[4..].to_vec());
        assert_eq!(scan_tile(&mut left), 3);
        assert_eq!(scan_tile(&mut right), 3);
        assert_eq!(left, vec![0, 1, 2, 2]);
        assert_eq!(right, vec![0, 1, 1, 2]);

        let mut data = mask.to_vec();
        let mut sums = GroupSums::for_len(data.len(), 4);
        let pass = scan_tiles(&mut data, sums.levels_mut(), 4).unwrap();
        assert_eq!(pass, ScanPass::MultiTile);
        assert_eq!(data, vec![0, 1, 2, 2, 0, 1, 1, 2]);
        assert_eq!(sums.carries(), &[0, 3]);

        carry::propagate(&mut data, sums.carries(), 4);
        assert_eq!(data, vec![0, 1, 2, 2, 3, 4, 4, 5]);
    }

    #[test]
    fn test_single_tile_skips_group_sums() {
        let mut data = vec![1, 0, 1, 1];
        let mut sums = GroupSums::for_len(4, 8);
        assert!(sums.levels().is_empty());
        assert_eq!(scan_tiles(&mut data, sums.levels_mut(), 8).unwrap(), ScanPass::SingleTile);
        assert_eq!(data, vec![0, 1, 1, 2]);
    }

    #[test]
    fn test_matches_reference_at_every_depth() {
        // (len, tile): 1, 2 and 3 group-sum levels
        for (len, tile) in [(8, 4), (64, 4), (256, 4), (1 << 12, 16), (1 << 14, 1024)] {
            let input = pattern(len, len as u32);
            let mut data = input.clone();
            let mut sums = GroupSums::for_len(len, tile);
            exclusive_scan(&mut data, sums.levels_mut(), tile).unwrap();
            assert_eq!(data, reference(&input), "len={len} tile={tile}");
        }
    }

    #[test]
    fn test_non_power_of_two_lengths_are_rejected() {
        // Twelve elements are not a power-of-two number of tiles
        let mut data = vec![1u32; 12];
        let mut sums = GroupSums::for_len(12, 4);
        let err = exclusive_scan(&mut data, sums.levels_mut(), 4).unwrap_err();
        assert!(matches!(err, Error::InvalidScanLength { len: 12, tile: 4 }));
        assert_eq!(data, vec![1; 12], "rejected input must be left untouched");

        let mut single = vec![1u32; 3];
        assert!(matches!(
            scan_tiles(&mut single, &mut [], 8),
            Err(Error::InvalidScanLength { len: 3, tile: 8 })
        ));

        let mut data = vec![1u32; 16];
        let mut sums = GroupSums::for_len(16, 6);
        assert!(matches!(
            exclusive_scan(&mut data, sums.levels_mut(), 6),
            Err(Error::InvalidScanLength { len: 16, tile: 6 })
        ));

        assert_eq!(scan_tiles(&mut [], &mut [], 4).unwrap(), ScanPass::SingleTile);
    }

    #[test]
    fn test_missing_scratch_is_an_error() {
        let mut data = vec![1; 16];
        let err = exclusive_scan(&mut data, &mut [], 4).unwrap_err();
        assert!(matches!(err, Error::ScratchTooSmall(16)));
    }
}
