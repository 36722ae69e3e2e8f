//! Scatter: stable two-way partition driven by the scanned offsets.
//!
//! Active ray `i` goes to `active_offsets[i]`, terminated ray `i` to
//! `active_count + terminated_offsets[i]`. Within one tile both destinations
//! are contiguous runs starting at the offsets of the tile's first element, so
//! the output is carved into one disjoint front slice and one disjoint back
//! slice per tile and tiles write in parallel without sharing anything.

use rayon::prelude::*;

use crate::ray::Ray;

/// Total number of active rays among the first `count` slots.
///
/// `active_offsets[count - 1] + active[count - 1]`, i.e. the last running total.
#[inline]
pub fn active_count(active: &[u32], active_offsets: &[u32], count: usize) -> usize {
    match count {
        0 => 0,
        n => (active_offsets[n - 1] + active[n - 1]) as usize,
    }
}

/// Scatter `input` into `output[..input.len()]`. Returns the active count.
///
/// Offsets must be global exclusive prefix sums of the masks over at least
/// `input.len()` slots.
pub fn scatter<R: Ray>(
    input: &[R],
    active: &[u32],
    active_offsets: &[u32],
    terminated_offsets: &[u32],
    output: &mut [R],
    tile: usize,
) -> usize {
    let n = input.len();
    let active_total = active_count(active, active_offsets, n);
    if n == 0 {
        return 0;
    }
    debug_assert!(output.len() >= n);

    // [start, end) of each tile's run inside one region
    let runs = |offsets: &[u32], total: usize| -> Vec<usize> {
        (0..n.div_ceil(tile))
            .map(|t| {
                let start = t * tile;
                let end = start + tile;
                let run_end = if end < n { offsets[end] as usize } else { total };
                run_end - offsets[start] as usize
            })
            .collect()
    };
    let front_lens = runs(active_offsets, active_total);
    let back_lens = runs(terminated_offsets, n - active_total);

    let (front, back) = output[..n].split_at_mut(active_total);
    let fronts = carve(front, &front_lens);
    let backs = carve(back, &back_lens);

    input
        .par_chunks(tile)
        .zip(fronts)
        .zip(backs)
        .enumerate()
        .for_each(|(t, ((rays, front), back))| {
            let start = t * tile;
            let front_base = active_offsets[start];
            let back_base = terminated_offsets[start];
            for (i, ray) in (start..).zip(rays) {
                if active[i] == 1 {
                    front[(active_offsets[i] - front_base) as usize] = *ray;
                } else {
                    back[(terminated_offsets[i] - back_base) as usize] = *ray;
                }
            }
        });

    active_total
}

/// Split `region` into consecutive disjoint slices of the given lengths.
fn carve<'a, R>(mut region: &'a mut [R], lens: &[usize]) -> Vec<&'a mut [R]> {
    lens.iter()
        .map(|&len| {
            let (head, tail) = std::mem::take(&mut region).split_at_mut(len);
            region = tail;
            head
        })
        .collect()
}
