//! Caller-owned compaction context: scratch buffers plus the four passes.
//!
//! ## Usage
//! ```ignore
//! let mut ctx = CompactionContext::new(CompactionConfig::default())?;
//! ctx.prepare_buffers(max_rays)?;
//! loop {
//!     let result = ctx.compact(&rays[..count], count, &mut next)?;
//!     count = result.active_count; // only next[..count] is traced further
//!     std::mem::swap(&mut rays, &mut next);
//! }
//! ```

use rayon::prelude::*;

use super::config::CompactionConfig;
use super::scan::{GroupSums, ScanPass};
use super::{carry, predicate, scan, scatter};
use crate::ray::{Ray, RayBuffer};
use crate::util::{padded_len, Error, Result};

/// Outcome of one compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Compacted {
    /// Surviving rays, packed at the front of the output.
    pub active_count: usize,
    /// Terminated rays, packed right after the survivors.
    pub terminated_count: usize,
}

impl Compacted {
    /// Rays written to the output.
    pub fn ray_count(&self) -> usize {
        self.active_count + self.terminated_count
    }
}

/// Mask, offsets and group sums for one predicate class.
#[derive(Debug, Clone, Default)]
struct MaskScratch {
    mask: Vec<u32>,
    offsets: Vec<u32>,
    sums: GroupSums,
}

impl MaskScratch {
    fn new(len: usize, tile: usize) -> Self {
        Self {
            mask: vec![0; len],
            offsets: vec![0; len],
            sums: GroupSums::for_len(len, tile),
        }
    }

    /// Offsets start as a copy of the mask and are scanned in place.
    fn scan_tiles(&mut self, tile: usize) -> Result<ScanPass> {
        self.offsets.par_iter_mut().zip(self.mask.par_iter()).for_each(|(o, &m)| *o = m);
        scan::scan_tiles(&mut self.offsets, self.sums.levels_mut(), tile)
    }

    fn propagate_carries(&mut self, tile: usize) {
        carry::propagate(&mut self.offsets, self.sums.carries(), tile);
    }
}

/// Read-only view of the scratch state left by the last compaction.
#[derive(Debug, Clone, Copy)]
pub struct ScratchView<'a> {
    pub active_mask: &'a [u32],
    pub terminated_mask: &'a [u32],
    pub active_offsets: &'a [u32],
    pub terminated_offsets: &'a [u32],
    /// Active group sums per level (exclusive prefix totals after a scan).
    pub active_group_sums: &'a [Vec<u32>],
    pub terminated_group_sums: &'a [Vec<u32>],
}

/// Compaction pipeline state.
///
/// Owns every scratch array, so independent contexts can run concurrently.
pub struct CompactionContext {
    config: CompactionConfig,
    capacity: usize,
    padded_len: usize,
    active: MaskScratch,
    terminated: MaskScratch,
}

impl CompactionContext {
    /// Create a context with no scratch allocated yet.
    pub fn new(config: CompactionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            capacity: 0,
            padded_len: 0,
            active: MaskScratch::default(),
            terminated: MaskScratch::default(),
        })
    }

    /// Create a context and size it for `max_ray_count` rays.
    pub fn with_capacity(config: CompactionConfig, max_ray_count: usize) -> Result<Self> {
        let mut ctx = Self::new(config)?;
        ctx.prepare_buffers(max_ray_count)?;
        Ok(ctx)
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Largest ray count `compact` accepts.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Length of every mask array (power of two, whole tiles).
    pub fn padded_len(&self) -> usize {
        self.padded_len
    }

    /// Size scratch for up to `max_ray_count` rays.
    ///
    /// Reallocates only when the padded length changes.
    #[tracing::instrument(skip(self), fields(group_size = self.config.group_size))]
    pub fn prepare_buffers(&mut self, max_ray_count: usize) -> Result<()> {
        let tile = self.config.tile_size();
        let len = padded_len(max_ray_count, tile).ok_or(Error::CapacityTooLarge(max_ray_count))?;

        if len != self.padded_len {
            tracing::debug!(
                padded_len = len,
                levels = GroupSums::for_len(len, tile).levels().len(),
                "reallocating compaction scratch"
            );
            self.active = MaskScratch::new(len, tile);
            self.terminated = MaskScratch::new(len, tile);
            self.padded_len = len;
        }
        self.capacity = max_ray_count;
        Ok(())
    }

    /// Stable-partition `input[..ray_count]` into `output[..ray_count]`.
    ///
    /// Survivors land in `output[..active_count]` and terminated rays in
    /// `output[active_count..ray_count]`, each in original order.
    #[tracing::instrument(skip(self, input, output))]
    pub fn compact<R: Ray>(&mut self, input: &[R], ray_count: usize, output: &mut [R]) -> Result<Compacted> {
        if ray_count > self.capacity {
            return Err(Error::CapacityExceeded { count: ray_count, capacity: self.capacity });
        }
        if input.len() < ray_count {
            return Err(Error::InputTooShort { len: input.len(), count: ray_count });
        }
        if output.len() < ray_count {
            return Err(Error::OutputTooSmall { len: output.len(), required: ray_count });
        }
        if ray_count == 0 {
            return Ok(Compacted::default());
        }

        let rays = &input[..ray_count];
        let tile = self.config.tile_size();

        tracing::trace!("evaluate");
        predicate::evaluate(rays, &mut self.active.mask, &mut self.terminated.mask);

        tracing::trace!("scan");
        let (active_pass, terminated_pass) = rayon::join(
            || self.active.scan_tiles(tile),
            || self.terminated.scan_tiles(tile),
        );
        let (active_pass, terminated_pass) = (active_pass?, terminated_pass?);
        debug_assert_eq!(active_pass, terminated_pass);

        if active_pass == ScanPass::MultiTile {
            tracing::trace!("carry");
            rayon::join(
                || self.active.propagate_carries(tile),
                || self.terminated.propagate_carries(tile),
            );
        }

        tracing::trace!("scatter");
        let active_count = scatter::scatter(
            rays,
            &self.active.mask,
            &self.active.offsets,
            &self.terminated.offsets,
            output,
            tile,
        );

        let result = Compacted {
            active_count,
            terminated_count: ray_count - active_count,
        };
        tracing::debug!(active = result.active_count, terminated = result.terminated_count, "compacted");
        Ok(result)
    }

    /// Compact a whole [`RayBuffer`]; the output length becomes `input.len()`.
    ///
    /// Call `output.truncate(result.active_count)` to keep only survivors.
    pub fn compact_buffer<R: Ray>(&mut self, input: &RayBuffer<R>, output: &mut RayBuffer<R>) -> Result<Compacted> {
        if output.capacity() < input.len() {
            return Err(Error::OutputTooSmall { len: output.capacity(), required: input.len() });
        }
        let result = self.compact(input.as_slice(), input.len(), output.storage_mut())?;
        output.set_len(result.ray_count())?;
        Ok(result)
    }

    /// Scratch state left by the last compaction, for inspection.
    pub fn scratch(&self) -> ScratchView<'_> {
        ScratchView {
            active_mask: &self.active.mask,
            terminated_mask: &self.terminated.mask,
            active_offsets: &self.active.offsets,
            terminated_offsets: &self.terminated.offsets,
            active_group_sums: self.active.sums.levels(),
            terminated_group_sums: self.terminated.sums.levels(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    struct Tagged {
        id: u32,
        alive: bool,
    }

    impl Ray for Tagged {
        fn is_active(&self) -> bool {
            self.alive
        }
    }

    fn rays(pattern: &[u8]) -> Vec<Tagged> {
        pattern
            .iter()
            .enumerate()
            .map(|(i, &v)| Tagged { id: i as u32, alive: v == 1 })
            .collect()
    }

    #[test]
    fn test_prepare_pads_to_tiles() {
        let mut ctx = CompactionContext::new(CompactionConfig::with_group_size(2)).unwrap();
        ctx.prepare_buffers(10).unwrap();
        assert_eq!(ctx.capacity(), 10);
        assert_eq!(ctx.padded_len(), 16);
        assert_eq!(ctx.scratch().active_group_sums.len(), 1);
        assert_eq!(ctx.scratch().active_group_sums[0].len(), 4);

        ctx.prepare_buffers(3).unwrap();
        assert_eq!(ctx.padded_len(), 4);
        assert!(ctx.scratch().active_group_sums.is_empty());
    }

    #[test]
    fn test_offsets_example() {
        let mut ctx = CompactionContext::with_capacity(CompactionConfig::with_group_size(2), 8).unwrap();
        let input = rays(&[1, 1, 0, 1, 1, 0, 1, 1]);
        let mut output = vec![Tagged::default(); 8];
        let result = ctx.compact(&input, 8, &mut output).unwrap();

        let scratch = ctx.scratch();
        assert_eq!(scratch.active_offsets, &[0, 1, 2, 2, 3, 4, 4, 5]);
        assert_eq!(scratch.active_group_sums[0], vec![0, 3]);
        assert_eq!(scratch.terminated_offsets, &[0, 0, 0, 1, 1, 1, 2, 2]);
        assert_eq!(result, Compacted { active_count: 6, terminated_count: 2 });
    }

    #[test]
    fn test_contract_violations() {
        let mut ctx = CompactionContext::with_capacity(CompactionConfig::with_group_size(4), 4).unwrap();
        let input = rays(&[1, 0, 1, 0, 1]);
        let mut output = vec![Tagged::default(); 5];

        assert!(matches!(
            ctx.compact(&input, 5, &mut output),
            Err(Error::CapacityExceeded { count: 5, capacity: 4 })
        ));
        assert!(matches!(
            ctx.compact(&input[..2], 3, &mut output),
            Err(Error::InputTooShort { len: 2, count: 3 })
        ));
        assert!(matches!(
            ctx.compact(&input, 4, &mut output[..3]),
            Err(Error::OutputTooSmall { len: 3, required: 4 })
        ));
    }

    #[test]
    fn test_invalid_group_size() {
        assert!(matches!(
            CompactionContext::new(CompactionConfig::with_group_size(6)),
            Err(Error::InvalidGroupSize(6))
        ));
    }

    #[test]
    fn test_zero_rays() {
        let mut ctx = CompactionContext::with_capacity(CompactionConfig::default(), 0).unwrap();
        let mut output: Vec<Tagged> = Vec::new();
        assert_eq!(ctx.compact(&[], 0, &mut output).unwrap(), Compacted::default());
    }
}
