//! # raycompact
//!
//! Stable stream compaction for wavefront path tracers.
//!
//! After every bounce, rays that terminated (missed the scene, hit a light,
//! ran out of bounces) are moved behind the surviving rays, and survivors are
//! packed at the front in their original order. The partition is computed
//! with a hierarchical work-efficient prefix sum followed by a scatter.
//!
//! ## Modules
//!
//! - [`util`] - Errors and power-of-two sizing helpers
//! - [`ray`] - The [`Ray`] predicate trait, [`PathRay`] and [`RayBuffer`]
//! - [`compaction`] - CPU pipeline (rayon): predicate, scan, carry, scatter
//! - `gpu` - wgpu compute pipeline (feature `gpu`)
//!
//! ## Example
//!
//! ```ignore
//! use raycompact::prelude::*;
//!
//! let mut ctx = CompactionContext::new(CompactionConfig::default())?;
//! ctx.prepare_buffers(rays.len())?;
//! let result = ctx.compact(&rays, rays.len(), &mut next)?;
//! let survivors = &next[..result.active_count];
//! ```

pub mod util;
pub mod ray;
pub mod compaction;

// GPU backend (optional, enabled with "gpu" feature)
#[cfg(feature = "gpu")]
pub mod gpu;

// Re-export commonly used types
pub use util::{Error, Result};
pub use ray::{PathRay, Ray, RayBuffer};
pub use compaction::{CompactionConfig, CompactionContext, Compacted};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{Error, Result};
    pub use crate::ray::{PathRay, Ray, RayBuffer, RAY_ABSORBED, RAY_HIT_LIGHT, RAY_MISSED};
    pub use crate::compaction::{CompactionConfig, CompactionContext, Compacted};
    #[cfg(feature = "gpu")]
    pub use crate::gpu::GpuCompaction;
}
