//! GPU compaction backend built on WGSL compute shaders.
//!
//! Same four passes as the CPU pipeline, one dispatch per stage, over
//! [`PathRay`](crate::ray::PathRay) storage buffers.
//!
//! ## Architecture
//! ```text
//! evaluate → scan(level 0..k) → carry(level k-1..0) → scatter
//! ```
//! Masks are scanned in place, so the scatter kernel re-evaluates the ray
//! predicate instead of reading a mask. The active count is the grand total
//! left in the deepest scan level.

pub mod compute;
pub mod device;

pub use compute::GpuCompaction;
pub use device::{read_buffer, request_device, request_device_with_limits};
