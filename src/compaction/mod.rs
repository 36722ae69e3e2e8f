//! CPU compaction pipeline built on rayon.
//!
//! Runs the four passes once per bounce over one ray buffer:
//!
//! ## Architecture
//! ```text
//! rays → predicate::evaluate → active / terminated masks
//!      → scan::scan_tiles     → tile-local offsets + scanned group sums
//!      → carry::propagate     → global exclusive offsets   (only when > 1 tile)
//!      → scatter::scatter     → survivors | terminated, both in original order
//! ```
//!
//! A rayon task stands in for one thread group and owns one tile of
//! `2 * group_size` elements, so results are identical to the GPU kernels.

pub mod carry;
pub mod config;
pub mod context;
pub mod predicate;
pub mod scan;
pub mod scatter;

pub use config::{CompactionConfig, DEFAULT_GROUP_SIZE};
pub use context::{Compacted, CompactionContext, ScratchView};
pub use scan::{exclusive_scan, GroupSums, ScanPass};
