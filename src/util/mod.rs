//! Utility types and functions for ray compaction.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - Power-of-two sizing helpers for scan arrays

mod error;
mod math;

pub use error::*;
pub use math::*;
