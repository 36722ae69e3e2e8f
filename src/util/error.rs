//! Error types for ray compaction.

use thiserror::Error;

/// Main error type for compaction operations.
///
/// Every variant except [`Error::Gpu`] is a caller-contract violation detected
/// before any pass runs, so a returned error never leaves a half-written output.
#[derive(Error, Debug)]
pub enum Error {
    /// Group size must be a non-zero power of two
    #[error("Invalid group size {0}: must be a non-zero power of two")]
    InvalidGroupSize(u32),

    /// Requested capacity cannot be addressed with 32-bit offsets
    #[error("Capacity {0} is too large for 32-bit scan offsets")]
    CapacityTooLarge(usize),

    /// Ray count exceeds what `prepare_buffers` sized the scratch for
    #[error("Ray count {count} exceeds prepared capacity {capacity}")]
    CapacityExceeded { count: usize, capacity: usize },

    /// Input holds fewer rays than the declared count
    #[error("Input buffer holds {len} rays, {count} requested")]
    InputTooShort { len: usize, count: usize },

    /// Output cannot hold every compacted ray
    #[error("Output buffer holds {len} rays, {required} required")]
    OutputTooSmall { len: usize, required: usize },

    /// Scan arrays and tiles must both be powers of two
    #[error("Cannot scan {len} elements with tiles of {tile}: both must be powers of two")]
    InvalidScanLength { len: usize, tile: usize },

    /// Scratch levels do not match the array being scanned
    #[error("Scan scratch too small for array of length {0}")]
    ScratchTooSmall(usize),

    /// Group size exceeds what the device can dispatch
    #[error("Group size {group_size} unsupported by device (limit {limit})")]
    GroupSizeUnsupported { group_size: u32, limit: u32 },

    /// A scratch or ray binding would exceed the device's buffer limits
    #[error("Buffer of {size} bytes exceeds device binding limit of {limit} bytes")]
    BufferTooLarge { size: u64, limit: u64 },

    /// GPU device, dispatch or readback failure
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Config file is not valid JSON for the expected shape
    #[error("Invalid config: {0}")]
    Config(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a GPU error from a message.
    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }
}

/// Result type alias for compaction operations.
pub type Result<T> = std::result::Result<T, Error>;
