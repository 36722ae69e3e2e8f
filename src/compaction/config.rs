//! Compaction tuning: the thread-group size shared by host and kernels.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::util::{Error, Result};

/// Default lanes per thread group.
pub const DEFAULT_GROUP_SIZE: u32 = 512;

/// Compaction configuration.
///
/// The scan reduces two elements per lane, so one tile covers
/// `2 * group_size` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Lanes per thread group; must be a power of two.
    pub group_size: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            group_size: DEFAULT_GROUP_SIZE,
        }
    }
}

impl CompactionConfig {
    /// Config with the given group size (not yet validated).
    pub fn with_group_size(group_size: u32) -> Self {
        Self { group_size }
    }

    /// Load config from a JSON file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Reject group sizes the scan cannot tile with.
    pub fn validate(&self) -> Result<()> {
        if !self.group_size.is_power_of_two() {
            return Err(Error::InvalidGroupSize(self.group_size));
        }
        Ok(())
    }

    /// Elements covered by one tile.
    #[inline]
    pub fn tile_size(&self) -> usize {
        self.group_size as usize * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = CompactionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tile_size(), 1024);
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        for size in [0, 3, 100, 513] {
            let err = CompactionConfig::with_group_size(size).validate().unwrap_err();
            assert!(matches!(err, Error::InvalidGroupSize(s) if s == size));
        }
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: CompactionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CompactionConfig::default());

        let config: CompactionConfig = serde_json::from_str(r#"{"group_size": 64}"#).unwrap();
        assert_eq!(config.tile_size(), 128);
    }
}
