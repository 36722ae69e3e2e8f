//! Integration tests for JSON compaction config files.

use raycompact::prelude::*;

use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_save_and_load() {
    let temp = NamedTempFile::new().expect("Failed to create temp file");
    let config = CompactionConfig::with_group_size(128);
    config.save(temp.path()).expect("Failed to save config");

    let loaded = CompactionConfig::load(temp.path()).expect("Failed to load config");
    assert_eq!(loaded, config);
    assert_eq!(loaded.tile_size(), 256);
}

#[test]
fn test_missing_fields_use_defaults() {
    let mut temp = NamedTempFile::new().unwrap();
    write!(temp, "{{}}").unwrap();

    let loaded = CompactionConfig::load(temp.path()).unwrap();
    assert_eq!(loaded, CompactionConfig::default());
    assert_eq!(loaded.group_size, 512);
}

#[test]
fn test_invalid_group_size_rejected_on_load() {
    let mut temp = NamedTempFile::new().unwrap();
    write!(temp, r#"{{ "group_size": 300 }}"#).unwrap();

    assert!(matches!(
        CompactionConfig::load(temp.path()),
        Err(Error::InvalidGroupSize(300))
    ));
}

#[test]
fn test_malformed_json() {
    let mut temp = NamedTempFile::new().unwrap();
    write!(temp, "group_size = 64").unwrap();

    assert!(matches!(CompactionConfig::load(temp.path()), Err(Error::Config(_))));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    assert!(matches!(CompactionConfig::load(&path), Err(Error::Io(_))));
}

#[test]
fn test_loaded_config_drives_context() {
    let mut temp = NamedTempFile::new().unwrap();
    write!(temp, r#"{{ "group_size": 4 }}"#).unwrap();
    let config = CompactionConfig::load(temp.path()).unwrap();

    let ctx = CompactionContext::with_capacity(config, 100).unwrap();
    assert_eq!(ctx.config().group_size, 4);
    assert_eq!(ctx.padded_len(), 128);
}
