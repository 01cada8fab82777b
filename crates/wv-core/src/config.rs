//! Storage configuration
//!
//! The process-wide disk block size cap, plus the persisted storage
//! preferences it is loaded from. `max_disk_block_size` is read once per
//! Sequence construction to derive that sequence's per-block sample
//! bounds; changing it while sequences are live is not supported.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::SampleFormat;

/// Default cap on the byte size of one block file on disk (1 MiB)
pub const DEFAULT_MAX_DISK_BLOCK_SIZE: usize = 1_048_576;

static MAX_DISK_BLOCK_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_MAX_DISK_BLOCK_SIZE);

/// Current process-wide disk block size cap in bytes
#[inline]
pub fn max_disk_block_size() -> usize {
    MAX_DISK_BLOCK_SIZE.load(Ordering::Relaxed)
}

/// Set the process-wide disk block size cap.
///
/// Must not be called while any Sequence is live; sequences capture their
/// block bounds at construction.
pub fn set_max_disk_block_size(bytes: usize) {
    MAX_DISK_BLOCK_SIZE.store(bytes, Ordering::Relaxed);
}

/// Persisted storage preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoragePreferences {
    /// Cap on the byte size of one block file on disk
    pub max_disk_block_size: usize,
    /// Sample format for newly created sequences
    pub default_sample_format: SampleFormat,
}

impl Default for StoragePreferences {
    fn default() -> Self {
        Self {
            max_disk_block_size: DEFAULT_MAX_DISK_BLOCK_SIZE,
            default_sample_format: SampleFormat::Float,
        }
    }
}

impl StoragePreferences {
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        fs::write(path, json)
    }

    /// Default preferences file location
    pub fn default_path() -> PathBuf {
        let base = if cfg!(target_os = "macos") {
            dirs::home_dir()
                .map(|h| h.join("Library/Application Support/WaveVault"))
                .unwrap_or_else(|| PathBuf::from("."))
        } else if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .map(|d| d.join("WaveVault"))
                .unwrap_or_else(|| PathBuf::from("."))
        } else {
            // Linux/other
            dirs::config_dir()
                .map(|d| d.join("wavevault"))
                .unwrap_or_else(|| PathBuf::from("."))
        };
        base.join("storage.json")
    }

    /// Publish these preferences to the process-wide configuration
    pub fn apply(&self) {
        set_max_disk_block_size(self.max_disk_block_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");

        let prefs = StoragePreferences {
            max_disk_block_size: 4096,
            default_sample_format: SampleFormat::Int16,
        };
        prefs.save_to(&path).unwrap();

        let loaded = StoragePreferences::load_from(&path);
        assert_eq!(loaded.max_disk_block_size, 4096);
        assert_eq!(loaded.default_sample_format, SampleFormat::Int16);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let loaded = StoragePreferences::load_from("/nonexistent/storage.json");
        assert_eq!(loaded.max_disk_block_size, DEFAULT_MAX_DISK_BLOCK_SIZE);
    }
}
