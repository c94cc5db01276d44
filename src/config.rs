//! Runtime configuration for a store instance.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of resident entries the write-buffer will hold before it
/// must start evicting clean entries to make room for new writes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the page file. The value heap and snapshot files are derived
    /// from this path (`{page_file_path}-entries`, `{page_file_path}-snapshot`, ...).
    pub page_file_path: PathBuf,
    /// Number of entries the in-memory write-buffer may hold at once.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Dirty-entry count at which `Store::write` proactively flushes.
    /// Defaults to `buffer_capacity` when unset.
    #[serde(default)]
    pub auto_flush_threshold: Option<usize>,
}

const fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_file_path: PathBuf::from("simplekv"),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            auto_flush_threshold: None,
        }
    }
}

impl StoreConfig {
    /// Configuration pointing at `path`, with every other setting at its
    /// default. An empty (or all-whitespace) path falls back to
    /// `"simplekv"` in the current directory; see
    /// [`crate::fsutil::normalize_store_path`].
    #[must_use]
    pub fn at_path<P: AsRef<Path>>(path: P) -> Self {
        let normalized = crate::fsutil::normalize_store_path(path.as_ref().to_str());
        Self { page_file_path: normalized, ..Self::default() }
    }

    /// Effective flush threshold: `auto_flush_threshold` if set, else `buffer_capacity`.
    #[must_use]
    pub fn flush_threshold(&self) -> usize {
        self.auto_flush_threshold.unwrap_or(self.buffer_capacity)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or does not parse as a valid config.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, crate::errors::KvError> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| crate::errors::KvError::Corruption(format!("invalid config: {e}")))
    }

    #[must_use]
    pub fn value_heap_path(&self) -> PathBuf {
        append_suffix(&self.page_file_path, "-entries")
    }

    #[must_use]
    pub fn page_snapshot_path(&self) -> PathBuf {
        append_suffix(&self.page_file_path, "-snapshot")
    }

    #[must_use]
    pub fn value_snapshot_path(&self) -> PathBuf {
        append_suffix(&self.page_file_path, "-entries-snapshot")
    }
}

fn append_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s = base.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths_are_siblings() {
        let cfg = StoreConfig::at_path("/tmp/mystore");
        assert_eq!(cfg.value_heap_path(), PathBuf::from("/tmp/mystore-entries"));
        assert_eq!(cfg.page_snapshot_path(), PathBuf::from("/tmp/mystore-snapshot"));
        assert_eq!(cfg.value_snapshot_path(), PathBuf::from("/tmp/mystore-entries-snapshot"));
    }

    #[test]
    fn flush_threshold_defaults_to_capacity() {
        let cfg = StoreConfig { buffer_capacity: 64, auto_flush_threshold: None, ..StoreConfig::default() };
        assert_eq!(cfg.flush_threshold(), 64);
    }

    #[test]
    fn empty_path_falls_back_to_default_name() {
        let cfg = StoreConfig::at_path("");
        assert_eq!(cfg.page_file_path.file_name().and_then(|s| s.to_str()), Some("simplekv"));
    }
}
