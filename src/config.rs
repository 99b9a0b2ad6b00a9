//! Store configuration.

use std::path::Path;

use log::debug;

use crate::error::Result;
use crate::store::WeatherStore;

/// Default engine page cache size (1 GiB).
///
/// The cache is the headroom the engine grows into before it has to evict;
/// size it well above the working set so writes never stall on eviction.
pub const DEFAULT_CACHE_SIZE: usize = 1024 * 1024 * 1024;

/// Default name of the database file inside the store directory.
pub const DEFAULT_FILE_NAME: &str = "weatherboi.redb";

/// Builder for configuring and opening a [`WeatherStore`].
///
/// # Example
///
/// ```no_run
/// use weatherboi::StoreBuilder;
///
/// # fn main() -> Result<(), weatherboi::Error> {
/// let store = StoreBuilder::new()
///     .cache_size(256 * 1024 * 1024)
///     .open("/var/lib/weatherboi")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StoreBuilder {
    cache_size: usize,
    file_name: String,
}

impl StoreBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            file_name: DEFAULT_FILE_NAME.to_string(),
        }
    }

    /// Sets the engine page cache size in bytes.
    ///
    /// Default: 1 GiB
    #[must_use]
    pub fn cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = bytes;
        self
    }

    /// Sets the database file name used inside the store directory.
    ///
    /// Default: `weatherboi.redb`
    #[must_use]
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    /// Opens or creates the store in `dir`, creating the directory if needed.
    ///
    /// Every table is created up front in one write transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database
    /// file cannot be opened.
    pub fn open(self, dir: impl AsRef<Path>) -> Result<WeatherStore> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        debug!(
            "opening weather store at {} (cache {} bytes)",
            path.display(),
            self.cache_size
        );
        let mut builder = redb::Builder::new();
        builder.set_cache_size(self.cache_size);
        let db = builder.create(&path)?;
        WeatherStore::initialize(db, path)
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_default() {
        let builder = StoreBuilder::new();
        assert_eq!(builder.cache_size, DEFAULT_CACHE_SIZE);
        assert_eq!(builder.file_name, DEFAULT_FILE_NAME);
    }

    #[test]
    fn test_builder_custom_settings() {
        let builder = StoreBuilder::new()
            .cache_size(16 * 1024 * 1024)
            .file_name("station.redb");
        assert_eq!(builder.cache_size, 16 * 1024 * 1024);
        assert_eq!(builder.file_name, "station.redb");
    }

    #[test]
    fn test_builder_open_creates_directory() {
        let tmpdir = TempDir::new().unwrap();
        let dir = tmpdir.path().join("nested").join("store");
        let store = StoreBuilder::new()
            .cache_size(16 * 1024 * 1024)
            .file_name("station.redb")
            .open(&dir)
            .unwrap();

        assert_eq!(store.path(), dir.join("station.redb"));
        assert!(store.path().exists());
        assert!(store.pinned_identity().unwrap().is_none());
    }
}
