//! Store configuration and on-disk directory layout.

use std::path::{Path, PathBuf};

/// Default block size for the underlying store (64 KiB).
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default bloom filter density in bits per key.
pub const DEFAULT_BLOOM_BITS_PER_KEY: f64 = 10.0;

/// Default LRU block-cache size per shard (1 MiB).
pub const DEFAULT_LRU_CACHE_BYTES: usize = 1024 * 1024;

/// Default file-descriptor budget handed to each shard's store.
pub const DEFAULT_MAX_OPEN_FILES: i32 = 256;

/// Directory under the data dir holding one subdirectory per shard.
pub const SHARD_DATABASE_DIR: &str = "shard_db";

/// Directory under the data dir holding the write-ahead log.
pub const WAL_DIR: &str = "wal";

/// Configuration for the shard datastore.
///
/// All tunables except `data_dir` affect only resource usage, never
/// query or durability semantics.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for shard and WAL storage.
    pub data_dir: PathBuf,
    /// Block size for the underlying store.
    pub block_size: usize,
    /// Bloom filter density in bits per key.
    pub bloom_bits_per_key: f64,
    /// Block-cache size per shard, in bytes.
    pub lru_cache_bytes: usize,
    /// Maximum open files per shard store.
    pub max_open_files: i32,
}

impl StoreConfig {
    /// Creates a configuration rooted at the given data directory with
    /// default tunables.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            block_size: DEFAULT_BLOCK_SIZE,
            bloom_bits_per_key: DEFAULT_BLOOM_BITS_PER_KEY,
            lru_cache_bytes: DEFAULT_LRU_CACHE_BYTES,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
        }
    }

    /// Sets the store block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the bloom filter density.
    pub fn with_bloom_bits_per_key(mut self, bits: f64) -> Self {
        self.bloom_bits_per_key = bits;
        self
    }

    /// Sets the block-cache size per shard.
    pub fn with_lru_cache_bytes(mut self, bytes: usize) -> Self {
        self.lru_cache_bytes = bytes;
        self
    }

    /// Sets the open-file budget per shard store.
    pub fn with_max_open_files(mut self, max: i32) -> Self {
        self.max_open_files = max;
        self
    }

    /// Returns the directory layout for this configuration.
    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }
}

/// Provides filesystem paths for shards and the WAL under a data directory.
///
/// # Examples
/// ```rust,ignore
/// use lutra_holt::config::DataLayout;
///
/// let layout = DataLayout::new("/data");
/// let dir = layout.shard_dir(7); // /data/shard_db/00007
/// ```
#[derive(Debug, Clone)]
pub struct DataLayout {
    data_dir: PathBuf,
}

impl DataLayout {
    /// Creates a layout rooted at the given data directory.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    /// Returns the root data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Returns the directory holding all shard subdirectories.
    pub fn shard_db_dir(&self) -> PathBuf {
        self.data_dir.join(SHARD_DATABASE_DIR)
    }

    /// Returns the directory for one shard, zero-padded to five digits.
    pub fn shard_dir(&self, shard_id: u32) -> PathBuf {
        self.shard_db_dir().join(format!("{:05}", shard_id))
    }

    /// Returns the directory holding the write-ahead log.
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join(WAL_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_dir_padding() {
        let layout = DataLayout::new("/data");
        assert_eq!(layout.shard_dir(7), PathBuf::from("/data/shard_db/00007"));
        assert_eq!(
            layout.shard_dir(12345),
            PathBuf::from("/data/shard_db/12345")
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = StoreConfig::new("/data");
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.bloom_bits_per_key, DEFAULT_BLOOM_BITS_PER_KEY);
        assert_eq!(config.lru_cache_bytes, DEFAULT_LRU_CACHE_BYTES);
        assert_eq!(config.max_open_files, DEFAULT_MAX_OPEN_FILES);
    }

    #[test]
    fn test_config_builders() {
        let config = StoreConfig::new("/data")
            .with_block_size(4096)
            .with_bloom_bits_per_key(12.0)
            .with_lru_cache_bytes(2 * 1024 * 1024)
            .with_max_open_files(64);
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.bloom_bits_per_key, 12.0);
        assert_eq!(config.lru_cache_bytes, 2 * 1024 * 1024);
        assert_eq!(config.max_open_files, 64);
    }
}
