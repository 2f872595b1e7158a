//! Configuration management for fixdedup

use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default segment size in bytes
pub const DEFAULT_SEGMENT_SIZE: usize = 20;

/// Default container capacity in segments
pub const DEFAULT_CONTAINER_CAPACITY: u32 = 1000;

/// Default reference id width in bytes
pub const DEFAULT_ID_WIDTH: usize = 3;

/// Ids are u32, so at most 4 bytes are meaningful
pub const MAX_ID_WIDTH: usize = 4;

/// Identity digests are stored as index keys; keep them small
pub const MAX_IDENTITY_SEGMENT_SIZE: usize = 1024;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Segmenting and encoding parameters
    pub dedup: DedupConfig,

    /// Working directories
    pub paths: PathsConfig,

    /// Content index location
    pub index: IndexConfig,

    /// Root of all data directories
    pub data_dir: PathBuf,
}

/// Segmenting and encoding parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Segment size S in bytes
    pub segment_size: usize,

    /// Segments per container F
    pub container_capacity: u32,

    /// Width I of each id in a reference sequence, in bytes
    pub id_width: usize,

    /// Hash family used to fingerprint segments
    pub hash: HashAlgorithm,
}

/// Working directories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Files to encode
    pub source_dir: PathBuf,

    /// Encoded reference sequences (`<name>.bin`)
    pub reference_dir: PathBuf,

    /// Sealed segment containers
    pub segment_dir: PathBuf,

    /// Reconstructed files
    pub output_dir: PathBuf,
}

/// Content index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Path to the sled database
    pub path: PathBuf,

    /// Flush the index after every write (slow, but crash-safe per segment)
    pub flush_on_write: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fixdedup");
        Config::with_data_dir(data_dir)
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        DedupConfig {
            segment_size: DEFAULT_SEGMENT_SIZE,
            container_capacity: DEFAULT_CONTAINER_CAPACITY,
            id_width: DEFAULT_ID_WIDTH,
            hash: HashAlgorithm::Md5,
        }
    }
}

impl DedupConfig {
    /// Largest id representable in `id_width` bytes
    pub fn max_id(&self) -> u64 {
        if self.id_width >= 8 {
            u64::MAX
        } else {
            (1u64 << (8 * self.id_width)) - 1
        }
    }

    /// Validate the dedup parameters
    pub fn validate(&self) -> Result<()> {
        if self.segment_size == 0 {
            return Err(Error::InvalidConfig(
                "Segment size must be greater than 0".to_string(),
            ));
        }

        if self.container_capacity == 0 {
            return Err(Error::InvalidConfig(
                "Container capacity must be greater than 0".to_string(),
            ));
        }

        if self.id_width == 0 || self.id_width > MAX_ID_WIDTH {
            return Err(Error::InvalidConfig(format!(
                "Id width must be between 1 and {} bytes",
                MAX_ID_WIDTH
            )));
        }

        if self.hash == HashAlgorithm::None && self.segment_size > MAX_IDENTITY_SEGMENT_SIZE {
            return Err(Error::InvalidConfig(format!(
                "Identity hashing requires a segment size of at most {} bytes",
                MAX_IDENTITY_SEGMENT_SIZE
            )));
        }

        Ok(())
    }
}

impl PathsConfig {
    /// Standard layout under a data directory
    pub fn under(data_dir: &Path) -> Self {
        PathsConfig {
            source_dir: data_dir.join("original"),
            reference_dir: data_dir.join("compressed").join("files"),
            segment_dir: data_dir.join("compressed").join("segments"),
            output_dir: data_dir.join("decompressed"),
        }
    }
}

impl Config {
    /// Default configuration rooted at `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Config {
            dedup: DedupConfig::default(),
            paths: PathsConfig::under(&data_dir),
            index: IndexConfig {
                path: data_dir.join("index.db"),
                flush_on_write: false,
            },
            data_dir,
        }
    }

    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Create a config from defaults and environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("FIXDEDUP_DATA_DIR") {
            Ok(dir) if !dir.trim().is_empty() => Config::with_data_dir(dir.trim()),
            _ => Config::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Move to another data directory
    ///
    /// Paths still at their default location under the old data directory
    /// follow it; paths set explicitly are kept.
    pub fn rebase(&mut self, data_dir: impl Into<PathBuf>) {
        fn follow(path: &mut PathBuf, old: PathBuf, new: PathBuf) {
            if *path == old {
                *path = new;
            }
        }

        let data_dir = data_dir.into();
        let old = PathsConfig::under(&self.data_dir);
        let new = PathsConfig::under(&data_dir);
        follow(&mut self.paths.source_dir, old.source_dir, new.source_dir);
        follow(&mut self.paths.reference_dir, old.reference_dir, new.reference_dir);
        follow(&mut self.paths.segment_dir, old.segment_dir, new.segment_dir);
        follow(&mut self.paths.output_dir, old.output_dir, new.output_dir);
        follow(
            &mut self.index.path,
            self.data_dir.join("index.db"),
            data_dir.join("index.db"),
        );
        self.data_dir = data_dir;
    }

    /// Apply environment variable overrides to configuration
    ///
    /// `FIXDEDUP_DATA_DIR` rebases only the paths that are still at their
    /// defaults; see [`Config::rebase`].
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("FIXDEDUP_DATA_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() && Path::new(dir) != self.data_dir {
                self.rebase(dir);
            }
        }

        if let Ok(size) = std::env::var("FIXDEDUP_SEGMENT_SIZE") {
            if let Ok(size) = size.trim().parse::<usize>() {
                self.dedup.segment_size = size;
            }
        }

        if let Ok(capacity) = std::env::var("FIXDEDUP_CONTAINER_CAPACITY") {
            if let Ok(capacity) = capacity.trim().parse::<u32>() {
                self.dedup.container_capacity = capacity;
            }
        }

        if let Ok(width) = std::env::var("FIXDEDUP_ID_WIDTH") {
            if let Ok(width) = width.trim().parse::<usize>() {
                self.dedup.id_width = width;
            }
        }

        if let Ok(hash) = std::env::var("FIXDEDUP_HASH") {
            if let Ok(hash) = hash.parse::<HashAlgorithm>() {
                self.dedup.hash = hash;
            }
        }

        if let Ok(path) = std::env::var("FIXDEDUP_INDEX_PATH") {
            let path = path.trim();
            if !path.is_empty() {
                self.index.path = PathBuf::from(path);
            }
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.dedup.validate()
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.paths.source_dir)?;
        std::fs::create_dir_all(&self.paths.reference_dir)?;
        std::fs::create_dir_all(&self.paths.segment_dir)?;
        std::fs::create_dir_all(&self.paths.output_dir)?;
        Ok(())
    }
}
