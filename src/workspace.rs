//! Opened data directory: configuration, segment store and index together
//!
//! The index handle is acquired in [`Workspace::open`] and released in
//! [`Workspace::close`], so each CLI run owns it for exactly its duration.

use crate::config::Config;
use crate::dedup::{Deduplicator, Duplicator};
use crate::error::Result;
use crate::index::{ContentIndex, SledIndex};
use crate::report::{dir_size, file_byte_errors, BatchSummary};
use crate::store::SegmentStore;
use std::fs;
use std::path::Path;
use tracing::info;

/// Summary of what is stored
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub index_initialized: bool,
    pub index_entries: u64,
    /// Sum of occurrences over all entries
    pub total_occurrences: u64,
    pub containers: usize,
    pub container_bytes: u64,
    pub reference_bytes: u64,
    pub source_bytes: u64,
}

impl StoreStats {
    /// Source bytes over everything the dedup representation occupies
    pub fn compression_ratio(&self) -> f64 {
        crate::report::compression_ratio(
            self.source_bytes,
            self.container_bytes + self.reference_bytes,
        )
    }
}

pub struct Workspace {
    config: Config,
    store: SegmentStore,
    index: SledIndex,
}

impl Workspace {
    /// Create directories and open the store and index
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        config.ensure_directories()?;

        let store = SegmentStore::open(
            &config.paths.segment_dir,
            config.dedup.segment_size,
            config.dedup.container_capacity,
        )?;
        let index = SledIndex::open(&config.index.path)?
            .with_flush_on_write(config.index.flush_on_write);

        Ok(Workspace {
            config,
            store,
            index,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    pub fn index(&self) -> &SledIndex {
        &self.index
    }

    pub fn deduplicator(&self) -> Result<Deduplicator<'_>> {
        Deduplicator::new(self.config.dedup, &self.store, &self.index)
    }

    pub fn duplicator(&self) -> Result<Duplicator<'_>> {
        Duplicator::new(self.config.dedup, &self.store, &self.index)
    }

    /// Create the index for the configured layout
    pub fn initialize(&self) -> Result<()> {
        let layout = self.deduplicator()?.layout();
        self.index.initialize(&layout)
    }

    /// Regular files in a directory, sorted by name
    fn list_files(dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if !dir.exists() {
            return Ok(names);
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Files waiting to be encoded
    pub fn source_files(&self) -> Result<Vec<String>> {
        Self::list_files(&self.config.paths.source_dir)
    }

    /// Published reference sequences
    pub fn reference_files(&self) -> Result<Vec<String>> {
        Ok(Self::list_files(&self.config.paths.reference_dir)?
            .into_iter()
            .filter(|name| name.ends_with(".bin"))
            .collect())
    }

    /// Clear, then encode, decode and verify every source file ending in `ext`
    pub fn run_batch(&self, ext: Option<&str>) -> Result<BatchSummary> {
        self.clear()?;

        let paths = &self.config.paths;
        let files: Vec<String> = self
            .source_files()?
            .into_iter()
            .filter(|name| ext.map_or(true, |ext| name.ends_with(ext)))
            .collect();
        let mut summary = BatchSummary::default();

        let dedup = self.deduplicator()?;
        for file in &files {
            summary.add_encode(&dedup.encode_file(paths, file)?);
        }

        let dup = self.duplicator()?;
        for reference in self.reference_files()? {
            summary.add_decode(&dup.decode_file(paths, &reference)?);
        }

        for file in &files {
            summary.byte_errors +=
                file_byte_errors(&paths.source_dir.join(file), &paths.output_dir.join(file))?;
        }

        summary.stored_bytes = dir_size(&paths.segment_dir)? + dir_size(&paths.reference_dir)?;
        Ok(summary)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let entries = self.index.entries()?;
        Ok(StoreStats {
            index_initialized: self.index.exists()?,
            index_entries: entries.len() as u64,
            total_occurrences: entries.iter().map(|e| e.occurrences as u64).sum(),
            containers: self.store.containers()?.len(),
            container_bytes: self.store.disk_usage()?,
            reference_bytes: dir_size(&self.config.paths.reference_dir)?,
            source_bytes: dir_size(&self.config.paths.source_dir)?,
        })
    }

    /// Drop the index and delete containers, references and reconstructions
    pub fn clear(&self) -> Result<()> {
        if self.index.exists()? {
            self.index.clear()?;
        }
        let containers = self.store.clear()?;

        let mut removed = 0;
        for dir in [&self.config.paths.reference_dir, &self.config.paths.output_dir] {
            for name in Self::list_files(dir)? {
                fs::remove_file(dir.join(name))?;
                removed += 1;
            }
        }

        info!(containers, files = removed, "cleared deduplication state");
        Ok(())
    }

    /// Flush the index and release it
    pub fn close(self) -> Result<()> {
        self.index.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_encode_stats_clear() {
        let dir = tempdir().unwrap();
        let mut config = Config::with_data_dir(dir.path());
        config.dedup.segment_size = 8;
        let workspace = Workspace::open(config).unwrap();

        let paths = workspace.config().paths.clone();
        fs::write(paths.source_dir.join("a.txt"), b"0123456701234567tail").unwrap();

        let report = workspace
            .deduplicator()
            .unwrap()
            .encode_file(&paths, "a.txt")
            .unwrap();
        assert_eq!(report.repeated_segments, 1);
        assert_eq!(workspace.reference_files().unwrap(), vec!["a.txt.bin"]);

        workspace
            .duplicator()
            .unwrap()
            .decode_file(&paths, "a.txt.bin")
            .unwrap();
        assert_eq!(
            fs::read(paths.output_dir.join("a.txt")).unwrap(),
            b"0123456701234567tail"
        );

        let stats = workspace.stats().unwrap();
        assert!(stats.index_initialized);
        assert_eq!(stats.index_entries, 2);
        assert_eq!(stats.total_occurrences, 3);
        assert_eq!(stats.containers, 1);
        assert_eq!(stats.container_bytes, 16);
        assert_eq!(stats.reference_bytes, 9);

        workspace.clear().unwrap();
        let stats = workspace.stats().unwrap();
        assert!(!stats.index_initialized);
        assert_eq!(stats.containers, 0);
        assert!(workspace.reference_files().unwrap().is_empty());
        assert_eq!(workspace.source_files().unwrap(), vec!["a.txt"]);

        workspace.close().unwrap();
    }

    #[test]
    fn test_run_batch_filters_by_extension() {
        let dir = tempdir().unwrap();
        let mut config = Config::with_data_dir(dir.path());
        config.dedup.segment_size = 4;
        let workspace = Workspace::open(config).unwrap();

        let paths = workspace.config().paths.clone();
        fs::write(paths.source_dir.join("notes.txt"), b"abcdabcdabcd").unwrap();
        fs::write(paths.source_dir.join("song.mp3"), b"wxyz").unwrap();

        let summary = workspace.run_batch(Some(".txt")).unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.total_segments, 3);
        assert_eq!(summary.repeated_segments, 2);
        assert_eq!(summary.byte_errors, 0);
        assert_eq!(summary.original_bytes, 12);
        assert_eq!(summary.stored_bytes, 4 + 3 * 3);
        assert_eq!(workspace.reference_files().unwrap(), vec!["notes.txt.bin"]);

        // Every run starts from a cleared index
        let again = workspace.run_batch(None).unwrap();
        assert_eq!(again.files, 2);
        assert_eq!(again.repeated_segments, 2);
        assert_eq!(workspace.index().len().unwrap(), 2);

        workspace.close().unwrap();
    }
}
