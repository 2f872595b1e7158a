//! Reconstruction from reference sequences

use crate::config::{DedupConfig, PathsConfig};
use crate::error::{Error, Result};
use crate::index::ContentIndex;
use crate::refseq::{self, ReferenceReader};
use crate::report::DecodeReport;
use crate::store::SegmentStore;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// Rebuilds files from their reference sequences
pub struct Duplicator<'a> {
    config: DedupConfig,
    store: &'a SegmentStore,
    index: &'a dyn ContentIndex,
}

impl<'a> Duplicator<'a> {
    pub fn new(
        config: DedupConfig,
        store: &'a SegmentStore,
        index: &'a dyn ContentIndex,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Duplicator {
            config,
            store,
            index,
        })
    }

    fn check_index(&self) -> Result<()> {
        let layout = self.index.layout()?.ok_or(Error::IndexUninitialized)?;
        if layout.segment_size != self.config.segment_size
            || layout.segment_size != self.store.segment_size()
        {
            return Err(Error::LayoutMismatch {
                stored: layout.to_string(),
                configured: format!("segment_size={}", self.config.segment_size),
            });
        }
        Ok(())
    }

    /// Rebuild the file described by `reference` into `output`
    ///
    /// Each slot is read at full stride and cut to the entry's logical
    /// length, so a short tail segment comes back without padding.
    pub fn decode(&self, reference: &Path, output: &Path) -> Result<DecodeReport> {
        let start = Instant::now();

        self.check_index()?;
        let ids = ReferenceReader::open(reference, self.config.id_width)?;

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = refseq::tmp_path(output);
        let mut writer = BufWriter::new(File::create(&tmp_path)?);

        let written = self
            .write_segments(ids, &mut writer)
            .and_then(|counts| {
                writer.flush()?;
                Ok(counts)
            });
        drop(writer);

        let (segments, bytes_written) = match written {
            Ok(counts) => counts,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };
        fs::rename(&tmp_path, output)?;

        debug!(segments, bytes = bytes_written, output = %output.display(), "file reconstructed");

        Ok(DecodeReport {
            file: output
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            segments,
            bytes_written,
            elapsed: start.elapsed(),
        })
    }

    fn write_segments<I, W>(&self, ids: I, writer: &mut W) -> Result<(u64, u64)>
    where
        I: Iterator<Item = Result<u32>>,
        W: Write,
    {
        let mut segments = 0u64;
        let mut bytes_written = 0u64;

        for id in ids {
            let id = id?;
            let entry = self.index.find_by_id(id)?.ok_or(Error::UnresolvedId(id))?;

            let data = self
                .store
                .read(&entry.slot.container, entry.slot.slot)?
                .ok_or_else(|| Error::MissingSegmentContainer {
                    container: entry.slot.container.clone(),
                    slot: entry.slot.slot,
                })?;

            let len = (entry.len as usize).min(data.len());
            writer.write_all(&data[..len])?;
            segments += 1;
            bytes_written += len as u64;
        }

        Ok((segments, bytes_written))
    }

    /// Decode `reference_dir/name` into `output_dir/<name without .bin>`
    pub fn decode_file(&self, paths: &PathsConfig, name: &str) -> Result<DecodeReport> {
        let reference = paths.reference_dir.join(name);
        let output = paths.output_dir.join(refseq::original_name(name));
        let report = self.decode(&reference, &output)?;
        report.log();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::Deduplicator;
    use crate::hash::HashAlgorithm;
    use crate::index::{IndexLayout, MemoryIndex};
    use crate::store::SlotRef;
    use tempfile::tempdir;

    fn config() -> DedupConfig {
        DedupConfig {
            segment_size: 4,
            container_capacity: 2,
            id_width: 2,
            hash: HashAlgorithm::Md5,
        }
    }

    #[test]
    fn test_roundtrip_short_tail() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::open(dir.path().join("segments"), 4, 2).unwrap();
        let index = MemoryIndex::new();

        let source = dir.path().join("src.txt");
        let reference = dir.path().join("src.txt.bin");
        let output = dir.path().join("out").join("src.txt");
        let data = b"the quick brown fox jumps over the lazy dog";
        fs::write(&source, data).unwrap();

        Deduplicator::new(config(), &store, &index)
            .unwrap()
            .encode(&source, &reference)
            .unwrap();
        let report = Duplicator::new(config(), &store, &index)
            .unwrap()
            .decode(&reference, &output)
            .unwrap();

        assert_eq!(fs::read(&output).unwrap(), data);
        assert_eq!(report.bytes_written, data.len() as u64);
        assert_eq!(report.segments, 11);
    }

    #[test]
    fn test_uninitialized_index() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::open(dir.path(), 4, 2).unwrap();
        let index = MemoryIndex::new();
        fs::write(dir.path().join("x.bin"), [0u8, 1]).unwrap();

        let result = Duplicator::new(config(), &store, &index)
            .unwrap()
            .decode(&dir.path().join("x.bin"), &dir.path().join("x"));
        assert!(matches!(result, Err(Error::IndexUninitialized)));
    }

    fn initialized_index() -> MemoryIndex {
        let index = MemoryIndex::new();
        index
            .initialize(&IndexLayout {
                hash: HashAlgorithm::Md5,
                segment_size: 4,
            })
            .unwrap();
        index
    }

    #[test]
    fn test_unresolved_id() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::open(dir.path(), 4, 2).unwrap();
        let index = initialized_index();
        fs::write(dir.path().join("x.bin"), [0u8, 7]).unwrap();

        let output = dir.path().join("x");
        let result = Duplicator::new(config(), &store, &index)
            .unwrap()
            .decode(&dir.path().join("x.bin"), &output);

        assert!(matches!(result, Err(Error::UnresolvedId(7))));
        assert!(!output.exists());
        assert!(!refseq::tmp_path(&output).exists());
    }

    #[test]
    fn test_unsealed_container_surfaces_missing() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::open(dir.path(), 4, 2).unwrap();
        let index = initialized_index();

        // Entry registered, but its container was never sealed
        let digest = HashAlgorithm::Md5.digest(b"abcd");
        let slot = SlotRef {
            container: "segments_never_sealed.bin".to_string(),
            slot: 0,
        };
        let id = index.register_new(&digest, slot, 4).unwrap();
        fs::write(dir.path().join("x.bin"), [0u8, id as u8]).unwrap();

        let result = Duplicator::new(config(), &store, &index)
            .unwrap()
            .decode(&dir.path().join("x.bin"), &dir.path().join("x"));
        assert!(matches!(
            result,
            Err(Error::MissingSegmentContainer { slot: 0, .. })
        ));
    }

    #[test]
    fn test_segment_size_mismatch() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::open(dir.path(), 4, 2).unwrap();
        let index = MemoryIndex::new();
        index
            .initialize(&IndexLayout {
                hash: HashAlgorithm::Md5,
                segment_size: 8,
            })
            .unwrap();
        fs::write(dir.path().join("x.bin"), b"").unwrap();

        let result = Duplicator::new(config(), &store, &index)
            .unwrap()
            .decode(&dir.path().join("x.bin"), &dir.path().join("x"));
        assert!(matches!(result, Err(Error::LayoutMismatch { .. })));
    }
}
