//! Deduplicating encoder

use crate::chunk::{Chunker, Segment};
use crate::config::{DedupConfig, PathsConfig};
use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;
use crate::index::{ContentIndex, IndexLayout};
use crate::refseq::{self, ReferenceWriter};
use crate::report::EncodeReport;
use crate::store::{ContainerWriter, SegmentStore};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Encodes files against a shared index and segment store
pub struct Deduplicator<'a> {
    config: DedupConfig,
    store: &'a SegmentStore,
    index: &'a dyn ContentIndex,
}

impl<'a> Deduplicator<'a> {
    pub fn new(
        config: DedupConfig,
        store: &'a SegmentStore,
        index: &'a dyn ContentIndex,
    ) -> Result<Self> {
        config.validate()?;
        if store.segment_size() != config.segment_size {
            return Err(Error::InvalidConfig(format!(
                "Segment store stride {} does not match segment size {}",
                store.segment_size(),
                config.segment_size
            )));
        }
        Ok(Deduplicator {
            config,
            store,
            index,
        })
    }

    pub fn layout(&self) -> IndexLayout {
        IndexLayout {
            hash: self.config.hash,
            segment_size: self.config.segment_size,
        }
    }

    /// Encode `source` into a reference sequence at `reference`
    ///
    /// The reference file is only written once every segment has been
    /// indexed and every new container sealed. A failed run publishes no
    /// reference but still seals the containers its registered entries
    /// point at.
    pub fn encode(&self, source: &Path, reference: &Path) -> Result<EncodeReport> {
        let start = Instant::now();

        let chunker = Chunker::with_size(self.config.segment_size);
        let segments = chunker.open(source)?;

        self.index.initialize(&self.layout())?;

        let mut session = EncoderSession::new(
            self.config.hash,
            self.index,
            self.store.writer(),
            self.config.id_width,
        );
        if let Err(e) = session.process_all(segments) {
            session.abort();
            return Err(e);
        }
        let (refs, mut report) = session.finish()?;
        refs.publish(reference)?;

        report.file = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        report.elapsed = start.elapsed();
        Ok(report)
    }

    /// Encode `source_dir/name` into `reference_dir/name.bin`
    pub fn encode_file(&self, paths: &PathsConfig, name: &str) -> Result<EncodeReport> {
        let source = paths.source_dir.join(name);
        let reference = refseq::reference_path(&paths.reference_dir, name);
        let report = self.encode(&source, &reference)?;
        report.log();
        Ok(report)
    }
}

/// State of one encoding run
///
/// Owns the container being filled and the ids emitted so far. Segments
/// must be fed in file order: each lookup has to see the entries
/// registered by earlier segments of the same run.
pub struct EncoderSession<'a> {
    hash: HashAlgorithm,
    index: &'a dyn ContentIndex,
    writer: ContainerWriter<'a>,
    refs: ReferenceWriter,
    total: u64,
    repeated: u64,
    bytes: u64,
}

impl<'a> EncoderSession<'a> {
    pub fn new(
        hash: HashAlgorithm,
        index: &'a dyn ContentIndex,
        writer: ContainerWriter<'a>,
        id_width: usize,
    ) -> Self {
        EncoderSession {
            hash,
            index,
            writer,
            refs: ReferenceWriter::new(id_width),
            total: 0,
            repeated: 0,
            bytes: 0,
        }
    }

    /// Resolve one segment to an id, storing it if new
    pub fn process(&mut self, segment: &Segment) -> Result<u32> {
        let digest = segment.digest(self.hash);

        let id = match self.index.find_by_digest(&digest)? {
            Some(entry) => {
                self.index.increment(entry.id)?;
                self.repeated += 1;
                entry.id
            }
            None => {
                // Never register an entry this run could not reference
                self.refs.check(self.index.next_id()?)?;
                let slot = self.writer.append(&segment.data)?;
                match self.index.register_new(&digest, slot, segment.len() as u32) {
                    Ok(id) => id,
                    Err(Error::DigestExists(_)) => {
                        // Another writer registered it between our lookup and
                        // registration; our copy stays unreferenced.
                        let entry = self.index.find_by_digest(&digest)?.ok_or_else(|| {
                            Error::StoreUnavailable(format!(
                                "Digest {} reported present but not found",
                                digest
                            ))
                        })?;
                        warn!(id = entry.id, %digest, "lost registration race, reusing entry");
                        self.index.increment(entry.id)?;
                        self.repeated += 1;
                        entry.id
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        self.refs.push(id)?;
        self.total += 1;
        self.bytes += segment.len() as u64;
        Ok(id)
    }

    /// Process segments in order until the first error
    pub fn process_all<I>(&mut self, segments: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<Segment>>,
    {
        for segment in segments {
            self.process(&segment?)?;
        }
        Ok(())
    }

    /// Give up on the run, sealing whatever was buffered
    ///
    /// Entries registered by this run stay in the index, so their slots
    /// have to reach disk even though no reference is published.
    pub fn abort(self) {
        let buffered = self.writer.open_container().is_some();
        match self.writer.finish() {
            Ok(sealed) => {
                if buffered {
                    warn!(
                        segments = self.total,
                        containers = sealed.len(),
                        "encode aborted, sealed buffered segments"
                    );
                }
            }
            Err(e) => error!(
                error = %e,
                "encode aborted and buffered segments could not be sealed"
            ),
        }
    }

    /// Seal the open container and hand back the ids
    pub fn finish(self) -> Result<(ReferenceWriter, EncodeReport)> {
        let EncoderSession {
            writer,
            refs,
            total,
            repeated,
            bytes,
            ..
        } = self;

        let sealed = writer.finish()?;
        debug!(segments = total, containers = sealed.len(), "encoder session finished");

        let report = EncodeReport {
            total_segments: total,
            repeated_segments: repeated,
            bytes_read: bytes,
            containers_sealed: sealed.len(),
            ..Default::default()
        };
        Ok((refs, report))
    }
}
