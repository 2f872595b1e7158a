//! sled-backed content index
//!
//! Three trees:
//! - `entries`: id (u32 BE) → bincode `IndexEntry`
//! - `digests`: digest bytes → id (u32 BE)
//! - `meta`: layout and the next id to assign
//!
//! Registration and increments run as sled transactions, so the
//! digest uniqueness check and the id allocation are atomic.

use super::{ContentIndex, IndexEntry, IndexLayout};
use crate::error::{Error, Result};
use crate::hash::Digest;
use crate::store::SlotRef;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, Transactional};
use std::path::Path;
use tracing::debug;

const LAYOUT_KEY: &[u8] = b"layout";
const NEXT_ID_KEY: &[u8] = b"next_id";

fn decode_id(bytes: &[u8]) -> Result<u32> {
    let array: [u8; 4] = bytes
        .try_into()
        .map_err(|_| Error::Deserialization(format!("Bad id of {} bytes", bytes.len())))?;
    Ok(u32::from_be_bytes(array))
}

fn encode_entry(entry: &IndexEntry) -> Result<Vec<u8>> {
    bincode::serialize(entry).map_err(|e| Error::Serialization(e.to_string()))
}

fn decode_entry(bytes: &[u8]) -> Result<IndexEntry> {
    bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}

fn abort<T>(e: Error) -> ConflictableTransactionResult<T, Error> {
    Err(ConflictableTransactionError::Abort(e))
}

/// Content index stored in a sled database
pub struct SledIndex {
    db: sled::Db,
    entries: sled::Tree,
    digests: sled::Tree,
    meta: sled::Tree,
    flush_on_write: bool,
}

impl SledIndex {
    /// Open or create an index at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened content index");
        Self::from_db(db)
    }

    /// Throwaway index, removed when dropped
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    /// Use an already opened database
    pub fn from_db(db: sled::Db) -> Result<Self> {
        Ok(SledIndex {
            entries: db.open_tree("entries")?,
            digests: db.open_tree("digests")?,
            meta: db.open_tree("meta")?,
            db,
            flush_on_write: false,
        })
    }

    /// Flush after every mutation
    pub fn with_flush_on_write(mut self, flush: bool) -> Self {
        self.flush_on_write = flush;
        self
    }

    /// Flush and release the database handle
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn after_write(&self) -> Result<()> {
        if self.flush_on_write {
            self.db.flush()?;
        }
        Ok(())
    }
}

impl ContentIndex for SledIndex {
    fn exists(&self) -> Result<bool> {
        Ok(self.meta.contains_key(LAYOUT_KEY)?)
    }

    fn initialize(&self, layout: &IndexLayout) -> Result<()> {
        let encoded =
            serde_json::to_vec(layout).map_err(|e| Error::Serialization(e.to_string()))?;

        match self
            .meta
            .compare_and_swap(LAYOUT_KEY, None as Option<&[u8]>, Some(encoded))?
        {
            Ok(()) => {
                self.db.flush()?;
                debug!(%layout, "initialized content index");
                Ok(())
            }
            Err(existing) => {
                let current = existing.current.ok_or_else(|| {
                    Error::StoreUnavailable("Layout vanished during initialization".to_string())
                })?;
                let stored: IndexLayout = serde_json::from_slice(&current)
                    .map_err(|e| Error::Deserialization(e.to_string()))?;
                stored.check(layout)
            }
        }
    }

    fn layout(&self) -> Result<Option<IndexLayout>> {
        match self.meta.get(LAYOUT_KEY)? {
            Some(bytes) => {
                let layout = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Deserialization(e.to_string()))?;
                Ok(Some(layout))
            }
            None => Ok(None),
        }
    }

    fn find_by_digest(&self, digest: &Digest) -> Result<Option<IndexEntry>> {
        match self.digests.get(digest.as_bytes())? {
            Some(id) => self.find_by_id(decode_id(&id)?),
            None => Ok(None),
        }
    }

    fn find_by_id(&self, id: u32) -> Result<Option<IndexEntry>> {
        match self.entries.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode_entry(&bytes)?)),
            None => Ok(None),
        }
    }

    fn next_id(&self) -> Result<u32> {
        match self.meta.get(NEXT_ID_KEY)? {
            Some(bytes) => decode_id(&bytes),
            None => Ok(1),
        }
    }

    fn register_new(&self, digest: &Digest, slot: SlotRef, len: u32) -> Result<u32> {
        let id = (&self.entries, &self.digests, &self.meta).transaction(
            |(entries, digests, meta)| -> ConflictableTransactionResult<u32, Error> {
                if meta.get(LAYOUT_KEY)?.is_none() {
                    return abort(Error::IndexUninitialized);
                }
                if digests.get(digest.as_bytes())?.is_some() {
                    return abort(Error::DigestExists(digest.to_hex()));
                }

                let id = match meta.get(NEXT_ID_KEY)? {
                    Some(bytes) => match decode_id(&bytes) {
                        Ok(id) => id,
                        Err(e) => return abort(e),
                    },
                    None => 1,
                };
                let Some(next) = id.checked_add(1) else {
                    return abort(Error::IdWidthOverflow { id, width: 4 });
                };

                let entry = IndexEntry {
                    id,
                    digest: digest.clone(),
                    slot: slot.clone(),
                    len,
                    occurrences: 1,
                };
                let value = match encode_entry(&entry) {
                    Ok(value) => value,
                    Err(e) => return abort(e),
                };

                entries.insert(&id.to_be_bytes()[..], value)?;
                digests.insert(digest.as_bytes(), &id.to_be_bytes()[..])?;
                meta.insert(NEXT_ID_KEY, &next.to_be_bytes()[..])?;
                Ok(id)
            },
        )?;

        self.after_write()?;
        Ok(id)
    }

    fn increment(&self, id: u32) -> Result<u32> {
        let count = self
            .entries
            .transaction(|entries| -> ConflictableTransactionResult<u32, Error> {
                let Some(bytes) = entries.get(id.to_be_bytes())? else {
                    return abort(Error::EntryNotFound(id));
                };
                let mut entry = match decode_entry(&bytes) {
                    Ok(entry) => entry,
                    Err(e) => return abort(e),
                };
                entry.occurrences = entry.occurrences.saturating_add(1);
                let value = match encode_entry(&entry) {
                    Ok(value) => value,
                    Err(e) => return abort(e),
                };
                entries.insert(&id.to_be_bytes()[..], value)?;
                Ok(entry.occurrences)
            })?;

        self.after_write()?;
        Ok(count)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.entries.len() as u64)
    }

    fn entries(&self) -> Result<Vec<IndexEntry>> {
        self.entries
            .iter()
            .values()
            .map(|value| decode_entry(&value?))
            .collect()
    }

    fn clear(&self) -> Result<()> {
        self.entries.clear()?;
        self.digests.clear()?;
        self.meta.clear()?;
        self.db.flush()?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn layout() -> IndexLayout {
        IndexLayout {
            hash: HashAlgorithm::Sha256,
            segment_size: 8,
        }
    }

    fn slot(n: u32) -> SlotRef {
        SlotRef {
            container: "segments_test.bin".to_string(),
            slot: n,
        }
    }

    fn test_index() -> SledIndex {
        let index = SledIndex::temporary().expect("Failed to open index");
        index.initialize(&layout()).expect("Failed to initialize");
        index
    }

    #[test]
    fn test_next_id_tracks_registrations() {
        let index = test_index();
        assert_eq!(index.next_id().unwrap(), 1);

        let digest = HashAlgorithm::Sha256.digest(b"segment!");
        let id = index.register_new(&digest, slot(0), 8).unwrap();
        assert_eq!(id, 1);
        assert_eq!(index.next_id().unwrap(), 2);

        index.increment(id).unwrap();
        assert_eq!(index.next_id().unwrap(), 2);
    }

    #[test]
    fn test_initialize_idempotent() {
        let index = SledIndex::temporary().unwrap();
        assert!(!index.exists().unwrap());

        index.initialize(&layout()).unwrap();
        index.initialize(&layout()).unwrap();
        assert!(index.exists().unwrap());
        assert_eq!(index.layout().unwrap(), Some(layout()));
    }

    #[test]
    fn test_initialize_layout_mismatch() {
        let index = test_index();
        let other = IndexLayout {
            hash: HashAlgorithm::Md5,
            segment_size: 8,
        };
        assert!(matches!(
            index.initialize(&other),
            Err(Error::LayoutMismatch { .. })
        ));
    }

    #[test]
    fn test_register_requires_initialize() {
        let index = SledIndex::temporary().unwrap();
        let digest = HashAlgorithm::Sha256.digest(b"data");
        assert!(matches!(
            index.register_new(&digest, slot(0), 4),
            Err(Error::IndexUninitialized)
        ));
    }

    #[test]
    fn test_register_and_find() {
        let index = test_index();
        let digest = HashAlgorithm::Sha256.digest(b"data");

        let id = index.register_new(&digest, slot(3), 4).unwrap();
        assert_eq!(id, 1);

        let by_digest = index.find_by_digest(&digest).unwrap().unwrap();
        let by_id = index.find_by_id(id).unwrap().unwrap();
        assert_eq!(by_digest, by_id);
        assert_eq!(by_id.slot, slot(3));
        assert_eq!(by_id.len, 4);
        assert_eq!(by_id.occurrences, 1);

        // Repeated lookups return the same entry
        assert_eq!(index.find_by_id(id).unwrap().unwrap(), by_id);
    }

    #[test]
    fn test_register_twice_rejected() {
        let index = test_index();
        let digest = HashAlgorithm::Sha256.digest(b"data");

        index.register_new(&digest, slot(0), 4).unwrap();
        assert!(matches!(
            index.register_new(&digest, slot(1), 4),
            Err(Error::DigestExists(_))
        ));
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn test_ids_monotonic() {
        let index = test_index();
        let ids: Vec<u32> = (0..20u32)
            .map(|i| {
                let digest = HashAlgorithm::Sha256.digest(&i.to_be_bytes());
                index.register_new(&digest, slot(i), 4).unwrap()
            })
            .collect();

        assert_eq!(ids, (1..=20).collect::<Vec<u32>>());
        let listed: Vec<u32> = index.entries().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_increment() {
        let index = test_index();
        let digest = HashAlgorithm::Sha256.digest(b"data");
        let id = index.register_new(&digest, slot(0), 4).unwrap();

        assert_eq!(index.increment(id).unwrap(), 2);
        assert_eq!(index.increment(id).unwrap(), 3);
        assert_eq!(index.find_by_id(id).unwrap().unwrap().occurrences, 3);

        assert!(matches!(index.increment(99), Err(Error::EntryNotFound(99))));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.db");
        let digest = HashAlgorithm::Sha256.digest(b"data");

        {
            let index = SledIndex::open(&path).unwrap();
            index.initialize(&layout()).unwrap();
            index.register_new(&digest, slot(0), 4).unwrap();
            index.close().unwrap();
        }

        let index = SledIndex::open(&path).unwrap();
        assert!(index.exists().unwrap());
        assert_eq!(index.find_by_digest(&digest).unwrap().unwrap().id, 1);

        let next = index
            .register_new(&HashAlgorithm::Sha256.digest(b"more"), slot(1), 4)
            .unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn test_clear() {
        let index = test_index();
        index
            .register_new(&HashAlgorithm::Sha256.digest(b"data"), slot(0), 4)
            .unwrap();

        index.clear().unwrap();
        assert!(!index.exists().unwrap());
        assert!(index.is_empty().unwrap());
    }

    #[test]
    fn test_concurrent_register_single_winner() {
        let index = Arc::new(test_index());
        let digest = HashAlgorithm::Sha256.digest(b"contended");

        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let index = Arc::clone(&index);
                let digest = digest.clone();
                std::thread::spawn(move || index.register_new(&digest, slot(i), 4))
            })
            .collect();

        let results: Vec<Result<u32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        let losers = results
            .iter()
            .filter(|r| matches!(r, Err(Error::DigestExists(_))))
            .count();

        assert_eq!(winners, 1);
        assert_eq!(losers, 7);
        assert_eq!(index.len().unwrap(), 1);
    }
}
