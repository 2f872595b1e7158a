//! In-memory content index, for tests and dry runs

use super::{ContentIndex, IndexEntry, IndexLayout};
use crate::error::{Error, Result};
use crate::hash::Digest;
use crate::store::SlotRef;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
struct State {
    layout: Option<IndexLayout>,
    entries: BTreeMap<u32, IndexEntry>,
    digests: HashMap<Digest, u32>,
    next_id: u32,
}

/// Volatile index with the same semantics as the sled one
#[derive(Default)]
pub struct MemoryIndex {
    state: Mutex<State>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentIndex for MemoryIndex {
    fn exists(&self) -> Result<bool> {
        Ok(self.state.lock().layout.is_some())
    }

    fn initialize(&self, layout: &IndexLayout) -> Result<()> {
        let mut state = self.state.lock();
        match &state.layout {
            Some(stored) => stored.check(layout),
            None => {
                state.layout = Some(*layout);
                Ok(())
            }
        }
    }

    fn layout(&self) -> Result<Option<IndexLayout>> {
        Ok(self.state.lock().layout)
    }

    fn find_by_digest(&self, digest: &Digest) -> Result<Option<IndexEntry>> {
        let state = self.state.lock();
        Ok(state
            .digests
            .get(digest)
            .and_then(|id| state.entries.get(id))
            .cloned())
    }

    fn find_by_id(&self, id: u32) -> Result<Option<IndexEntry>> {
        Ok(self.state.lock().entries.get(&id).cloned())
    }

    fn next_id(&self) -> Result<u32> {
        Ok(self.state.lock().next_id.max(1))
    }

    fn register_new(&self, digest: &Digest, slot: SlotRef, len: u32) -> Result<u32> {
        let mut state = self.state.lock();
        if state.layout.is_none() {
            return Err(Error::IndexUninitialized);
        }
        if state.digests.contains_key(digest) {
            return Err(Error::DigestExists(digest.to_hex()));
        }

        let id = state.next_id.max(1);
        state.next_id = id
            .checked_add(1)
            .ok_or(Error::IdWidthOverflow { id, width: 4 })?;
        state.digests.insert(digest.clone(), id);
        state.entries.insert(
            id,
            IndexEntry {
                id,
                digest: digest.clone(),
                slot,
                len,
                occurrences: 1,
            },
        );
        Ok(id)
    }

    fn increment(&self, id: u32) -> Result<u32> {
        let mut state = self.state.lock();
        let entry = state.entries.get_mut(&id).ok_or(Error::EntryNotFound(id))?;
        entry.occurrences = entry.occurrences.saturating_add(1);
        Ok(entry.occurrences)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.state.lock().entries.len() as u64)
    }

    fn entries(&self) -> Result<Vec<IndexEntry>> {
        Ok(self.state.lock().entries.values().cloned().collect())
    }

    fn clear(&self) -> Result<()> {
        *self.state.lock() = State::default();
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;

    fn slot() -> SlotRef {
        SlotRef {
            container: "c".to_string(),
            slot: 0,
        }
    }

    #[test]
    fn test_memory_index_semantics() {
        let index = MemoryIndex::new();
        let layout = IndexLayout {
            hash: HashAlgorithm::None,
            segment_size: 4,
        };
        let digest = HashAlgorithm::None.digest(b"abcd");

        assert!(matches!(
            index.register_new(&digest, slot(), 4),
            Err(Error::IndexUninitialized)
        ));

        index.initialize(&layout).unwrap();
        let id = index.register_new(&digest, slot(), 4).unwrap();
        assert_eq!(id, 1);
        assert!(index.register_new(&digest, slot(), 4).is_err());
        assert_eq!(index.increment(id).unwrap(), 2);
        assert_eq!(index.find_by_digest(&digest).unwrap().unwrap().occurrences, 2);

        let other = HashAlgorithm::None.digest(b"wxyz");
        assert_eq!(index.register_new(&other, slot(), 4).unwrap(), 2);

        index.clear().unwrap();
        assert!(!index.exists().unwrap());
        assert!(index.find_by_id(1).unwrap().is_none());
    }
}
