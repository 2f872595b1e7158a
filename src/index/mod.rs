//! Content index
//!
//! Maps each distinct segment digest to a sequential id, the segment's
//! location in the segment store and the number of times it was seen.
//! There is exactly one entry per digest; entries are never deleted
//! (short of clearing the whole index).

mod memory;
mod sled_index;

pub use memory::MemoryIndex;
pub use sled_index::SledIndex;

use crate::error::{Error, Result};
use crate::hash::{Digest, HashAlgorithm};
use crate::store::SlotRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single index entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Sequential id, starting at 1
    pub id: u32,
    /// Digest of the segment content
    pub digest: Digest,
    /// Where the segment bytes live
    pub slot: SlotRef,
    /// Logical segment length; the stored slot is padded to the full stride
    pub len: u32,
    /// How many times this digest was encountered, first sighting included
    pub occurrences: u32,
}

/// Parameters fixed at index creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexLayout {
    pub hash: HashAlgorithm,
    pub segment_size: usize,
}

impl fmt::Display for IndexLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hash={} segment_size={}", self.hash, self.segment_size)
    }
}

impl IndexLayout {
    /// Fail unless `configured` matches the layout the index was created with
    pub fn check(&self, configured: &IndexLayout) -> Result<()> {
        if self != configured {
            return Err(Error::LayoutMismatch {
                stored: self.to_string(),
                configured: configured.to_string(),
            });
        }
        Ok(())
    }
}

/// Durable digest → entry mapping
///
/// Callers make the dedup decision: `find_by_digest` first, then either
/// `register_new` or `increment`. `register_new` never upserts; if two
/// callers race on the same digest exactly one wins and the other gets
/// [`Error::DigestExists`].
pub trait ContentIndex: Send + Sync {
    /// Whether `initialize` has been run
    fn exists(&self) -> Result<bool>;

    /// Create the index if absent; idempotent for the same layout
    fn initialize(&self, layout: &IndexLayout) -> Result<()>;

    /// Layout recorded at initialization
    fn layout(&self) -> Result<Option<IndexLayout>>;

    fn find_by_digest(&self, digest: &Digest) -> Result<Option<IndexEntry>>;

    fn find_by_id(&self, id: u32) -> Result<Option<IndexEntry>>;

    /// Id the next `register_new` would assign, absent concurrent writers
    fn next_id(&self) -> Result<u32>;

    /// Assign the next id to a digest not yet in the index
    fn register_new(&self, digest: &Digest, slot: SlotRef, len: u32) -> Result<u32>;

    /// Bump the occurrence count; returns the new count
    fn increment(&self, id: u32) -> Result<u32>;

    /// Number of entries
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All entries ordered by id
    fn entries(&self) -> Result<Vec<IndexEntry>>;

    /// Drop every entry and the recorded layout
    fn clear(&self) -> Result<()>;

    /// Make all writes durable
    fn flush(&self) -> Result<()>;
}
