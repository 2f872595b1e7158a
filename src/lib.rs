//! fixdedup - fixed-size segment deduplication
//!
//! Files are split into equal-size segments. Each distinct segment is
//! stored once in an append-only container, indexed by its digest, and
//! the file itself becomes a compact sequence of segment ids that can be
//! decoded back into the original bytes.

pub mod chunk;
pub mod config;
pub mod dedup;
pub mod error;
pub mod hash;
pub mod index;
pub mod refseq;
pub mod report;
pub mod store;
pub mod workspace;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, DedupConfig};
    pub use crate::dedup::{Deduplicator, Duplicator};
    pub use crate::error::{Error, Result};
    pub use crate::hash::{Digest, HashAlgorithm};
    pub use crate::index::{ContentIndex, IndexEntry, MemoryIndex, SledIndex};
    pub use crate::store::SegmentStore;
    pub use crate::workspace::Workspace;
}
