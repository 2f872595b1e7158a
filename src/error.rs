//! Error types for fixdedup
//!
//! Every failure aborts the current encode/decode run. Nothing here is
//! retried internally; the caller (usually the CLI) decides what to do.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the deduplication engine
#[derive(Debug, Error)]
pub enum Error {
    /// The file to encode (or the reference file to decode) does not exist
    #[error("Source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// The content index has never been initialized
    #[error("Content index is not initialized")]
    IndexUninitialized,

    /// A segment id does not fit in the configured id width
    #[error("Id {id} does not fit in {width} byte(s); increase the id width")]
    IdWidthOverflow { id: u32, width: usize },

    /// A reference sequence names an id the index does not know
    #[error("Segment id {0} was not found in the content index")]
    UnresolvedId(u32),

    /// The container holding a segment is missing or too short
    #[error("Segment container {container} has no slot {slot}")]
    MissingSegmentContainer { container: String, slot: u32 },

    /// The content index backend failed or is unreachable
    #[error("Content index unavailable: {0}")]
    StoreUnavailable(String),

    /// `register_new` was called for a digest that already has an entry
    #[error("Digest {0} is already registered")]
    DigestExists(String),

    /// `increment` was called for an unknown id
    #[error("Index entry {0} not found")]
    EntryNotFound(u32),

    /// The index was created with a different hash family or segment size
    #[error("Index layout mismatch: index has {stored}, configuration has {configured}")]
    LayoutMismatch { stored: String, configured: String },

    /// A reference sequence file is not a whole number of ids
    #[error("Reference file {} is {len} bytes, not a multiple of id width {width}", .path.display())]
    TruncatedReference {
        path: PathBuf,
        len: u64,
        width: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

impl From<sled::transaction::TransactionError<Error>> for Error {
    fn from(e: sled::transaction::TransactionError<Error>) -> Self {
        match e {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => {
                Error::StoreUnavailable(e.to_string())
            }
        }
    }
}
