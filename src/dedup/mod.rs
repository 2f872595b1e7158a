//! Deduplicating encoder and reconstructing decoder
//!
//! Encoding: source bytes → fixed-size segments → digests → index lookup →
//! new segments appended to containers → reference sequence.
//! Decoding walks the reference sequence back through the index and the
//! segment store.

mod decoder;
mod encoder;

pub use decoder::Duplicator;
pub use encoder::{Deduplicator, EncoderSession};
