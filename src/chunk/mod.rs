//! Fixed-size segmenting
//!
//! Splits a byte stream into equal-size segments. Only the final segment
//! of a stream may be shorter than the configured size.

mod chunker;

pub use chunker::{Chunker, Segment, Segments};
