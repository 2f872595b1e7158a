//! Append-only segment containers
//!
//! Segments live in container files at a fixed stride of `S` bytes, so a
//! segment is addressed by `(container, slot)` and read back from offset
//! `slot * S`. Containers are buffered in memory and only appear on disk
//! once sealed.

mod container;

pub use container::{ContainerWriter, OpenContainer, SegmentStore, SlotRef};
