//! Fixed-size file chunking
//!
//! Segments are read with exact `S`-byte reads. A short read only happens
//! at end of stream, so every segment but the last is full-size.

use crate::error::{Error, Result};
use crate::hash::{Digest, HashAlgorithm};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

/// A segment of a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position of this segment in the file (0-based)
    pub index: u64,
    /// Byte offset in the original file
    pub offset: u64,
    /// Raw bytes, at most the segment size
    pub data: Vec<u8>,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fingerprint this segment with the given hash family
    pub fn digest(&self, algorithm: HashAlgorithm) -> Digest {
        algorithm.digest(&self.data)
    }
}

/// Chunker for splitting files into fixed-size segments
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    segment_size: usize,
}

impl Chunker {
    /// Create a chunker with a specific segment size
    pub fn with_size(segment_size: usize) -> Self {
        Chunker { segment_size }
    }

    /// Get the configured segment size
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Split in-memory data into segments
    pub fn chunk_data(&self, data: &[u8]) -> Vec<Segment> {
        data.chunks(self.segment_size)
            .enumerate()
            .map(|(i, chunk)| Segment {
                index: i as u64,
                offset: (i * self.segment_size) as u64,
                data: chunk.to_vec(),
            })
            .collect()
    }

    /// Stream segments from a reader
    pub fn segments<R: Read>(&self, reader: R) -> Segments<R> {
        Segments {
            reader,
            segment_size: self.segment_size,
            next_index: 0,
            offset: 0,
            done: false,
        }
    }

    /// Open a file and stream its segments
    pub fn open(&self, path: &Path) -> Result<Segments<BufReader<File>>> {
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::SourceNotFound(path.to_path_buf()),
            _ => Error::Io(e),
        })?;
        Ok(self.segments(BufReader::new(file)))
    }

    /// Number of segments a stream of `len` bytes produces
    pub fn segment_count(&self, len: u64) -> u64 {
        len.div_ceil(self.segment_size as u64)
    }
}

/// Iterator over the segments of a reader
pub struct Segments<R> {
    reader: R,
    segment_size: usize,
    next_index: u64,
    offset: u64,
    done: bool,
}

impl<R: Read> Segments<R> {
    fn read_segment(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buffer = vec![0u8; self.segment_size];
        let mut total_read = 0;

        // Read until buffer is full or EOF
        while total_read < self.segment_size {
            match self.reader.read(&mut buffer[total_read..]) {
                Ok(0) => break,
                Ok(n) => total_read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        if total_read == 0 {
            return Ok(None);
        }

        buffer.truncate(total_read);
        Ok(Some(buffer))
    }
}

impl<R: Read> Iterator for Segments<R> {
    type Item = Result<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_segment() {
            Ok(Some(data)) => {
                if data.len() < self.segment_size {
                    self.done = true;
                }
                let segment = Segment {
                    index: self.next_index,
                    offset: self.offset,
                    data,
                };
                self.next_index += 1;
                self.offset += segment.len() as u64;
                Some(Ok(segment))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
