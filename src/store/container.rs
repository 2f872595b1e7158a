//! Segment container files

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const CONTAINER_PREFIX: &str = "segments_";
const CONTAINER_EXT: &str = "bin";

/// Location of a stored segment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRef {
    /// Container file name
    pub container: String,
    /// Slot index within the container
    pub slot: u32,
}

/// A container still being filled in memory
#[derive(Debug)]
pub struct OpenContainer {
    name: String,
    buffer: Vec<u8>,
    count: u32,
    segment_size: usize,
}

impl OpenContainer {
    /// Start a new container, named after the current time
    pub fn new(segment_size: usize) -> Self {
        OpenContainer {
            name: Self::generate_name(),
            buffer: Vec::new(),
            count: 0,
            segment_size,
        }
    }

    /// Timestamp plus a random suffix so concurrent writers never collide
    fn generate_name() -> String {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S%3f");
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}{}_{}.{}",
            CONTAINER_PREFIX,
            stamp,
            &suffix[..8],
            CONTAINER_EXT
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of segments buffered
    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Buffer a segment, zero-padded to the full stride; returns its slot
    pub fn push(&mut self, bytes: &[u8]) -> Result<u32> {
        if bytes.len() > self.segment_size {
            return Err(Error::InvalidConfig(format!(
                "Segment of {} bytes exceeds segment size {}",
                bytes.len(),
                self.segment_size
            )));
        }

        let slot = self.count;
        self.buffer.extend_from_slice(bytes);
        self.buffer
            .resize(self.buffer.len() + (self.segment_size - bytes.len()), 0);
        self.count += 1;
        Ok(slot)
    }

    /// Raw padded contents, exactly `len() * S` bytes
    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }
}

/// Directory of sealed containers
#[derive(Debug, Clone)]
pub struct SegmentStore {
    dir: PathBuf,
    segment_size: usize,
    capacity: u32,
}

impl SegmentStore {
    /// Open (creating if needed) a segment store directory
    pub fn open(dir: impl AsRef<Path>, segment_size: usize, capacity: u32) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(SegmentStore {
            dir,
            segment_size,
            capacity,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Segments per container
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn container_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Start a writer that owns its own containers
    pub fn writer(&self) -> ContainerWriter<'_> {
        ContainerWriter {
            store: self,
            current: None,
            sealed: Vec::new(),
        }
    }

    /// Flush a container to disk at fixed stride
    ///
    /// The bytes go to a temporary file first and are renamed into place,
    /// so a half-written container never exists under its final name.
    pub fn seal(&self, container: OpenContainer) -> Result<String> {
        let path = self.container_path(&container.name);
        let tmp_path = path.with_extension("tmp");

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(container.contents())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        debug!(
            container = %container.name,
            segments = container.count,
            bytes = container.buffer.len(),
            "sealed segment container"
        );
        Ok(container.name)
    }

    /// Read the `S`-byte slot of a sealed container
    ///
    /// Returns `None` if the container does not exist or is too short.
    pub fn read(&self, container: &str, slot: u32) -> Result<Option<Vec<u8>>> {
        let path = self.container_path(container);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let offset = slot as u64 * self.segment_size as u64;
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; self.segment_size];
        match file.read_exact(&mut buffer) {
            Ok(()) => Ok(Some(buffer)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Names of all sealed containers, oldest first
    pub fn containers(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(CONTAINER_PREFIX) && name.ends_with(CONTAINER_EXT) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Total bytes held by sealed containers
    pub fn disk_usage(&self) -> Result<u64> {
        let mut total = 0;
        for name in self.containers()? {
            total += fs::metadata(self.container_path(&name))?.len();
        }
        Ok(total)
    }

    /// Delete every container, sealed or left over from a crashed seal
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_file() && name.starts_with(CONTAINER_PREFIX) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Appends segments into containers owned by a single writer
///
/// A container is sealed as soon as it holds `F` segments, and the last
/// partially filled one is sealed by [`ContainerWriter::finish`].
pub struct ContainerWriter<'a> {
    store: &'a SegmentStore,
    current: Option<OpenContainer>,
    sealed: Vec<String>,
}

impl ContainerWriter<'_> {
    /// Append a segment and return where it will live once sealed
    pub fn append(&mut self, bytes: &[u8]) -> Result<SlotRef> {
        let store = self.store;
        let container = self
            .current
            .get_or_insert_with(|| OpenContainer::new(store.segment_size));

        let slot = container.push(bytes)?;
        let slot_ref = SlotRef {
            container: container.name().to_string(),
            slot,
        };

        if container.len() >= store.capacity {
            self.seal()?;
        }

        Ok(slot_ref)
    }

    /// Seal the open container, if any
    pub fn seal(&mut self) -> Result<Option<String>> {
        match self.current.take() {
            Some(container) if !container.is_empty() => {
                let name = self.store.seal(container)?;
                self.sealed.push(name.clone());
                Ok(Some(name))
            }
            _ => Ok(None),
        }
    }

    /// Name of the container currently being filled
    pub fn open_container(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.name())
    }

    /// Seal whatever is buffered and return every container this writer sealed
    pub fn finish(mut self) -> Result<Vec<String>> {
        self.seal()?;
        Ok(std::mem::take(&mut self.sealed))
    }
}

impl Drop for ContainerWriter<'_> {
    fn drop(&mut self) {
        if let Some(container) = &self.current {
            if !container.is_empty() {
                warn!(
                    container = %container.name(),
                    segments = container.len(),
                    "discarding unsealed segment container"
                );
            }
        }
    }
}
