//! Reference sequence files
//!
//! A deduplicated file is stored as nothing but its segment ids, each a
//! big-endian unsigned integer of `I` bytes, in original segment order.
//! No header, no footer.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Encode `id` as `width` big-endian bytes
pub fn encode_id(id: u32, width: usize) -> Result<Vec<u8>> {
    let full = id.to_be_bytes();
    check_width(width)?;

    let (high, low) = full.split_at(full.len() - width);
    if high.iter().any(|&b| b != 0) {
        return Err(Error::IdWidthOverflow { id, width });
    }
    Ok(low.to_vec())
}

fn check_width(width: usize) -> Result<()> {
    if width == 0 || width > 4 {
        return Err(Error::InvalidConfig(format!("Unsupported id width {}", width)));
    }
    Ok(())
}

/// Decode a big-endian id of 1 to 4 bytes
pub fn decode_id(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

/// Accumulates ids and publishes them as a reference file
#[derive(Debug)]
pub struct ReferenceWriter {
    width: usize,
    buffer: Vec<u8>,
    count: u64,
}

impl ReferenceWriter {
    pub fn new(width: usize) -> Self {
        ReferenceWriter {
            width,
            buffer: Vec::new(),
            count: 0,
        }
    }

    /// Fail with `IdWidthOverflow` unless `id` fits in the id width
    pub fn check(&self, id: u32) -> Result<()> {
        encode_id(id, self.width).map(drop)
    }

    /// Append the next id; fails if it does not fit in the id width
    pub fn push(&mut self, id: u32) -> Result<()> {
        let encoded = encode_id(id, self.width)?;
        self.buffer.extend_from_slice(&encoded);
        self.count += 1;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Write the sequence to `path`
    ///
    /// Goes through a temporary file and a rename, so `path` either holds
    /// the complete sequence or is left untouched.
    pub fn publish(self, path: &Path) -> Result<u64> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = tmp_path(path);
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            writer.write_all(&self.buffer)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(self.count)
    }
}

/// Streams ids out of a reference file
pub struct ReferenceReader<R> {
    reader: R,
    width: usize,
}

impl ReferenceReader<BufReader<File>> {
    /// Open a reference file, checking that it holds whole ids
    pub fn open(path: &Path, width: usize) -> Result<Self> {
        check_width(width)?;
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::SourceNotFound(path.to_path_buf()),
            _ => Error::Io(e),
        })?;

        let len = file.metadata()?.len();
        if len % width as u64 != 0 {
            return Err(Error::TruncatedReference {
                path: path.to_path_buf(),
                len,
                width,
            });
        }

        ReferenceReader::new(BufReader::new(file), width)
    }
}

impl<R: Read> ReferenceReader<R> {
    pub fn new(reader: R, width: usize) -> Result<Self> {
        check_width(width)?;
        Ok(ReferenceReader { reader, width })
    }

    fn read_id(&mut self) -> Result<Option<u32>> {
        let mut buffer = [0u8; 4];
        let slice = &mut buffer[..self.width];
        let mut filled = 0;

        while filled < slice.len() {
            match self.reader.read(&mut slice[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        match filled {
            0 => Ok(None),
            n if n == slice.len() => Ok(Some(decode_id(slice))),
            n => Err(Error::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("Reference sequence ends inside an id ({} of {} bytes)", n, self.width),
            ))),
        }
    }
}

impl<R: Read> Iterator for ReferenceReader<R> {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_id().transpose()
    }
}

/// Conventional reference file path for a source file name
pub fn reference_path(reference_dir: &Path, source_name: &str) -> PathBuf {
    reference_dir.join(format!("{}.bin", source_name))
}

/// Original file name for a reference file name (`cat.jpg.bin` → `cat.jpg`)
pub fn original_name(reference_name: &str) -> &str {
    reference_name
        .strip_suffix(".bin")
        .unwrap_or(reference_name)
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn test_encode_id_big_endian() {
        assert_eq!(encode_id(1, 1).unwrap(), vec![1]);
        assert_eq!(encode_id(0x0102, 3).unwrap(), vec![0, 1, 2]);
        assert_eq!(encode_id(0x01020304, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_encode_id_overflow() {
        assert!(matches!(
            encode_id(256, 1),
            Err(Error::IdWidthOverflow { id: 256, width: 1 })
        ));
        assert!(encode_id(255, 1).is_ok());
        assert!(matches!(
            encode_id(1 << 24, 3),
            Err(Error::IdWidthOverflow { .. })
        ));
    }

    #[test]
    fn test_decode_id() {
        assert_eq!(decode_id(&[0, 1, 2]), 0x0102);
        assert_eq!(decode_id(&[0xff]), 255);
    }

    #[test]
    fn test_writer_layout() {
        let mut writer = ReferenceWriter::new(2);
        for id in [1, 1, 2, 300] {
            writer.push(id).unwrap();
        }
        assert_eq!(writer.len(), 4);
        assert_eq!(writer.as_bytes(), &[0, 1, 0, 1, 0, 2, 1, 44]);
    }

    #[test]
    fn test_publish_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("files").join("a.txt.bin");

        let mut writer = ReferenceWriter::new(3);
        for id in [5, 70000, 5] {
            writer.push(id).unwrap();
        }
        writer.publish(&path).unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), 9);
        assert!(!tmp_path(&path).exists());

        let ids: Vec<u32> = ReferenceReader::open(&path, 3)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(ids, vec![5, 70000, 5]);
    }

    #[test]
    fn test_open_rejects_partial_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        fs::write(&path, [0u8, 1, 2, 3, 4]).unwrap();

        assert!(matches!(
            ReferenceReader::open(&path, 3),
            Err(Error::TruncatedReference { len: 5, width: 3, .. })
        ));
    }

    #[test]
    fn test_open_missing() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            ReferenceReader::open(&dir.path().join("none.bin"), 3),
            Err(Error::SourceNotFound(_))
        ));
    }

    #[test]
    fn test_reader_trailing_bytes() {
        let mut reader = ReferenceReader::new(Cursor::new(vec![0u8, 1, 0]), 2).unwrap();
        assert_eq!(reader.next().unwrap().unwrap(), 1);
        assert!(reader.next().unwrap().is_err());
    }

    #[test]
    fn test_reader_rejects_unsupported_width() {
        for width in [0, 5, 8] {
            assert!(matches!(
                ReferenceReader::new(Cursor::new(vec![0u8; 16]), width),
                Err(Error::InvalidConfig(_))
            ));
        }

        let dir = tempdir().unwrap();
        let path = dir.path().join("wide.bin");
        fs::write(&path, [0u8; 10]).unwrap();
        assert!(matches!(
            ReferenceReader::open(&path, 5),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_writer_check_leaves_buffer_alone() {
        let writer = ReferenceWriter::new(1);
        assert!(writer.check(255).is_ok());
        assert!(matches!(
            writer.check(256),
            Err(Error::IdWidthOverflow { id: 256, width: 1 })
        ));
        assert!(writer.as_bytes().is_empty());
    }

    #[test]
    fn test_names() {
        assert_eq!(
            reference_path(Path::new("/x"), "cat.jpg"),
            PathBuf::from("/x/cat.jpg.bin")
        );
        assert_eq!(original_name("cat.jpg.bin"), "cat.jpg");
        assert_eq!(original_name("noext"), "noext");
    }
}
