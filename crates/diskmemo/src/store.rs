//! On-disk multi-entry store for sequence payloads
//!
//! A sequence payload is a single append-only file of framed entries:
//!
//! ```text
//! "DMSQ" | version: u32 LE
//! index: u64 LE | len: u64 LE | <len bytes>
//! index: u64 LE | len: u64 LE | <len bytes>
//! ...
//! ```
//!
//! Entries are addressed by their stored index. Opening a store scans the
//! frame headers once and checks that the indices are exactly `0..N`.

use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"DMSQ";
const VERSION: u32 = 1;
const PREAMBLE_LEN: u64 = 8;
const FRAME_HEADER_LEN: u64 = 16;

/// Streams entries into a new store file.
///
/// Entries go to `<path>.tmp`; [`SequenceWriter::finish`] syncs the file and
/// renames it into place. A writer dropped before `finish` leaves only the
/// temporary file behind, which dies with its instance directory.
#[derive(Debug)]
pub(crate) struct SequenceWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    out: BufWriter<File>,
    next_index: u64,
}

impl SequenceWriter {
    pub(crate) fn create(path: &Path) -> Result<Self> {
        let tmp_path = path.with_extension("store.tmp");
        let file = File::options()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .map_err(|e| Error::io(e, &tmp_path, "create"))?;
        let mut out = BufWriter::new(file);
        out.write_all(MAGIC)
            .and_then(|()| out.write_all(&VERSION.to_le_bytes()))
            .map_err(|e| Error::io(e, &tmp_path, "write"))?;
        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            out,
            next_index: 0,
        })
    }

    /// Append the next entry; indices are assigned from 0 upwards.
    pub(crate) fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let len = bytes.len() as u64;
        self.out
            .write_all(&self.next_index.to_le_bytes())
            .and_then(|()| self.out.write_all(&len.to_le_bytes()))
            .and_then(|()| self.out.write_all(bytes))
            .map_err(|e| Error::io(e, &self.tmp_path, "write"))?;
        self.next_index += 1;
        Ok(())
    }

    /// Flush, sync and move the store into place. Returns the entry count.
    pub(crate) fn finish(self) -> Result<u64> {
        let file = self
            .out
            .into_inner()
            .map_err(|e| Error::io(e.into_error(), &self.tmp_path, "flush"))?;
        file.sync_all()
            .map_err(|e| Error::io(e, &self.tmp_path, "sync"))?;
        drop(file);
        fs::rename(&self.tmp_path, &self.path)
            .map_err(|e| Error::io(e, &self.path, "rename"))?;
        Ok(self.next_index)
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u64,
    len: u64,
}

/// Read handle over a finished store file.
///
/// Holds the file open until dropped.
#[derive(Debug)]
pub(crate) struct SequenceStore {
    path: PathBuf,
    reader: BufReader<File>,
    slots: Vec<Slot>,
}

impl SequenceStore {
    /// Open a store and validate that its keys are exactly `0..N`.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(e, path, "open"))?;
        let file_len = file
            .metadata()
            .map_err(|e| Error::io(e, path, "metadata"))?
            .len();
        let mut reader = BufReader::new(file);

        if file_len < PREAMBLE_LEN {
            return Err(Error::corrupt_store(path, "file too short for header"));
        }
        let mut preamble = [0u8; 8];
        reader
            .read_exact(&mut preamble)
            .map_err(|e| Error::io(e, path, "read"))?;
        if &preamble[..4] != MAGIC {
            return Err(Error::corrupt_store(path, "bad magic"));
        }
        let version = u32::from_le_bytes([preamble[4], preamble[5], preamble[6], preamble[7]]);
        if version != VERSION {
            return Err(Error::corrupt_store(
                path,
                format!("unsupported store version {version}"),
            ));
        }

        let mut frames: Vec<(u64, Slot)> = Vec::new();
        let mut pos = PREAMBLE_LEN;
        while pos < file_len {
            if file_len - pos < FRAME_HEADER_LEN {
                return Err(Error::corrupt_store(path, "truncated entry header"));
            }
            let mut header = [0u8; 16];
            reader
                .read_exact(&mut header)
                .map_err(|e| Error::io(e, path, "read"))?;
            let index = u64::from_le_bytes(header[..8].try_into().unwrap_or_default());
            let len = u64::from_le_bytes(header[8..].try_into().unwrap_or_default());
            let offset = pos + FRAME_HEADER_LEN;
            if len > file_len - offset {
                return Err(Error::corrupt_store(
                    path,
                    format!("entry {index} is truncated"),
                ));
            }
            frames.push((index, Slot { offset, len }));
            pos = offset + len;
            reader
                .seek(SeekFrom::Start(pos))
                .map_err(|e| Error::io(e, path, "seek"))?;
        }

        let slots = contiguous_slots(path, frames)?;
        tracing::debug!(path = %path.display(), entries = slots.len(), "Opened sequence store");
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            slots,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Raw bytes of entry `index`. Caller guarantees `index < len()`.
    pub(crate) fn read(&mut self, index: usize) -> Result<Vec<u8>> {
        let slot = self.slots.get(index).copied().ok_or(Error::IndexOutOfRange {
            index: isize::try_from(index).unwrap_or(isize::MAX),
            len: self.slots.len(),
        })?;
        let len = usize::try_from(slot.len)
            .map_err(|_| Error::corrupt_store(&self.path, "entry larger than address space"))?;
        let mut buf = vec![0u8; len];
        self.reader
            .seek(SeekFrom::Start(slot.offset))
            .and_then(|_| self.reader.read_exact(&mut buf))
            .map_err(|e| Error::io(e, &self.path, "read"))?;
        Ok(buf)
    }
}

/// Order frames by key, rejecting duplicates, gaps and out-of-range keys.
fn contiguous_slots(path: &Path, frames: Vec<(u64, Slot)>) -> Result<Vec<Slot>> {
    let n = frames.len();
    let mut slots: Vec<Option<Slot>> = vec![None; n];
    for (index, slot) in frames {
        let i = usize::try_from(index)
            .ok()
            .filter(|i| *i < n)
            .ok_or_else(|| {
                Error::corrupt_store(path, format!("key {index} outside valid range 0..{n}"))
            })?;
        if slots[i].replace(slot).is_some() {
            return Err(Error::corrupt_store(path, format!("duplicate key {index}")));
        }
    }
    // n frames with n distinct keys in 0..n cover the whole range
    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn raw_store(path: &Path, frames: &[(u64, &[u8])]) {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        for (index, payload) in frames {
            bytes.extend_from_slice(&index.to_le_bytes());
            bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
            bytes.extend_from_slice(payload);
        }
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_written_entries_read_back_by_index() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("iterable-cache.store");

        let mut writer = SequenceWriter::create(&path).unwrap();
        for word in ["alpha", "beta", "", "delta"] {
            writer.append(word.as_bytes()).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 4);
        assert!(!path.with_extension("store.tmp").exists());

        let mut store = SequenceStore::open(&path).unwrap();
        assert_eq!(store.len(), 4);
        assert_eq!(store.read(3).unwrap(), b"delta");
        assert_eq!(store.read(0).unwrap(), b"alpha");
        assert_eq!(store.read(2).unwrap(), b"");
        assert!(store.read(4).is_err());
    }

    #[test]
    fn test_empty_store_is_valid() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("s.store");
        SequenceWriter::create(&path).unwrap().finish().unwrap();
        assert_eq!(SequenceStore::open(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_unfinished_writer_leaves_no_store() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("s.store");
        let mut writer = SequenceWriter::create(&path).unwrap();
        writer.append(b"x").unwrap();
        drop(writer);
        assert!(!path.exists());
    }

    #[test]
    fn test_out_of_order_keys_are_accepted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("s.store");
        raw_store(&path, &[(1, b"b"), (0, b"a")]);
        let mut store = SequenceStore::open(&path).unwrap();
        assert_eq!(store.read(0).unwrap(), b"a");
        assert_eq!(store.read(1).unwrap(), b"b");
    }

    #[test]
    fn test_gap_in_keys_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("s.store");
        raw_store(&path, &[(0, b"a"), (2, b"c")]);
        let err = SequenceStore::open(&path).unwrap_err();
        assert!(matches!(err, Error::CorruptStore { .. }));
    }

    #[test]
    fn test_duplicate_key_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("s.store");
        raw_store(&path, &[(0, b"a"), (0, b"again")]);
        let err = SequenceStore::open(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate key 0"));
    }

    #[test]
    fn test_truncated_entry_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("s.store");
        raw_store(&path, &[(0, b"abcdef")]);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();
        let err = SequenceStore::open(&path).unwrap_err();
        assert!(matches!(err, Error::CorruptStore { .. }));
    }

    #[test]
    fn test_foreign_file_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("s.store");
        fs::write(&path, b"not a store at all").unwrap();
        assert!(matches!(
            SequenceStore::open(&path).unwrap_err(),
            Error::CorruptStore { .. }
        ));
    }
}
