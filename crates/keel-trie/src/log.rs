use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use keel_types::Hash;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{TrieError, TrieResult};
use crate::traits::NodeStore;

/// Record header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: u64 = 8;

/// Per-entry prefix inside a record payload: 32 bytes hash + 4 bytes length.
const ENTRY_PREFIX: u64 = 36;

/// Flush/sync strategy for the node log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// `fsync` after every batch.
    #[default]
    EveryBatch,
    /// Rely on OS page-cache buffering (fastest, least durable).
    OsDefault,
}

/// Location of an entry's bytes inside the log file.
#[derive(Clone, Copy, Debug)]
struct Slot {
    offset: u64,
    len: u32,
}

struct LogWriter {
    writer: BufWriter<File>,
    /// Current end of the log.
    offset: u64,
    /// Set when a failed append could not be undone; the end of the file is
    /// then unknown and no further records are written.
    broken: bool,
}

impl LogWriter {
    fn append(&mut self, header: [u8; 8], payload: &[u8], sync_mode: SyncMode) -> io::Result<()> {
        self.writer.write_all(&header)?;
        self.writer.write_all(payload)?;
        self.writer.flush()?;
        if sync_mode == SyncMode::EveryBatch {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Cut the file back to `offset` after a failed append. Bytes still
    /// sitting in the buffer are discarded, never flushed.
    fn rewind(&mut self, path: &Path, offset: u64) -> io::Result<()> {
        let fresh = BufWriter::new(OpenOptions::new().append(true).open(path)?);
        let (file, _unflushed) = std::mem::replace(&mut self.writer, fresh).into_parts();
        file.set_len(offset)?;
        self.offset = offset;
        Ok(())
    }
}

/// Append-only, crash-recoverable node store.
///
/// Each [`NodeStore::write_batch`] becomes a single record:
///
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [payload: repeated [32 bytes hash][4 bytes len LE][len bytes]]
/// ```
///
/// An index from hash to file position is rebuilt on open. A record cut short
/// by a crash is truncated away, so a batch is either fully recovered or not
/// at all.
pub struct LogNodeStore {
    path: PathBuf,
    index: RwLock<HashMap<Hash, Slot>>,
    writer: Mutex<LogWriter>,
    reader: Mutex<File>,
    sync_mode: SyncMode,
}

impl LogNodeStore {
    /// Open (or create) the log at `path` and rebuild its index.
    pub fn open(path: &Path, sync_mode: SyncMode) -> TrieResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        let (index, valid_len) = Self::recover(path)?;
        let file_len = fs::metadata(path)?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "discarding torn tail of node log"
            );
            OpenOptions::new().write(true).open(path)?.set_len(valid_len)?;
        }

        let file = OpenOptions::new().append(true).open(path)?;
        let reader = File::open(path)?;

        debug!(path = %path.display(), entries = index.len(), "node log opened");
        Ok(Self {
            path: path.to_path_buf(),
            index: RwLock::new(index),
            writer: Mutex::new(LogWriter {
                writer: BufWriter::new(file),
                offset: valid_len,
                broken: false,
            }),
            reader: Mutex::new(reader),
            sync_mode,
        })
    }

    /// Scan the log front-to-back. Returns the index and the length of the
    /// valid prefix of the file.
    fn recover(path: &Path) -> TrieResult<(HashMap<Hash, Slot>, u64)> {
        let mut file = BufReader::new(File::open(path)?);
        let file_len = file.get_ref().metadata()?.len();
        let mut index = HashMap::new();
        let mut offset: u64 = 0;

        while offset + HEADER_SIZE <= file_len {
            let mut header = [0u8; HEADER_SIZE as usize];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if length == 0 || offset + HEADER_SIZE + u64::from(length) > file_len {
                warn!(offset, length, file_len, "invalid node log record; stopping recovery");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            file.read_exact(&mut payload)?;

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                warn!(
                    offset,
                    expected = expected_crc,
                    actual = actual_crc,
                    "CRC mismatch; skipping node log record"
                );
                offset += HEADER_SIZE + u64::from(length);
                continue;
            }

            let payload_start = offset + HEADER_SIZE;
            match parse_payload(&payload) {
                Some(entries) => {
                    for (hash, at, len) in entries {
                        index.insert(
                            hash,
                            Slot {
                                offset: payload_start + at,
                                len,
                            },
                        );
                    }
                }
                None => warn!(offset, "malformed node log record; skipping"),
            }
            offset += HEADER_SIZE + u64::from(length);
        }

        debug!(entries = index.len(), valid_len = offset, "node log recovery complete");
        Ok((index, offset))
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.index.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current end of the log in bytes.
    pub fn offset(&self) -> u64 {
        self.writer.lock().expect("lock poisoned").offset
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Split a record payload into `(hash, offset within payload, len)` triples.
fn parse_payload(payload: &[u8]) -> Option<Vec<(Hash, u64, u32)>> {
    let mut entries = Vec::new();
    let mut at = 0usize;
    while at < payload.len() {
        let prefix = payload.get(at..at + ENTRY_PREFIX as usize)?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&prefix[..32]);
        let len = u32::from_le_bytes([prefix[32], prefix[33], prefix[34], prefix[35]]);
        let start = at + ENTRY_PREFIX as usize;
        let end = start.checked_add(len as usize)?;
        if end > payload.len() {
            return None;
        }
        entries.push((Hash::from_raw(hash), start as u64, len));
        at = end;
    }
    Some(entries)
}

impl NodeStore for LogNodeStore {
    fn read(&self, hash: &Hash) -> TrieResult<Option<Vec<u8>>> {
        let slot = match self.index.read().expect("lock poisoned").get(hash) {
            Some(slot) => *slot,
            None => return Ok(None),
        };
        let mut reader = self.reader.lock().expect("lock poisoned");
        reader.seek(SeekFrom::Start(slot.offset))?;
        let mut bytes = vec![0u8; slot.len as usize];
        reader.read_exact(&mut bytes)?;
        Ok(Some(bytes))
    }

    fn write_batch(&self, batch: &[(Hash, Vec<u8>)]) -> TrieResult<()> {
        let fresh: Vec<&(Hash, Vec<u8>)> = {
            let index = self.index.read().expect("lock poisoned");
            let mut seen = std::collections::HashSet::new();
            batch
                .iter()
                .filter(|(hash, _)| !index.contains_key(hash) && seen.insert(*hash))
                .collect()
        };
        if fresh.is_empty() {
            return Ok(());
        }

        let mut payload = Vec::new();
        let mut slots = Vec::with_capacity(fresh.len());
        for (hash, bytes) in &fresh {
            let len = u32::try_from(bytes.len())
                .map_err(|_| TrieError::Serialization("node larger than 4 GiB".into()))?;
            payload.extend_from_slice(hash.as_bytes());
            payload.extend_from_slice(&len.to_le_bytes());
            slots.push((*hash, payload.len() as u64, len));
            payload.extend_from_slice(bytes);
        }
        let length = u32::try_from(payload.len())
            .map_err(|_| TrieError::Serialization("batch larger than 4 GiB".into()))?;
        let crc = crc32fast::hash(&payload);

        let mut header = [0u8; HEADER_SIZE as usize];
        header[..4].copy_from_slice(&length.to_le_bytes());
        header[4..].copy_from_slice(&crc.to_le_bytes());

        let mut w = self.writer.lock().expect("lock poisoned");
        if w.broken {
            return Err(io::Error::other("node log unusable after a failed append").into());
        }
        let record_offset = w.offset;
        if let Err(e) = w.append(header, &payload, self.sync_mode) {
            warn!(offset = record_offset, error = %e, "node batch append failed; rewinding log");
            if let Err(rewind) = w.rewind(&self.path, record_offset) {
                error!(offset = record_offset, error = %rewind, "node log could not be rewound");
                w.broken = true;
            }
            return Err(e.into());
        }
        w.offset += HEADER_SIZE + u64::from(length);

        let payload_start = record_offset + HEADER_SIZE;
        let mut index = self.index.write().expect("lock poisoned");
        for (hash, at, len) in slots {
            index.insert(
                hash,
                Slot {
                    offset: payload_start + at,
                    len,
                },
            );
        }
        drop(index);

        debug!(
            offset = record_offset,
            entries = fresh.len(),
            bytes = payload.len(),
            "node batch appended"
        );
        Ok(())
    }

    fn contains(&self, hash: &Hash) -> TrieResult<bool> {
        Ok(self.index.read().expect("lock poisoned").contains_key(hash))
    }
}

impl std::fmt::Debug for LogNodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogNodeStore")
            .field("path", &self.path)
            .field("entries", &self.len())
            .field("sync_mode", &self.sync_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(data: &[u8]) -> (Hash, Vec<u8>) {
        (Hash::of(data), data.to_vec())
    }

    #[test]
    fn write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogNodeStore::open(&dir.path().join("nodes.log"), SyncMode::default()).unwrap();

        let a = entry(b"alpha");
        let b = entry(b"beta");
        store.write_batch(&[a.clone(), b.clone()]).unwrap();

        assert_eq!(store.read(&a.0).unwrap(), Some(a.1));
        assert_eq!(store.read(&b.0).unwrap(), Some(b.1));
        assert_eq!(store.read(&Hash::of(b"gamma")).unwrap(), None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn reopen_rebuilds_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.log");
        let a = entry(b"alpha");
        let b = entry(b"beta");
        {
            let store = LogNodeStore::open(&path, SyncMode::EveryBatch).unwrap();
            store.write_batch(&[a.clone()]).unwrap();
            store.write_batch(&[b.clone()]).unwrap();
        }

        let store = LogNodeStore::open(&path, SyncMode::EveryBatch).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.read(&a.0).unwrap(), Some(a.1));
        assert_eq!(store.read(&b.0).unwrap(), Some(b.1));
    }

    #[test]
    fn duplicate_entries_are_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogNodeStore::open(&dir.path().join("nodes.log"), SyncMode::OsDefault).unwrap();
        let a = entry(b"alpha");

        store.write_batch(&[a.clone(), a.clone()]).unwrap();
        let after_first = store.offset();
        store.write_batch(&[a.clone()]).unwrap();

        assert_eq!(store.offset(), after_first);
        assert_eq!(store.offset(), HEADER_SIZE + ENTRY_PREFIX + 5);
    }

    #[test]
    fn torn_tail_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.log");
        let a = entry(b"alpha");
        let b = entry(b"beta");
        let total = {
            let store = LogNodeStore::open(&path, SyncMode::EveryBatch).unwrap();
            store.write_batch(&[a.clone()]).unwrap();
            store.write_batch(&[b.clone()]).unwrap();
            store.offset()
        };

        // Cut the second record short.
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(total - 3)
            .unwrap();

        let store = LogNodeStore::open(&path, SyncMode::EveryBatch).unwrap();
        assert_eq!(store.read(&a.0).unwrap(), Some(a.1.clone()));
        assert_eq!(store.read(&b.0).unwrap(), None);

        // The log stays appendable after truncation.
        store.write_batch(&[b.clone()]).unwrap();
        drop(store);
        let store = LogNodeStore::open(&path, SyncMode::EveryBatch).unwrap();
        assert_eq!(store.read(&a.0).unwrap(), Some(a.1));
        assert_eq!(store.read(&b.0).unwrap(), Some(b.1));
    }

    #[test]
    fn crc_mismatch_skips_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.log");
        let a = entry(b"alpha");
        let b = entry(b"beta");
        {
            let store = LogNodeStore::open(&path, SyncMode::EveryBatch).unwrap();
            store.write_batch(&[a.clone()]).unwrap();
            store.write_batch(&[b.clone()]).unwrap();
        }

        // Flip the first payload byte of the first record.
        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(HEADER_SIZE)).unwrap();
            let mut buf = [0u8; 1];
            file.read_exact(&mut buf).unwrap();
            buf[0] ^= 0xFF;
            file.seek(SeekFrom::Start(HEADER_SIZE)).unwrap();
            file.write_all(&buf).unwrap();
        }

        let store = LogNodeStore::open(&path, SyncMode::EveryBatch).unwrap();
        assert_eq!(store.read(&a.0).unwrap(), None);
        assert_eq!(store.read(&b.0).unwrap(), Some(b.1));
    }

    #[test]
    fn rewind_drops_a_partial_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.log");
        let a = entry(b"alpha");
        let b = entry(b"beta");
        let store = LogNodeStore::open(&path, SyncMode::EveryBatch).unwrap();
        store.write_batch(&[a.clone()]).unwrap();
        let end = store.offset();

        // A record that got half way out: some bytes on disk, some buffered.
        {
            let mut w = store.writer.lock().unwrap();
            w.writer.write_all(b"\x40\x00\x00\x00garbage").unwrap();
            w.writer.flush().unwrap();
            w.writer.write_all(b"still buffered").unwrap();
            w.rewind(&path, end).unwrap();
        }
        assert_eq!(fs::metadata(&path).unwrap().len(), end);
        assert_eq!(store.offset(), end);

        store.write_batch(&[b.clone()]).unwrap();
        assert_eq!(store.read(&b.0).unwrap(), Some(b.1.clone()));
        let total = store.offset();
        drop(store);

        assert_eq!(fs::metadata(&path).unwrap().len(), total);
        let store = LogNodeStore::open(&path, SyncMode::EveryBatch).unwrap();
        assert_eq!(store.offset(), total);
        assert_eq!(store.read(&a.0).unwrap(), Some(a.1));
        assert_eq!(store.read(&b.0).unwrap(), Some(b.1));
    }

    #[test]
    fn broken_log_refuses_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogNodeStore::open(&dir.path().join("nodes.log"), SyncMode::EveryBatch).unwrap();
        store.writer.lock().unwrap().broken = true;
        assert!(matches!(
            store.write_batch(&[entry(b"alpha")]),
            Err(TrieError::Io(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogNodeStore::open(&dir.path().join("nodes.log"), SyncMode::EveryBatch).unwrap();
        store.write_batch(&[]).unwrap();
        assert_eq!(store.offset(), 0);
        assert!(store.is_empty());
    }
}
