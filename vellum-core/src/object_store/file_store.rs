// vellum-core/src/object_store/file_store.rs
// Append-only, checksummed log of store mutations, replayed on open

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::memory_store::{table, table_mut, Table};
use super::{IndexSpec, ObjectStore, WriteBatch};
use crate::document::Document;
use crate::error::{Result, VellumError};
use crate::{log_debug, log_error, log_info, log_warn};

/// Length prefix (u32 LE) before every payload
const LEN_SIZE: usize = 4;

/// CRC32 (u32 LE) after every payload
const CRC_SIZE: usize = 4;

/// Maximum record payload: 64MB (guards replay against a garbage length)
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// One logged mutation
///
/// Frame layout:
/// - payload_len: 4 bytes (u32 LE)
/// - payload: JSON encoded record
/// - checksum: 4 bytes (CRC32 of the payload)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogRecord {
    Create { store: String, indexes: Vec<IndexSpec> },
    Put { store: String, document: Document },
    Delete { store: String, id: String },
    Clear { store: String },
    Commit { store: String, batch: WriteBatch },
}

impl LogRecord {
    fn encode(&self) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(self)?;
        if payload.len() > MAX_RECORD_SIZE {
            return Err(VellumError::Serialization(format!(
                "record of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_RECORD_SIZE
            )));
        }

        let mut frame = Vec::with_capacity(LEN_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        Ok(frame)
    }

    /// Apply to the in-memory tables. Replay and live writes share this path.
    fn apply(self, tables: &mut BTreeMap<String, Table>) -> Result<()> {
        match self {
            LogRecord::Create { store, indexes } => {
                tables.entry(store).or_insert_with(|| Table::new(&indexes));
            }
            LogRecord::Put { store, document } => {
                table_mut(tables, &store)?
                    .docs
                    .insert(document.id().to_string(), document);
            }
            LogRecord::Delete { store, id } => {
                table_mut(tables, &store)?.docs.remove(&id);
            }
            LogRecord::Clear { store } => {
                table_mut(tables, &store)?.docs.clear();
            }
            LogRecord::Commit { store, batch } => {
                table_mut(tables, &store)?.apply(batch);
            }
        }
        Ok(())
    }
}

/// Decode frames from `bytes`, stopping at the first damaged one.
///
/// Returns the records and the length of the intact prefix.
fn decode_frames(bytes: &[u8]) -> (Vec<LogRecord>, usize) {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < LEN_SIZE + CRC_SIZE {
            break;
        }
        let mut len_bytes = [0u8; LEN_SIZE];
        len_bytes.copy_from_slice(&rest[..LEN_SIZE]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_RECORD_SIZE || rest.len() < LEN_SIZE + len + CRC_SIZE {
            break;
        }

        let payload = &rest[LEN_SIZE..LEN_SIZE + len];
        let mut crc_bytes = [0u8; CRC_SIZE];
        crc_bytes.copy_from_slice(&rest[LEN_SIZE + len..LEN_SIZE + len + CRC_SIZE]);
        if crc32fast::hash(payload) != u32::from_le_bytes(crc_bytes) {
            break;
        }

        match serde_json::from_slice::<LogRecord>(payload) {
            Ok(record) => records.push(record),
            Err(_) => break,
        }
        offset += LEN_SIZE + len + CRC_SIZE;
    }

    (records, offset)
}

struct FileInner {
    file: File,
    /// End of the last intact frame
    len: u64,
    tables: BTreeMap<String, Table>,
    closed: bool,
    /// Bytes of the next frame written before an injected failure
    #[cfg(test)]
    fail_next_write: Option<usize>,
}

impl FileInner {
    /// Write one record durably, then apply it
    ///
    /// A frame that fails to write or sync is cut off again, so the log
    /// never holds garbage ahead of later records. If that cut fails too
    /// the store refuses further writes.
    fn append(&mut self, record: LogRecord) -> Result<()> {
        let frame = record.encode()?;
        if let Err(e) = self.write_frame(&frame) {
            log_error!("Log append of {} bytes failed: {}", frame.len(), e);
            if let Err(rollback) = self.truncate_to(self.len) {
                log_error!("Could not cut torn frame at offset {}: {}", self.len, rollback);
                self.closed = true;
            }
            return Err(e.into());
        }
        self.len += frame.len() as u64;
        record.apply(&mut self.tables)
    }

    fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        #[cfg(test)]
        if let Some(written) = self.fail_next_write.take() {
            self.file.write_all(&frame[..written.min(frame.len())])?;
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "injected write failure"));
        }
        self.file.write_all(frame)?;
        self.file.sync_data()
    }

    fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
        self.file.set_len(len)?;
        self.file.seek(SeekFrom::Start(len))?;
        self.file.sync_data()
    }
}

/// File-backed object store
///
/// Every mutation is one framed record; a committed batch is a single
/// record, so a crash leaves either the whole batch or none of it.
pub struct FileObjectStore {
    path: PathBuf,
    inner: Mutex<FileInner>,
}

impl FileObjectStore {
    /// Open or create the log at `path` and replay it
    ///
    /// A torn or corrupt tail is truncated away with a warning; everything
    /// before it is kept.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let (records, valid_len) = decode_frames(&bytes);

        if valid_len < bytes.len() {
            log_warn!(
                "{}: dropping {} damaged bytes at offset {}",
                path.display(),
                bytes.len() - valid_len,
                valid_len
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        let mut tables = BTreeMap::new();
        let replayed = records.len();
        for (position, record) in records.into_iter().enumerate() {
            record.apply(&mut tables).map_err(|e| {
                VellumError::Corruption(format!("{}: record {}: {}", path.display(), position, e))
            })?;
        }
        file.seek(SeekFrom::End(0))?;

        log_info!(
            "Opened {} ({} records, {} stores)",
            path.display(),
            replayed,
            tables.len()
        );

        Ok(FileObjectStore {
            path,
            inner: Mutex::new(FileInner {
                file,
                len: valid_len as u64,
                tables,
                closed: false,
                #[cfg(test)]
                fail_next_write: None,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the log file in bytes
    pub fn file_len(&self) -> Result<u64> {
        Ok(self.inner.lock().file.metadata()?.len())
    }

    /// Rewrite the log so it holds only the live state
    ///
    /// The compacted log is written next to the current one and renamed
    /// over it once synced.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(VellumError::BackendUnavailable(self.path.display().to_string()));
        }

        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = File::create(&tmp_path)?;
            for (store, table) in &inner.tables {
                let create = LogRecord::Create {
                    store: store.clone(),
                    indexes: table.indexes.clone(),
                };
                tmp.write_all(&create.encode()?)?;
                if !table.docs.is_empty() {
                    let commit = LogRecord::Commit {
                        store: store.clone(),
                        batch: WriteBatch {
                            removals: Vec::new(),
                            upserts: table.docs.values().cloned().collect(),
                        },
                    };
                    tmp.write_all(&commit.encode()?)?;
                }
            }
            tmp.sync_all()?;
        }

        let before = inner.file.metadata()?.len();
        fs::rename(&tmp_path, &self.path)?;
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        let after = file.metadata()?.len();
        inner.file = file;
        inner.len = after;

        log_debug!("Compacted {}: {} -> {} bytes", self.path.display(), before, after);
        Ok(())
    }

    fn with_open<T>(&self, name: &str, f: impl FnOnce(&mut FileInner) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(VellumError::BackendUnavailable(name.to_string()));
        }
        f(&mut inner)
    }
}

impl ObjectStore for FileObjectStore {
    fn ready(&self) -> Result<()> {
        if self.inner.lock().closed {
            return Err(VellumError::BackendUnavailable(self.path.display().to_string()));
        }
        Ok(())
    }

    fn create_store(&self, name: &str, indexes: &[IndexSpec]) -> Result<()> {
        self.with_open(name, |inner| {
            if inner.tables.contains_key(name) {
                return Ok(());
            }
            inner.append(LogRecord::Create {
                store: name.to_string(),
                indexes: indexes.to_vec(),
            })
        })
    }

    fn store_names(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().tables.keys().cloned().collect())
    }

    fn get_all(&self, name: &str) -> Result<Vec<Document>> {
        self.with_open(name, |inner| Ok(table(&inner.tables, name)?.range(None, None)))
    }

    fn get_range(&self, name: &str, offset: Option<&str>, limit: Option<usize>) -> Result<Vec<Document>> {
        self.with_open(name, |inner| Ok(table(&inner.tables, name)?.range(offset, limit)))
    }

    fn put(&self, name: &str, document: Document) -> Result<()> {
        self.with_open(name, |inner| {
            table(&inner.tables, name)?;
            inner.append(LogRecord::Put {
                store: name.to_string(),
                document,
            })
        })
    }

    fn delete(&self, name: &str, id: &str) -> Result<()> {
        self.with_open(name, |inner| {
            table(&inner.tables, name)?;
            inner.append(LogRecord::Delete {
                store: name.to_string(),
                id: id.to_string(),
            })
        })
    }

    fn clear(&self, name: &str) -> Result<()> {
        self.with_open(name, |inner| {
            table(&inner.tables, name)?;
            inner.append(LogRecord::Clear { store: name.to_string() })
        })
    }

    fn commit(&self, name: &str, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.with_open(name, |inner| {
            table(&inner.tables, name)?;
            inner.append(LogRecord::Commit {
                store: name.to_string(),
                batch,
            })
        })
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.file.sync_all()?;
            inner.closed = true;
            log_info!("Closed {}", self.path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(id: &str, name: &str) -> Document {
        Document::from_value(json!({"id": id, "name": name})).unwrap()
    }

    fn ids(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d.id()).collect()
    }

    #[test]
    fn test_frame_roundtrip_and_damage_detection() {
        let record = LogRecord::Delete {
            store: "users".to_string(),
            id: "user-1".to_string(),
        };
        let mut bytes = record.encode().unwrap();
        let whole = bytes.len();

        let (records, valid) = decode_frames(&bytes);
        assert_eq!(records, vec![record]);
        assert_eq!(valid, whole);

        // Flip one payload byte: the checksum must reject the frame
        bytes[LEN_SIZE + 2] ^= 0xFF;
        let (records, valid) = decode_frames(&bytes);
        assert!(records.is_empty());
        assert_eq!(valid, 0);
    }

    #[test]
    fn test_reopen_replays_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.vlog");

        {
            let store = FileObjectStore::open(&path).unwrap();
            store.create_store("users", &[IndexSpec::new("email").unique()]).unwrap();
            store
                .commit(
                    "users",
                    WriteBatch {
                        removals: vec![],
                        upserts: vec![doc("user-2", "Jane Doe"), doc("user-1", "John Doe")],
                    },
                )
                .unwrap();
            store.delete("users", "user-2").unwrap();
            store.put("users", doc("user-3", "Jim")).unwrap();
            store.close().unwrap();
        }

        let store = FileObjectStore::open(&path).unwrap();
        assert_eq!(store.store_names().unwrap(), vec!["users"]);
        assert_eq!(ids(&store.get_all("users").unwrap()), vec!["user-1", "user-3"]);
    }

    #[test]
    fn test_failed_append_does_not_hide_later_commits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.vlog");

        {
            let store = FileObjectStore::open(&path).unwrap();
            store.create_store("users", &[]).unwrap();
            let intact = store.file_len().unwrap();

            // Half a frame reaches the disk before the write fails
            store.inner.lock().fail_next_write = Some(10);
            assert!(store.put("users", doc("user-1", "Lost")).is_err());
            assert_eq!(store.file_len().unwrap(), intact);
            assert!(store.get_all("users").unwrap().is_empty());

            store.put("users", doc("user-2", "Kept")).unwrap();
            store.close().unwrap();
        }

        let store = FileObjectStore::open(&path).unwrap();
        assert_eq!(ids(&store.get_all("users").unwrap()), vec!["user-2"]);
    }

    #[test]
    fn test_record_for_unknown_store_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.vlog");
        let orphan = LogRecord::Put {
            store: "ghosts".to_string(),
            document: doc("g-1", "Casper"),
        };
        fs::write(&path, orphan.encode().unwrap()).unwrap();

        match FileObjectStore::open(&path) {
            Err(VellumError::Corruption(message)) => assert!(message.contains("ghosts")),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("orphan record should not replay"),
        }
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.vlog");

        let intact_len = {
            let store = FileObjectStore::open(&path).unwrap();
            store.create_store("users", &[]).unwrap();
            store.put("users", doc("user-1", "John Doe")).unwrap();
            store.file_len().unwrap()
        };

        // Simulate a crash in the middle of writing the next frame
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x40, 0x00, 0x00, 0x00, b'{', b'"']).unwrap();
        drop(file);

        let store = FileObjectStore::open(&path).unwrap();
        assert_eq!(ids(&store.get_all("users").unwrap()), vec!["user-1"]);
        assert_eq!(store.file_len().unwrap(), intact_len);

        // New writes land after the intact prefix
        store.put("users", doc("user-2", "Jane Doe")).unwrap();
        drop(store);
        let store = FileObjectStore::open(&path).unwrap();
        assert_eq!(store.get_all("users").unwrap().len(), 2);
    }

    #[test]
    fn test_compact_shrinks_and_preserves_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.vlog");

        let store = FileObjectStore::open(&path).unwrap();
        store.create_store("users", &[]).unwrap();
        store.create_store("empty", &[]).unwrap();
        for round in 0..20 {
            store.put("users", doc("user-1", &format!("John {}", round))).unwrap();
        }
        store.put("users", doc("user-2", "Jane Doe")).unwrap();
        let before = store.file_len().unwrap();

        store.compact().unwrap();
        assert!(store.file_len().unwrap() < before);
        store.put("users", doc("user-3", "Jim")).unwrap();
        drop(store);

        let store = FileObjectStore::open(&path).unwrap();
        assert_eq!(store.store_names().unwrap(), vec!["empty", "users"]);
        let users = store.get_all("users").unwrap();
        assert_eq!(ids(&users), vec!["user-1", "user-2", "user-3"]);
        assert_eq!(users[0].get("name"), Some(&json!("John 19")));
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let store = FileObjectStore::open(dir.path().join("app.vlog")).unwrap();
        store.create_store("users", &[]).unwrap();
        store.close().unwrap();

        assert!(matches!(store.ready(), Err(VellumError::BackendUnavailable(_))));
        assert!(matches!(
            store.put("users", doc("user-1", "John")),
            Err(VellumError::BackendUnavailable(_))
        ));
    }
}
