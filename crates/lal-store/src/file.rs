use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use lal_types::{Block, BlockId, EventType, ParcelKey, ProjectId};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::memory::InMemoryBlockStore;
use crate::traits::BlockStore;

/// One entry in the ledger log.
///
/// On-disk frame:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (JSON-encoded LogRecord)]
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum LogRecord {
    Block(Box<Block>),
    Invalidated { block_id: BlockId },
}

/// Flush/sync strategy for the ledger log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every write.
    #[default]
    EveryWrite,
    /// Flush to the OS page cache only.
    OsDefault,
}

/// Configuration for [`FileBlockStore`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStoreConfig {
    pub sync_mode: SyncMode,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Destination of log frames.
trait LogSink: Write + Send {
    fn sync(&mut self) -> io::Result<()>;
    /// Cut the log back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogSink for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

struct LogWriter {
    sink: Box<dyn LogSink>,
    /// End of the last complete frame.
    offset: u64,
    /// Set when a failed frame could not be rolled back; the log tail is
    /// unknown and every later write is refused.
    broken: bool,
}

/// Durable block store backed by a single append-only log file.
///
/// Every accepted block and every invalidation is written as a framed
/// record; the file is never rewritten. Reads are served from an
/// in-memory index rebuilt by replaying the log on [`FileBlockStore::open`].
pub struct FileBlockStore {
    path: PathBuf,
    writer: Mutex<LogWriter>,
    index: InMemoryBlockStore,
    config: FileStoreConfig,
}

impl FileBlockStore {
    /// Open (or create) the log at `path` and replay it into the index.
    pub fn open(path: impl AsRef<Path>, config: FileStoreConfig) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let index = InMemoryBlockStore::new();
        let (good_len, file_len) = replay(path, &index)?;
        if good_len < file_len {
            // A torn tail would hide every frame written after it.
            warn!(
                path = %path.display(),
                good_len,
                file_len,
                "discarding torn tail of ledger log"
            );
            file.set_len(good_len)?;
        }

        info!(
            path = %path.display(),
            blocks = index.block_count()?,
            "ledger log opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(LogWriter {
                sink: Box::new(file),
                offset: good_len,
                broken: false,
            }),
            index,
            config,
        })
    }

    /// Path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current end-of-log offset in bytes.
    pub fn offset(&self) -> StoreResult<u64> {
        Ok(self.lock_writer()?.offset)
    }

    fn lock_writer(&self) -> StoreResult<MutexGuard<'_, LogWriter>> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Poisoned("ledger log writer"))
    }

    fn write_record(&self, w: &mut LogWriter, record: &LogRecord) -> StoreResult<()> {
        let payload =
            serde_json::to_vec(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let length = u32::try_from(payload.len())
            .map_err(|_| StoreError::Serialization("log record exceeds 4 GiB".into()))?;
        let crc = crc32fast::hash(&payload);

        if w.broken {
            return Err(StoreError::Poisoned("ledger log writer"));
        }

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&length.to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&payload);

        if let Err(e) = self.write_frame(w, &frame) {
            // A partial frame left on disk would misalign every later frame.
            if let Err(rollback) = w.sink.truncate(w.offset) {
                error!(
                    path = %self.path.display(),
                    offset = w.offset,
                    error = %rollback,
                    "could not roll back partial ledger frame; refusing further writes"
                );
                w.broken = true;
            }
            return Err(e.into());
        }

        w.offset += frame.len() as u64;
        Ok(())
    }

    fn write_frame(&self, w: &mut LogWriter, frame: &[u8]) -> io::Result<()> {
        w.sink.write_all(frame)?;
        w.sink.flush()?;
        if self.config.sync_mode == SyncMode::EveryWrite {
            w.sink.sync()?;
        }
        Ok(())
    }
}

/// Replay every intact frame into `index`.
///
/// Returns `(good_len, file_len)` where `good_len` is the offset just past
/// the last complete frame.
fn replay(path: &Path, index: &InMemoryBlockStore) -> StoreResult<(u64, u64)> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    let file_len = bytes.len() as u64;

    let mut offset = 0usize;
    let mut recovered = 0usize;
    while offset + HEADER_SIZE <= bytes.len() {
        let header = &bytes[offset..offset + HEADER_SIZE];
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let end = offset + HEADER_SIZE + length;
        if length == 0 || end > bytes.len() {
            warn!(offset, length, file_len, "truncated ledger frame; stopping recovery");
            break;
        }

        let payload = &bytes[offset + HEADER_SIZE..end];
        let actual_crc = crc32fast::hash(payload);
        if actual_crc != expected_crc {
            warn!(
                offset,
                expected = expected_crc,
                actual = actual_crc,
                "CRC mismatch; skipping ledger frame"
            );
            offset = end;
            continue;
        }

        match serde_json::from_slice::<LogRecord>(payload) {
            // Replay keeps log order; the chain verifier judges sequence indexes.
            Ok(LogRecord::Block(block)) => match index.insert_recovered(*block) {
                Ok(()) => recovered += 1,
                Err(e) => warn!(offset, error = %e, "unreplayable block frame; skipping"),
            },
            Ok(LogRecord::Invalidated { block_id }) => {
                if let Err(e) = index.mark_invalid(&block_id) {
                    warn!(offset, %block_id, error = %e, "invalidation of unknown block; skipping");
                }
            }
            Err(e) => warn!(offset, error = %e, "undecodable ledger frame; skipping"),
        }
        offset = end;
    }

    debug!(recovered, "ledger log replay complete");
    Ok((offset.min(bytes.len()) as u64, file_len))
}

impl BlockStore for FileBlockStore {
    fn append(&self, block: &Block) -> StoreResult<()> {
        let mut w = self.lock_writer()?;
        self.index.check_append(block)?;
        self.write_record(&mut w, &LogRecord::Block(Box::new(block.clone())))?;
        self.index.insert_checked(block.clone())?;
        debug!(
            parcel = %block.parcel_key,
            seq = block.sequence_index,
            offset = w.offset,
            "block persisted"
        );
        Ok(())
    }

    fn latest(&self, parcel: &ParcelKey) -> StoreResult<Option<Block>> {
        self.index.latest(parcel)
    }

    fn history(&self, parcel: &ParcelKey) -> StoreResult<Vec<Block>> {
        self.index.history(parcel)
    }

    fn by_project(&self, project: &ProjectId) -> StoreResult<Vec<Block>> {
        self.index.by_project(project)
    }

    fn by_event_type(&self, event_type: EventType) -> StoreResult<Vec<Block>> {
        self.index.by_event_type(event_type)
    }

    fn get(&self, block_id: &BlockId) -> StoreResult<Option<Block>> {
        self.index.get(block_id)
    }

    fn mark_invalid(&self, block_id: &BlockId) -> StoreResult<bool> {
        let mut w = self.lock_writer()?;
        if !self.index.is_valid(block_id)? {
            return Ok(false);
        }
        self.write_record(&mut w, &LogRecord::Invalidated { block_id: *block_id })?;
        self.index.mark_invalid(block_id)
    }

    fn parcels(&self) -> StoreResult<Vec<ParcelKey>> {
        self.index.parcels()
    }

    fn chain_len(&self, parcel: &ParcelKey) -> StoreResult<u64> {
        self.index.chain_len(parcel)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Seek, SeekFrom};

    use serde_json::Value;

    use super::*;
    use crate::memory::tests::{block, parcel};

    fn open(path: &Path) -> FileBlockStore {
        FileBlockStore::open(path, FileStoreConfig::default()).unwrap()
    }

    /// Rewrite the payload of frame `n` in place and recompute its CRC, the
    /// way someone editing the log at rest would.
    fn rewrite_frame(path: &Path, n: usize, mut edit: impl FnMut(&mut Value)) {
        let bytes = fs::read(path).unwrap();
        let mut out = Vec::with_capacity(bytes.len());
        let mut offset = 0;
        let mut index = 0;
        while offset < bytes.len() {
            let length = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
            let end = offset + HEADER_SIZE + length;
            let mut payload = bytes[offset + HEADER_SIZE..end].to_vec();
            if index == n {
                let mut record: Value = serde_json::from_slice(&payload).unwrap();
                edit(&mut record);
                payload = serde_json::to_vec(&record).unwrap();
            }
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
            out.extend_from_slice(&payload);
            offset = end;
            index += 1;
        }
        fs::write(path, out).unwrap();
    }

    /// Writes half of the first frame it is handed, then fails.
    struct FailOnce {
        file: File,
        armed: bool,
    }

    impl Write for FailOnce {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.armed {
                self.armed = false;
                self.file.write_all(&buf[..buf.len() / 2])?;
                return Err(io::Error::other("disk full"));
            }
            self.file.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    impl LogSink for FailOnce {
        fn sync(&mut self) -> io::Result<()> {
            self.file.sync_all()
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.file.set_len(len)
        }
    }

    /// Cannot be rolled back either.
    struct AlwaysFails;

    impl Write for AlwaysFails {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogSink for AlwaysFails {
        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn truncate(&mut self, _: u64) -> io::Result<()> {
            Err(io::Error::other("disk gone"))
        }
    }

    fn chain_seqs(store: &FileBlockStore, key: &str) -> Vec<u64> {
        store
            .history(&parcel(key))
            .unwrap()
            .iter()
            .map(|b| b.sequence_index)
            .collect()
    }

    #[test]
    fn reopen_restores_chains() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.log");

        let first = block("42/A", 0, EventType::MeasurementRecorded, "p1");
        let second = block("42/A", 1, EventType::NoticeGenerated, "p1");
        {
            let store = open(&path);
            store.append(&first).unwrap();
            store.append(&second).unwrap();
            store
                .append(&block("43/B", 0, EventType::MeasurementRecorded, "p2"))
                .unwrap();
        }

        let store = open(&path);
        assert_eq!(store.history(&parcel("42/A")).unwrap(), vec![first, second]);
        assert_eq!(store.parcels().unwrap().len(), 2);
    }

    #[test]
    fn empty_log_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir.path().join("nested/dir/ledger.log"));
        assert!(store.parcels().unwrap().is_empty());
        assert_eq!(store.offset().unwrap(), 0);
    }

    #[test]
    fn conflict_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir.path().join("ledger.log"));
        store
            .append(&block("42/A", 0, EventType::MeasurementRecorded, "p1"))
            .unwrap();
        let before = store.offset().unwrap();

        let err = store
            .append(&block("42/A", 0, EventType::MeasurementRecorded, "p1"))
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.offset().unwrap(), before);
    }

    #[test]
    fn invalidation_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.log");
        let first = block("42/A", 0, EventType::MeasurementRecorded, "p1");
        {
            let store = open(&path);
            store.append(&first).unwrap();
            assert!(store.mark_invalid(&first.block_id).unwrap());
            let after_first = store.offset().unwrap();
            assert!(!store.mark_invalid(&first.block_id).unwrap());
            assert_eq!(store.offset().unwrap(), after_first);
        }

        let store = open(&path);
        assert!(!store.get(&first.block_id).unwrap().unwrap().is_valid);
    }

    #[test]
    fn torn_tail_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.log");
        let good_len;
        {
            let store = open(&path);
            store
                .append(&block("42/A", 0, EventType::MeasurementRecorded, "p1"))
                .unwrap();
            good_len = store.offset().unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[200, 0, 0, 0, 1, 2, 3, 4, b'{']).unwrap();
        }

        let store = open(&path);
        assert_eq!(store.offset().unwrap(), good_len);
        store
            .append(&block("42/A", 1, EventType::NoticeGenerated, "p1"))
            .unwrap();
        drop(store);

        let store = open(&path);
        assert_eq!(store.chain_len(&parcel("42/A")).unwrap(), 2);
    }

    #[test]
    fn corrupt_frame_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.log");
        {
            let store = open(&path);
            store
                .append(&block("42/A", 0, EventType::MeasurementRecorded, "p1"))
                .unwrap();
            store
                .append(&block("43/B", 0, EventType::MeasurementRecorded, "p1"))
                .unwrap();
        }

        // Flip the first payload byte of the first frame.
        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            let mut buf = [0u8; 1];
            file.read_exact(&mut buf).unwrap();
            buf[0] ^= 0xFF;
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            file.write_all(&buf).unwrap();
        }

        let store = open(&path);
        assert!(store.history(&parcel("42/A")).unwrap().is_empty());
        assert_eq!(store.chain_len(&parcel("43/B")).unwrap(), 1);
    }

    #[test]
    fn failed_write_leaves_no_partial_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.log");
        let first = block("42/A", 0, EventType::MeasurementRecorded, "p1");
        let second = block("42/A", 1, EventType::NoticeGenerated, "p1");
        {
            let store = open(&path);
            store.append(&first).unwrap();
            let good_len = store.offset().unwrap();

            store.writer.lock().unwrap().sink = Box::new(FailOnce {
                file: OpenOptions::new().append(true).open(&path).unwrap(),
                armed: true,
            });
            let err = store.append(&second).unwrap_err();
            assert!(matches!(err, StoreError::Io(_)));
            assert_eq!(store.offset().unwrap(), good_len);
            assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
            assert_eq!(store.chain_len(&parcel("42/A")).unwrap(), 1);

            store.append(&second).unwrap();
        }

        let store = open(&path);
        assert_eq!(store.history(&parcel("42/A")).unwrap(), vec![first, second]);
    }

    #[test]
    fn failed_rollback_refuses_further_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir.path().join("ledger.log"));
        store.writer.lock().unwrap().sink = Box::new(AlwaysFails);

        let err = store
            .append(&block("42/A", 0, EventType::MeasurementRecorded, "p1"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        let err = store
            .append(&block("42/A", 0, EventType::MeasurementRecorded, "p1"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Poisoned(_)));
        assert!(store.parcels().unwrap().is_empty());
    }

    #[test]
    fn edited_sequence_index_keeps_later_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.log");
        {
            let store = open(&path);
            for seq in 0..4 {
                store
                    .append(&block("42/A", seq, EventType::DocumentUploaded, "p1"))
                    .unwrap();
            }
        }
        rewrite_frame(&path, 1, |record| {
            record["block"]["sequence_index"] = Value::from(9);
        });

        let store = open(&path);
        assert_eq!(chain_seqs(&store, "42/A"), vec![0, 9, 2, 3]);
        assert_eq!(store.index.block_count().unwrap(), 4);
    }

    #[test]
    fn edited_payload_with_fixed_crc_is_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.log");
        {
            let store = open(&path);
            for seq in 0..3 {
                store
                    .append(&block("42/A", seq, EventType::DocumentUploaded, "p1"))
                    .unwrap();
            }
        }
        rewrite_frame(&path, 2, |record| {
            record["block"]["actor_id"] = Value::from("forger");
        });

        let store = open(&path);
        let history = store.history(&parcel("42/A")).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].actor_id.as_str(), "forger");
    }

    #[test]
    fn sync_mode_parses_from_config() {
        let config: FileStoreConfig = serde_json::from_str(r#"{"sync_mode":"os_default"}"#).unwrap();
        assert_eq!(config.sync_mode, SyncMode::OsDefault);
        let config: FileStoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.sync_mode, SyncMode::EveryWrite);
    }
}
