//! Write-ahead log adapters
//!
//! Three implementations of `WriteAheadLog`:
//! - `NoopWal` - accepts every record, persists nothing
//! - `MemoryWal` - keeps records in a vector; appends and syncs can be made to fail
//! - `FileWal` - append-only file of framed records
//!
//! ## File Format
//!
//! A WAL file is a plain sequence of frames with no header:
//!
//! ```text
//! [length: u32][payload: bytes][crc32: u32]
//! ```
//!
//! A frame cut short at the end of the file is a torn write from a crash and
//! is ignored on read. A complete frame whose checksum does not match is
//! corruption and fails the read.

use crc32fast::Hasher;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use txnkv_core::{Error, Result, WriteAheadLog};

/// Bytes of framing around each payload: length(4) + crc(4)
const FRAME_OVERHEAD: usize = 8;

/// Frame a payload: `[length][payload][crc32]`
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);

    let mut hasher = Hasher::new();
    hasher.update(payload);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());
    buf
}

/// Decode one frame from the start of `buf`
///
/// Returns the payload and the number of bytes consumed, or `None` if `buf`
/// ends before the frame does. `offset` is only used in error messages.
///
/// # Errors
///
/// Returns `Error::Corruption` when the checksum does not match.
pub fn decode_frame(buf: &[u8], offset: u64) -> Result<Option<(Vec<u8>, usize)>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let mut len_buf = [0u8; 4];
    len_buf.copy_from_slice(&buf[..4]);
    let payload_len = u32::from_le_bytes(len_buf) as usize;

    let total = payload_len + FRAME_OVERHEAD;
    if buf.len() < total {
        return Ok(None);
    }

    let payload = &buf[4..4 + payload_len];
    let mut crc_buf = [0u8; 4];
    crc_buf.copy_from_slice(&buf[4 + payload_len..total]);
    let expected_crc = u32::from_le_bytes(crc_buf);

    let mut hasher = Hasher::new();
    hasher.update(payload);
    let actual_crc = hasher.finalize();

    if actual_crc != expected_crc {
        return Err(Error::Corruption(format!(
            "offset {}: CRC mismatch: expected {:08x}, got {:08x}",
            offset, expected_crc, actual_crc
        )));
    }

    Ok(Some((payload.to_vec(), total)))
}

/// Write-ahead log that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWal;

impl WriteAheadLog for NoopWal {
    fn append(&self, _record: &[u8]) -> Result<()> {
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory write-ahead log
///
/// Records are retained in append order. `set_fail_appends` and
/// `set_fail_syncs` make the next calls return `Error::Wal`, which is how the
/// commit path's failure handling is exercised.
#[derive(Debug, Default)]
pub struct MemoryWal {
    records: Mutex<Vec<Vec<u8>>>,
    syncs: AtomicU64,
    last_undone: AtomicBool,
    fail_appends: AtomicBool,
    fail_syncs: AtomicBool,
}

impl MemoryWal {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every appended record, oldest first
    pub fn records(&self) -> Vec<Vec<u8>> {
        self.records.lock().clone()
    }

    /// Number of appended records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True if nothing was appended
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Number of successful syncs
    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }

    /// Make `append` fail until reset
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Make `sync` fail until reset
    pub fn set_fail_syncs(&self, fail: bool) {
        self.fail_syncs.store(fail, Ordering::SeqCst);
    }
}

impl WriteAheadLog for MemoryWal {
    fn append(&self, record: &[u8]) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(Error::Wal("injected append failure".to_string()));
        }
        self.records.lock().push(record.to_vec());
        self.last_undone.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        if self.fail_syncs.load(Ordering::SeqCst) {
            return Err(Error::Wal("injected sync failure".to_string()));
        }
        self.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut records = self.records.lock();
        if !self.last_undone.swap(true, Ordering::SeqCst) {
            records.pop();
        }
        Ok(())
    }
}

/// File-backed write-ahead log
///
/// Appends go through a buffered writer; `sync` flushes it and fsyncs the
/// file. `rollback` truncates the file back to where the last append began,
/// discarding any of its bytes still buffered. Reopening an existing file
/// continues appending at its end.
///
/// # Example
///
/// ```ignore
/// let wal = FileWal::open("data/txnkv.wal")?;
/// wal.append(&record)?;
/// wal.sync()?;
/// let records = wal.read_all()?;
/// ```
pub struct FileWal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    offset: AtomicU64,
    // Start of the last appended frame; only touched under `writer`
    last_start: Mutex<Option<u64>>,
}

impl FileWal {
    /// Open an existing WAL file or create a new one
    ///
    /// Creates parent directories if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let offset = file.metadata()?.len();

        tracing::debug!(target: "txnkv::wal", path = %path.display(), offset, "WAL opened");

        Ok(FileWal {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            offset: AtomicU64::new(offset),
            last_start: Mutex::new(None),
        })
    }

    /// Read every complete record from the start of the file
    ///
    /// A torn frame at the end of the file is ignored.
    pub fn read_all(&self) -> Result<Vec<Vec<u8>>> {
        self.writer
            .lock()
            .flush()
            .map_err(|e| Error::Wal(format!("Failed to flush: {}", e)))?;

        let bytes = std::fs::read(&self.path)?;
        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            match decode_frame(&bytes[pos..], pos as u64)? {
                Some((payload, consumed)) => {
                    records.push(payload);
                    pos += consumed;
                }
                None => {
                    tracing::warn!(
                        target: "txnkv::wal",
                        offset = pos,
                        trailing = bytes.len() - pos,
                        "Ignoring torn frame at end of WAL"
                    );
                    break;
                }
            }
        }
        Ok(records)
    }

    /// Bytes appended so far, including bytes still buffered
    pub fn size(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WriteAheadLog for FileWal {
    fn append(&self, record: &[u8]) -> Result<()> {
        let frame = encode_frame(record);
        let mut writer = self.writer.lock();
        let offset = self.offset.load(Ordering::SeqCst);
        writer.write_all(&frame).map_err(|e| {
            Error::Wal(format!("Failed to write record at offset {}: {}", offset, e))
        })?;
        self.offset.fetch_add(frame.len() as u64, Ordering::SeqCst);
        *self.last_start.lock() = Some(offset);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer
            .flush()
            .map_err(|e| Error::Wal(format!("Failed to flush: {}", e)))?;
        writer
            .get_mut()
            .sync_data()
            .map_err(|e| Error::Wal(format!("Failed to fsync: {}", e)))
    }

    fn rollback(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        let Some(start) = self.last_start.lock().take() else {
            return Ok(());
        };
        let end = self.offset.load(Ordering::SeqCst);
        let buffered_from = end - writer.buffer().len() as u64;

        // Earlier frames that are still buffered must reach the file
        let keep = writer.buffer()[..start.saturating_sub(buffered_from) as usize].to_vec();
        let placeholder = writer
            .get_ref()
            .try_clone()
            .map_err(|e| Error::Wal(format!("Failed to reopen for rollback: {}", e)))?;
        let (mut file, _discarded) =
            std::mem::replace(&mut *writer, BufWriter::new(placeholder)).into_parts();

        file.write_all(&keep)
            .and_then(|()| file.set_len(start))
            .map_err(|e| {
                Error::Wal(format!("Failed to truncate to offset {}: {}", start, e))
            })?;
        self.offset.store(start, Ordering::SeqCst);

        tracing::debug!(target: "txnkv::wal", path = %self.path.display(), offset = start, dropped = end - start, "WAL record rolled back");
        Ok(())
    }
}

impl Drop for FileWal {
    fn drop(&mut self) {
        let _ = self.writer.get_mut().flush();
    }
}

impl std::fmt::Debug for FileWal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWal")
            .field("path", &self.path)
            .field("size", &self.size())
            .finish()
    }
}
