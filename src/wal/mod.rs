//! Write-Ahead Log (WAL) Module
//!
//! A durable, append-only record stream backing the memtable. Every mutation
//! is appended here, and `sync`ed to stable media, before it is applied to
//! the in-memory index — so a crash between the two leaves the WAL as the
//! single source of truth for recovery.
//!
//! # On-disk layout
//!
//! ```text
//! [TYPE(1)][KEY_LEN(4 LE)][KEY][VALUE_LEN(4 LE)][VALUE]
//! [TYPE(1)][KEY_LEN(4 LE)][KEY][VALUE_LEN(4 LE)][VALUE]
//! ...
//! ```
//!
//! `TYPE` is `1` for `PUT` and `2` for `DELETE`; a `DELETE` record carries a
//! zero-length value. There is no header and no checksum: corruption
//! mid-record is indistinguishable from a crash-truncated write, and both
//! are handled identically by `replay` — the first short read stops
//! decoding and every fully-decoded record up to that point is kept.
//!
//! # Concurrency model
//!
//! The WAL file handle is owned by the single writer; there is no internal
//! locking here because the engine above enforces single-writer access.


use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

const TYPE_PUT: u8 = 1;
const TYPE_DELETE: u8 = 2;

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Whether `sync` requests a full `sync_all` (data + metadata) or the
/// weaker `sync_data` (data only). The engine's default is the strongest
/// available; `DataOnly` is a configuration downgrade for throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncPolicy {
    /// `File::sync_all` — flushes data and filesystem metadata.
    Full,
    /// `File::sync_data` — flushes data only.
    DataOnly,
}

impl Default for WalSyncPolicy {
    fn default() -> Self {
        WalSyncPolicy::Full
    }
}

/// A single decoded WAL record, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Insert or update `key` to `value`.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Tombstone `key`.
    Delete { key: Vec<u8> },
}

/// The append-only write-ahead log.
pub struct Wal {
    path: PathBuf,
    file: File,
    sync_policy: WalSyncPolicy,
    /// Approximate count of bytes appended since the last truncate.
    byte_len: AtomicUsize,
}

impl Wal {
    /// Opens (creating if absent) the WAL file at `path` for appending.
    pub fn open<P: AsRef<Path>>(path: P, sync_policy: WalSyncPolicy) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let byte_len = file.metadata()?.len() as usize;
        info!(path = %path.display(), byte_len, "WAL opened");

        Ok(Self {
            path,
            file,
            sync_policy,
            byte_len: AtomicUsize::new(byte_len),
        })
    }

    /// Appends a `PUT` record. Does not flush to stable storage.
    pub fn append_put(&mut self, key: &[u8], value: &[u8]) -> Result<(), WalError> {
        self.append_record(TYPE_PUT, key, value)
    }

    /// Appends a `DELETE` record (with an implicit zero-length value). Does
    /// not flush to stable storage.
    pub fn append_delete(&mut self, key: &[u8]) -> Result<(), WalError> {
        self.append_record(TYPE_DELETE, key, &[])
    }

    fn append_record(&mut self, tag: u8, key: &[u8], value: &[u8]) -> Result<(), WalError> {
        let mut buf = Vec::with_capacity(1 + 4 + key.len() + 4 + value.len());
        buf.push(tag);
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        buf.extend_from_slice(value);

        self.file.write_all(&buf)?;
        self.byte_len.fetch_add(buf.len(), Ordering::Relaxed);
        trace!(tag, key_len = key.len(), value_len = value.len(), "WAL append");
        Ok(())
    }

    /// Flushes buffered writes to the OS and, per the configured policy,
    /// requests the OS flush them to stable media. Called by the engine
    /// after every mutation, before acknowledging the caller.
    pub fn sync(&self) -> Result<(), WalError> {
        match self.sync_policy {
            WalSyncPolicy::Full => self.file.sync_all()?,
            WalSyncPolicy::DataOnly => self.file.sync_data()?,
        }
        Ok(())
    }

    /// Decodes every fully-written record in file order. Stops silently at
    /// the first short read inside a record — a crash mid-append — and
    /// discards the trailing partial record.
    pub fn replay(&mut self) -> Result<Vec<WalRecord>, WalError> {
        use std::io::{Seek, SeekFrom};

        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = io::BufReader::new(&mut self.file);
        let mut records = Vec::new();

        loop {
            let mut tag_buf = [0u8; 1];
            if !read_exact_or_stop(&mut reader, &mut tag_buf)? {
                break;
            }

            let Some(key) = read_len_prefixed(&mut reader)? else {
                warn!("WAL replay stopped: truncated key at tag byte");
                break;
            };

            let Some(value) = read_len_prefixed(&mut reader)? else {
                warn!("WAL replay stopped: truncated value");
                break;
            };

            let record = match tag_buf[0] {
                TYPE_PUT => WalRecord::Put { key, value },
                TYPE_DELETE => WalRecord::Delete { key },
                other => {
                    warn!(tag = other, "WAL replay stopped: unknown record tag");
                    break;
                }
            };
            records.push(record);
        }

        debug!(count = records.len(), "WAL replay complete");
        // Position the writer at the true end of the file for subsequent appends.
        self.file.seek(SeekFrom::End(0))?;
        Ok(records)
    }

    /// Closes, deletes, and reopens the WAL file empty. Invoked by the
    /// engine after a successful SSTable flush.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        // Truncate first, then reopen in the same append+read mode `open`
        // uses, so subsequent writes keep the append-mode guarantee.
        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.path)?;
        self.byte_len.store(0, Ordering::Relaxed);
        info!(path = %self.path.display(), "WAL truncated");
        Ok(())
    }

    /// Approximate number of bytes appended since the last truncate.
    pub fn byte_len(&self) -> usize {
        self.byte_len.load(Ordering::Relaxed)
    }
}

/// Reads exactly `buf.len()` bytes, or reports that the stream ended before
/// a single byte could be read (a clean stop point). Any other short read
/// is also treated as a stop, matching the crash-truncation contract.
fn read_exact_or_stop<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, WalError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => return Ok(false),
            n => filled += n,
        }
    }
    Ok(true)
}

fn read_len_prefixed<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, WalError> {
    let mut len_buf = [0u8; 4];
    if !read_exact_or_stop(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut value = vec![0u8; len];
    if len > 0 && !read_exact_or_stop(reader, &mut value)? {
        return Ok(None);
    }
    Ok(Some(value))
}
