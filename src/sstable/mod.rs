//! Sorted String Table (SSTable) Module
//!
//! An immutable, disk-backed sorted table produced by a single memtable
//! flush. There is no compaction in this design, so an SSTable is written
//! exactly once and never merged or rewritten.
//!
//! # On-disk layout
//!
//! ```text
//! [DATA REGION]
//!   per entry, ascending key order:
//!   [TOMBSTONE(1)][KEY_LEN(4 LE)][KEY][VALUE_LEN(4 LE)][VALUE]
//! [INDEX REGION]
//!   per entry, same order:
//!   [KEY_LEN(4 LE)][KEY][OFFSET(8 LE)]
//! [TRAILER]
//!   [INDEX_REGION_OFFSET(8 LE)][INDEX_ENTRY_COUNT(4 LE)]
//! ```
//!
//! The trailer is exactly the last 12 bytes of the file. The index stores
//! an 8-byte absolute offset per entry rather than assuming a fixed stride,
//! because keys are variable length.
//!
//! # Concurrency model
//!
//! SSTables are immutable after `create` returns, so reads are lock-free:
//! any number of readers may open independent file handles against the
//! same path.


use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors returned by SSTable build/read/lookup operations.
#[derive(Debug, Error)]
pub enum SSTableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The trailer or index region could not be decoded at open time.
    #[error("corrupt SSTable at {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

/// A single in-memory entry destined for a new SSTable.
pub struct SSTableEntry {
    pub key: Box<[u8]>,
    pub value: Vec<u8>,
    pub deleted: bool,
}

/// Result of a point lookup against an SSTable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SSTableLookup {
    Present(Vec<u8>),
    Tombstone,
    NotFound,
}

const TRAILER_SIZE: u64 = 12;

/// Builds an immutable SSTable file from a set of entries.
///
/// `entries` is sorted ascending by key before writing (keys are unique
/// within a single memtable flush, so a stable sort is not required). Any
/// I/O error aborts with the partial file left behind; the caller is
/// expected to treat the table as absent and retry with a new ID on the
/// next flush.
pub fn create<P: AsRef<Path>>(path: P, mut entries: Vec<SSTableEntry>) -> Result<(), SSTableError> {
    let path = path.as_ref();
    entries.sort_by(|a, b| a.key.cmp(&b.key));

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    let mut offsets = Vec::with_capacity(entries.len());
    let mut cursor: u64 = 0;

    for entry in &entries {
        offsets.push(cursor);

        let mut buf = Vec::with_capacity(1 + 4 + entry.key.len() + 4 + entry.value.len());
        buf.push(entry.deleted as u8);
        buf.extend_from_slice(&(entry.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&entry.key);
        buf.extend_from_slice(&(entry.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&entry.value);

        file.write_all(&buf)?;
        cursor += buf.len() as u64;
    }

    let index_region_offset = cursor;
    for (entry, offset) in entries.iter().zip(offsets.iter()) {
        let mut buf = Vec::with_capacity(4 + entry.key.len() + 8);
        buf.extend_from_slice(&(entry.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&entry.key);
        buf.extend_from_slice(&offset.to_le_bytes());
        file.write_all(&buf)?;
    }

    file.write_all(&index_region_offset.to_le_bytes())?;
    file.write_all(&(entries.len() as u32).to_le_bytes())?;

    file.sync_all()?;
    debug!(path = %path.display(), entries = entries.len(), "SSTable created");
    Ok(())
}

/// An open, immutable SSTable reader. The index is loaded into memory once
/// at open time and held for the lifetime of the reader.
pub struct SSTable {
    path: PathBuf,
    /// `(key, data-region offset)`, sorted ascending by key.
    index: Vec<(Box<[u8]>, u64)>,
}

impl SSTable {
    /// Opens `path`, reading the trailer and index region into memory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SSTableError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();

        if file_len < TRAILER_SIZE {
            return Err(SSTableError::Corrupt {
                path,
                reason: "file shorter than trailer".to_string(),
            });
        }

        file.seek(SeekFrom::Start(file_len - TRAILER_SIZE))?;
        let mut trailer = [0u8; TRAILER_SIZE as usize];
        file.read_exact(&mut trailer)?;
        let index_region_offset = u64::from_le_bytes(trailer[0..8].try_into().unwrap());
        let count = u32::from_le_bytes(trailer[8..12].try_into().unwrap()) as usize;

        if index_region_offset > file_len - TRAILER_SIZE {
            return Err(SSTableError::Corrupt {
                path,
                reason: "index region offset beyond file".to_string(),
            });
        }

        file.seek(SeekFrom::Start(index_region_offset))?;
        let mut reader = io::BufReader::new(&mut file);
        let mut index = Vec::with_capacity(count);

        for _ in 0..count {
            let mut len_buf = [0u8; 4];
            reader.read_exact(&mut len_buf).map_err(|e| corrupt(&path, e))?;
            let key_len = u32::from_le_bytes(len_buf) as usize;

            let mut key = vec![0u8; key_len];
            reader.read_exact(&mut key).map_err(|e| corrupt(&path, e))?;

            let mut offset_buf = [0u8; 8];
            reader.read_exact(&mut offset_buf).map_err(|e| corrupt(&path, e))?;
            let offset = u64::from_le_bytes(offset_buf);

            index.push((key.into_boxed_slice(), offset));
        }

        debug!(path = %path.display(), entries = index.len(), "SSTable opened");
        Ok(Self { path, index })
    }

    /// Path this reader was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries indexed (including tombstones).
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether this table has no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Binary-searches the in-memory index and, on a hit, seeks a fresh
    /// read handle to decode the stored record.
    pub fn get(&self, key: &[u8]) -> Result<SSTableLookup, SSTableError> {
        let found = self.index.binary_search_by(|(k, _)| k.as_ref().cmp(key));
        let offset = match found {
            Ok(i) => self.index[i].1,
            Err(_) => {
                trace!(path = %self.path.display(), "SSTable miss");
                return Ok(SSTableLookup::NotFound);
            }
        };

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut tombstone_buf = [0u8; 1];
        file.read_exact(&mut tombstone_buf)?;
        let deleted = tombstone_buf[0] != 0;

        let mut key_len_buf = [0u8; 4];
        file.read_exact(&mut key_len_buf)?;
        let key_len = u32::from_le_bytes(key_len_buf) as u64;
        file.seek(SeekFrom::Current(key_len as i64))?;

        let mut value_len_buf = [0u8; 4];
        file.read_exact(&mut value_len_buf)?;
        let value_len = u32::from_le_bytes(value_len_buf) as usize;

        if deleted {
            trace!(path = %self.path.display(), "SSTable tombstone hit");
            return Ok(SSTableLookup::Tombstone);
        }

        let mut value = vec![0u8; value_len];
        file.read_exact(&mut value)?;
        trace!(path = %self.path.display(), "SSTable present hit");
        Ok(SSTableLookup::Present(value))
    }

    /// Decodes the entire data region in index order. Used by tests and by
    /// any future compaction path.
    pub fn read_all(&self) -> Result<Vec<(Box<[u8]>, SSTableLookup)>, SSTableError> {
        let mut file = File::open(&self.path)?;
        let mut out = Vec::with_capacity(self.index.len());

        for (key, offset) in &self.index {
            file.seek(SeekFrom::Start(*offset))?;
            let mut tombstone_buf = [0u8; 1];
            file.read_exact(&mut tombstone_buf)?;
            let deleted = tombstone_buf[0] != 0;

            let mut key_len_buf = [0u8; 4];
            file.read_exact(&mut key_len_buf)?;
            let key_len = u32::from_le_bytes(key_len_buf) as i64;
            file.seek(SeekFrom::Current(key_len))?;

            let mut value_len_buf = [0u8; 4];
            file.read_exact(&mut value_len_buf)?;
            let value_len = u32::from_le_bytes(value_len_buf) as usize;

            let result = if deleted {
                SSTableLookup::Tombstone
            } else {
                let mut value = vec![0u8; value_len];
                file.read_exact(&mut value)?;
                SSTableLookup::Present(value)
            };

            out.push((key.clone(), result));
        }

        Ok(out)
    }
}

fn corrupt(path: &Path, source: io::Error) -> SSTableError {
    warn!(path = %path.display(), %source, "SSTable index decode failed");
    SSTableError::Corrupt {
        path: path.to_path_buf(),
        reason: source.to_string(),
    }
}
