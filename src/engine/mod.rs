//! # LSM Storage Engine
//!
//! The top-level coordinator: opens a database directory, recovers the
//! memtable from the write-ahead log, and routes reads and writes across
//! the memtable and the on-disk SSTable stack.
//!
//! ## Design Overview
//!
//! The engine holds exactly one active memtable, one WAL, and a list of
//! SSTables in creation order (oldest first). A write goes:
//!
//! `append to WAL → sync WAL → apply to memtable → maybe flush`
//!
//! A read consults the memtable first; on a miss it walks the SSTable list
//! **newest to oldest**, returning the first hit or tombstone encountered.
//!
//! ## Concurrency Model
//!
//! All mutable engine state is protected by a single `RwLock<EngineState>`.
//! Writers take the write lock for the duration of a mutation; readers take
//! a read lock only long enough to clone the `Arc`s they need, then query
//! outside the lock — this keeps the memtable-swap-plus-sstable-append step
//! of a flush atomic relative to readers (§5 of the design this follows).
//! Flushes are additionally serialised by a dedicated mutex so at most one
//! flush is in flight.
//!
//! ## Non-goals
//!
//! Background compaction, bloom filters, block caches, snapshots/iterators,
//! multi-writer concurrency, and manifests/MVCC are out of scope: there is
//! exactly one writer, and SSTables are produced only by memtable flush,
//! never merged.


use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;
use tracing::{info, trace, warn};

use crate::memtable::{Memtable, MemtableError, MemtableGetResult};
use crate::sstable::{self, SSTable, SSTableEntry, SSTableError, SSTableLookup};
use crate::wal::{Wal, WalError, WalRecord, WalSyncPolicy};

/// Default memtable flush threshold: 64 MiB of estimated memory usage.
pub const DEFAULT_FLUSH_THRESHOLD_BYTES: usize = 64 * 1024 * 1024;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the memtable subsystem.
    #[error("memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Error originating from the WAL subsystem.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Error originating from the SSTable subsystem.
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation (poisoned lock, unparsable SSTable filename, etc).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Configuration for an [`Engine`] instance, passed to [`Engine::open`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Estimated-memory-usage threshold, in bytes, at which a `put`/`remove`
    /// triggers a flush.
    pub flush_threshold_bytes: usize,

    /// WAL fsync policy: `Full` (the default, strongest) or `DataOnly`.
    pub wal_sync_policy: WalSyncPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_threshold_bytes: DEFAULT_FLUSH_THRESHOLD_BYTES,
            wal_sync_policy: WalSyncPolicy::Full,
        }
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Current memtable size, in estimated bytes.
    pub memtable_size_bytes: usize,
    /// Number of SSTables on disk.
    pub sstables_count: usize,
    /// Sum of all SSTable file sizes, in bytes.
    pub total_sstable_bytes: u64,
}

struct EngineState {
    memtable: Memtable,
    wal: Wal,
    /// Oldest first, newest last.
    sstables: Vec<Arc<SSTable>>,
}

/// An open, embeddable key-value store rooted at a single directory.
pub struct Engine {
    dir: PathBuf,
    config: EngineConfig,
    state: RwLock<EngineState>,
    next_sstable_id: AtomicU64,
    flush_lock: Mutex<()>,
}

impl Engine {
    /// Opens (creating if absent) the database rooted at `path`.
    ///
    /// Recovery order: create the directory if absent, open the WAL,
    /// replay it into a fresh memtable, then enumerate `*.sst` files,
    /// sorted by the numeric ID embedded in their filename.
    pub fn open<P: AsRef<Path>>(path: P, config: EngineConfig) -> Result<Self, EngineError> {
        let dir = path.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut wal = Wal::open(dir.join("wal.log"), config.wal_sync_policy)?;
        let memtable = Memtable::new();

        for record in wal.replay()? {
            match record {
                WalRecord::Put { key, value } => memtable.put(&key, value)?,
                WalRecord::Delete { key } => memtable.remove(&key)?,
            }
        }

        let mut sstable_ids = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(id) = parse_sstable_id(&file_name) else {
                continue;
            };
            sstable_ids.push(id);
        }
        sstable_ids.sort_unstable();

        let mut sstables = Vec::with_capacity(sstable_ids.len());
        for id in &sstable_ids {
            let table_path = dir.join(sstable_filename(*id));
            sstables.push(Arc::new(SSTable::open(&table_path)?));
        }

        let next_sstable_id = sstable_ids.last().map(|id| id + 1).unwrap_or(1);

        info!(
            dir = %dir.display(),
            sstables = sstables.len(),
            next_sstable_id,
            "engine opened"
        );

        Ok(Self {
            dir,
            config,
            state: RwLock::new(EngineState {
                memtable,
                wal,
                sstables,
            }),
            next_sstable_id: AtomicU64::new(next_sstable_id),
            flush_lock: Mutex::new(()),
        })
    }

    /// Durably inserts or updates `key` to `value`.
    pub fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), EngineError> {
        self.write(key, Some(value))
    }

    /// Durably writes a tombstone for `key`, even if `key` is not known to
    /// exist in the memtable — it may be present in an older SSTable.
    pub fn remove(&self, key: &[u8]) -> Result<(), EngineError> {
        self.write(key, None)
    }

    fn write(&self, key: &[u8], value: Option<Vec<u8>>) -> Result<(), EngineError> {
        if key.is_empty() {
            return Err(EngineError::Memtable(MemtableError::EmptyKey));
        }

        let should_flush = {
            let mut guard = self.state.write().map_err(|_| poisoned())?;

            match &value {
                Some(v) => guard.wal.append_put(key, v)?,
                None => guard.wal.append_delete(key)?,
            }
            guard.wal.sync()?;

            match &value {
                Some(v) => guard.memtable.put(key, v.clone())?,
                None => guard.memtable.remove(key)?,
            }

            trace!(key_len = key.len(), is_delete = value.is_none(), "engine write");
            guard.memtable.should_flush(self.config.flush_threshold_bytes)
        };

        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Looks up the freshest visible value for `key`.
    ///
    /// Consults the memtable first; a tombstone there short-circuits the
    /// search. On a memtable miss, iterates SSTables newest to oldest,
    /// returning the first `Present` or `Tombstone` encountered.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let (memtable_result, sstables) = {
            let guard = self.state.read().map_err(|_| poisoned())?;
            (guard.memtable.get(key), guard.sstables.clone())
        };

        match memtable_result {
            MemtableGetResult::Present(v) => return Ok(Some(v)),
            MemtableGetResult::Tombstone => return Ok(None),
            MemtableGetResult::NotFound => {}
        }

        for table in sstables.iter().rev() {
            match table.get(key)? {
                SSTableLookup::Present(v) => return Ok(Some(v)),
                SSTableLookup::Tombstone => return Ok(None),
                SSTableLookup::NotFound => continue,
            }
        }

        Ok(None)
    }

    /// Forces the flush path outside of the size-threshold trigger.
    ///
    /// Serialised by a dedicated mutex so at most one flush is in flight.
    /// If the memtable is empty, this is a no-op.
    pub fn flush(&self) -> Result<(), EngineError> {
        let _flush_guard = self.flush_lock.lock().map_err(|_| poisoned())?;

        let snapshot = {
            let guard = self.state.read().map_err(|_| poisoned())?;
            if guard.memtable.is_empty() {
                return Ok(());
            }
            guard.memtable.iter_for_flush()
        };

        let entries: Vec<SSTableEntry> = snapshot
            .into_iter()
            .map(|(key, result)| {
                let (value, deleted) = match result {
                    MemtableGetResult::Present(v) => (v, false),
                    MemtableGetResult::Tombstone => (Vec::new(), true),
                    MemtableGetResult::NotFound => unreachable!("snapshot entries are never absent"),
                };
                SSTableEntry { key, value, deleted }
            })
            .collect();

        let id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let table_path = self.dir.join(sstable_filename(id));
        if table_path.exists() {
            debug_assert!(false, "SSTable id collision at {}", table_path.display());
            warn!(path = %table_path.display(), "SSTable id collision detected, refusing to overwrite");
            return Err(EngineError::Internal(format!(
                "SSTable id collision at {}",
                table_path.display()
            )));
        }
        sstable::create(&table_path, entries)?;
        let table = Arc::new(SSTable::open(&table_path)?);

        {
            let mut guard = self.state.write().map_err(|_| poisoned())?;
            guard.sstables.push(table);
            guard.memtable = Memtable::new();
            guard.wal.truncate()?;
        }

        info!(sstable_id = id, "memtable flushed");
        Ok(())
    }

    /// Read-only diagnostic snapshot; does not affect on-disk format.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let guard = self.state.read().map_err(|_| poisoned())?;

        let mut total_sstable_bytes = 0u64;
        for table in &guard.sstables {
            match fs::metadata(table.path()) {
                Ok(meta) => total_sstable_bytes += meta.len(),
                Err(e) => warn!(path = %table.path().display(), %e, "failed to stat SSTable"),
            }
        }

        Ok(EngineStats {
            memtable_size_bytes: guard.memtable.size_bytes(),
            sstables_count: guard.sstables.len(),
            total_sstable_bytes,
        })
    }
}

fn poisoned() -> EngineError {
    EngineError::Internal("engine state lock poisoned".to_string())
}

fn sstable_filename(id: u64) -> String {
    format!("sstable_{id}.sst")
}

/// Parses the numeric ID out of a `sstable_<N>.sst` filename. Files with
/// any other name are ignored, per the on-disk layout contract.
fn parse_sstable_id(file_name: &std::ffi::OsStr) -> Option<u64> {
    let name = file_name.to_str()?;
    let stem = name.strip_prefix("sstable_")?.strip_suffix(".sst")?;
    if stem.is_empty() || stem == "0" || (stem.len() > 1 && stem.starts_with('0')) {
        return None;
    }
    stem.parse().ok()
}
