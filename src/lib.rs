//! # stratakv
//!
//! An embeddable, single-process, single-writer key-value store built on a
//! **Log-Structured Merge Tree (LSM-tree)** architecture.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                    Engine                    │
//! │  ┌────────────┐        ┌──────────────────┐ │
//! │  │  Memtable   │  get   │   SSTable stack   │ │
//! │  │ (skip list) │◄───────┤  (newest→oldest)  │ │
//! │  │   + WAL     │        └──────────────────┘ │
//! │  └─────┬──────┘                flush          │
//! │        │  threshold reached ──────────►        │
//! └────────┴──────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Top-level coordinator — open, put, remove, get, flush, stats |
//! | [`memtable`] | In-memory write buffer wrapping the ordered index |
//! | [`skiplist`] | Lock-free-read ordered index backing the memtable |
//! | [`wal`] | Append-only write-ahead log for crash recovery |
//! | [`sstable`] | Immutable, sorted, on-disk tables with an offset index |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is persisted to the WAL,
//!   fsynced, and only then applied to the memtable.
//! - **Tombstone authority** — a `remove` is visible immediately and takes
//!   precedence over any older SSTable entry, even across a flush.
//! - **Crash-consistent recovery** — `open` replays the WAL and reopens the
//!   on-disk SSTable stack in creation order.
//!
//! ## Non-goals
//!
//! Background compaction, bloom filters, block caches, snapshots/iterators,
//! multi-writer concurrency, and manifests/MVCC are out of scope for this
//! revision: there is exactly one writer, and SSTables are produced only by
//! memtable flush, never merged.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stratakv::engine::{Engine, EngineConfig};
//!
//! let engine = Engine::open("/tmp/my_db", EngineConfig::default()).unwrap();
//!
//! engine.put(b"hello", b"world".to_vec()).unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! engine.remove(b"hello").unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), None);
//! ```

#![allow(dead_code)]

pub mod engine;
pub mod memtable;
pub mod skiplist;
pub mod sstable;
pub mod wal;
