//! # Ordered Index (concurrent skip list)
//!
//! The in-memory ordered index backing the [`crate::memtable`]. A probabilistic
//! multi-level linked structure: `MAX_HEIGHT` levels, each node promoted to a
//! higher level with probability [`PROBABILITY`].
//!
//! ## Concurrency model
//!
//! Single writer, many concurrent readers. Forward pointers are
//! [`AtomicPtr`] published with `Release` and traversed with `Acquire`, so a
//! reader that observes a node also observes everything the writer did before
//! linking it in. Nodes are never unlinked — `remove` tombstones in place —
//! so a reader can safely hold a raw pointer for the duration of a lookup
//! without risking a use-after-free; the only bulk deallocation happens in
//! [`Drop`], by which point no reader can be active.
//!
//! Per-node values live behind a small [`RwLock`] rather than a second atomic
//! pointer: overwriting a key's value is not required to be lock-free, only
//! torn-read-free, and a per-node lock gives that for free without epoch
//! reclamation machinery.
//!
//! ## Failure
//!
//! Infallible except for the reserved empty key, which [`SkipList::insert_or_update`]
//! and [`SkipList::mark_deleted`] reject with [`SkipListError::EmptyKey`] — the
//! empty byte string is the head sentinel's own key representation and must
//! never be linked in as a real node.


use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use rand::Rng;
use thiserror::Error;

/// Maximum number of levels a node may participate in.
pub const MAX_HEIGHT: usize = 12;

/// Probability that a node is promoted to the next level (`p = 1/4`).
const PROBABILITY: f64 = 0.25;

/// Errors returned at the ordered index boundary.
#[derive(Debug, Error)]
pub enum SkipListError {
    /// The reserved empty-key sentinel was passed in by a caller. The empty
    /// byte string is reserved for the head sentinel's own key
    /// representation and must never be inserted as a real entry.
    #[error("key must not be empty")]
    EmptyKey,
}

/// Result of a point lookup against the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// The key is present with this value.
    Present(Vec<u8>),
    /// The key was explicitly deleted (a tombstone).
    Tombstone,
    /// The key has never been written to this index.
    NotFound,
}

/// Source of random per-node heights.
///
/// Pluggable so tests can inject a deterministic sequence instead of relying
/// on OS entropy, per the reproducibility requirement on the memtable's
/// height generator.
pub trait HeightGenerator: Send {
    /// Draw a height in `1..=max_height`.
    fn next_height(&mut self, max_height: usize) -> usize;
}

/// Default height generator: geometric distribution with `p = 1/4`,
/// seeded from OS entropy.
pub struct RandomHeightGenerator {
    rng: rand::rngs::StdRng,
}

impl RandomHeightGenerator {
    /// Seed from OS entropy.
    pub fn new() -> Self {
        use rand::SeedableRng;
        Self {
            rng: rand::rngs::StdRng::from_os_rng(),
        }
    }

    /// Seed deterministically, for reproducible tests.
    pub fn from_seed(seed: u64) -> Self {
        use rand::SeedableRng;
        Self {
            rng: rand::rngs::StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomHeightGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl HeightGenerator for RandomHeightGenerator {
    fn next_height(&mut self, max_height: usize) -> usize {
        let mut height = 1;
        while height < max_height && self.rng.random_bool(PROBABILITY) {
            height += 1;
        }
        height
    }
}

/// Mutable per-node payload, guarded by a lock so concurrent readers never
/// observe a torn value during an in-place overwrite.
struct Slot {
    value: Vec<u8>,
    deleted: bool,
}

struct Node {
    key: Box<[u8]>,
    slot: RwLock<Slot>,
    /// `forward[i]` is the next node at level `i`; always `height` long.
    forward: Vec<AtomicPtr<Node>>,
}

impl Node {
    fn new(key: Box<[u8]>, value: Vec<u8>, deleted: bool, height: usize) -> Box<Node> {
        let mut forward = Vec::with_capacity(height);
        forward.resize_with(height, || AtomicPtr::new(std::ptr::null_mut()));
        Box::new(Node {
            key,
            slot: RwLock::new(Slot { value, deleted }),
            forward,
        })
    }
}

/// The concurrent, single-writer ordered index.
pub struct SkipList {
    /// Sentinel head node; its key (empty) compares less than every real key.
    head: Box<Node>,
    max_height: AtomicUsize,
    height_gen: Mutex<Box<dyn HeightGenerator>>,
    /// Approximate count of live entries, maintained for diagnostics only.
    len: AtomicUsize,
}

// SAFETY: all cross-thread access goes through AtomicPtr (for links) and
// RwLock (for values); raw pointers are only ever dereferenced after being
// loaded from an AtomicPtr that was itself published with Release ordering.
unsafe impl Send for SkipList {}
unsafe impl Sync for SkipList {}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl SkipList {
    /// Creates an empty index with OS-entropy-seeded node heights.
    pub fn new() -> Self {
        Self::with_height_generator(Box::new(RandomHeightGenerator::new()))
    }

    /// Creates an empty index with a caller-supplied height generator.
    ///
    /// Used by tests that need deterministic node heights.
    pub fn with_height_generator(height_gen: Box<dyn HeightGenerator>) -> Self {
        Self {
            head: Node::new(Box::from(&b""[..]), Vec::new(), false, MAX_HEIGHT),
            max_height: AtomicUsize::new(1),
            height_gen: Mutex::new(height_gen),
            len: AtomicUsize::new(0),
        }
    }

    fn random_height(&self) -> usize {
        let mut gen = self.height_gen.lock().expect("height generator poisoned");
        gen.next_height(MAX_HEIGHT)
    }

    /// Walks the index top-down, filling `prev[level]` with the last node at
    /// `level` whose successor would not precede `key`. Returns the level-0
    /// successor of the walk (the node that equals `key`, if any).
    fn find_predecessors(&self, key: &[u8], prev: &mut [*mut Node; MAX_HEIGHT]) -> *mut Node {
        let mut current: *const Node = &*self.head;
        let top = self.max_height.load(Ordering::Acquire);

        for level in (0..top).rev() {
            loop {
                let next = unsafe { &*current }.forward[level].load(Ordering::Acquire);
                if next.is_null() {
                    break;
                }
                let next_key = unsafe { &(*next).key };
                if next_key.as_ref() < key {
                    current = next;
                } else {
                    break;
                }
            }
            prev[level] = current as *mut Node;
        }

        unsafe { &*current }.forward[0].load(Ordering::Acquire)
    }

    /// Point lookup. See module docs for the publication/acquire discipline.
    pub fn lookup(&self, key: &[u8]) -> LookupResult {
        let mut prev = [std::ptr::null_mut(); MAX_HEIGHT];
        let candidate = self.find_predecessors(key, &mut prev);

        if candidate.is_null() {
            return LookupResult::NotFound;
        }
        let node = unsafe { &*candidate };
        if node.key.as_ref() != key {
            return LookupResult::NotFound;
        }

        let slot = node.slot.read().expect("node slot poisoned");
        if slot.deleted {
            LookupResult::Tombstone
        } else {
            LookupResult::Present(slot.value.clone())
        }
    }

    /// Inserts a new key or overwrites an existing one's value in place.
    ///
    /// Rejects the empty key: it is reserved for the head sentinel and must
    /// not be exposed as a real entry.
    pub fn insert_or_update(&self, key: &[u8], value: Vec<u8>) -> Result<(), SkipListError> {
        if key.is_empty() {
            return Err(SkipListError::EmptyKey);
        }

        let mut prev = [std::ptr::null_mut(); MAX_HEIGHT];
        let candidate = self.find_predecessors(key, &mut prev);

        if !candidate.is_null() && unsafe { &*candidate }.key.as_ref() == key {
            let mut slot = unsafe { &*candidate }.slot.write().expect("node slot poisoned");
            slot.value = value;
            slot.deleted = false;
            return Ok(());
        }

        self.link_new_node(key, value, false, &mut prev);
        Ok(())
    }

    /// Writes a tombstone for `key`, inserting a new node if the key is not
    /// already present. This is the corrected behaviour mandated by the
    /// engine: a delete of a key absent from the memtable (but potentially
    /// present in an older SSTable) must not be silently dropped.
    ///
    /// Rejects the empty key, for the same reason as [`Self::insert_or_update`].
    pub fn mark_deleted(&self, key: &[u8]) -> Result<(), SkipListError> {
        if key.is_empty() {
            return Err(SkipListError::EmptyKey);
        }

        let mut prev = [std::ptr::null_mut(); MAX_HEIGHT];
        let candidate = self.find_predecessors(key, &mut prev);

        if !candidate.is_null() && unsafe { &*candidate }.key.as_ref() == key {
            let mut slot = unsafe { &*candidate }.slot.write().expect("node slot poisoned");
            slot.deleted = true;
            return Ok(());
        }

        self.link_new_node(key, Vec::new(), true, &mut prev);
        Ok(())
    }

    fn link_new_node(
        &self,
        key: &[u8],
        value: Vec<u8>,
        deleted: bool,
        prev: &mut [*mut Node; MAX_HEIGHT],
    ) {
        let height = self.random_height();
        let current_max = self.max_height.load(Ordering::Relaxed);

        if height > current_max {
            for level in current_max..height {
                prev[level] = &*self.head as *const Node as *mut Node;
            }
            self.max_height.store(height, Ordering::Release);
        }

        let node = Node::new(Box::from(key), value, deleted, height);
        let node_ptr = Box::into_raw(node);

        for level in 0..height {
            let predecessor = unsafe { &*prev[level] };
            let next = predecessor.forward[level].load(Ordering::Relaxed);
            unsafe { &*node_ptr }.forward[level].store(next, Ordering::Relaxed);
            predecessor.forward[level].store(node_ptr, Ordering::Release);
        }

        self.len.fetch_add(1, Ordering::Relaxed);
    }

    /// Approximate in-memory footprint of every node, including key/value
    /// bytes and per-level link overhead. O(n); acceptable because it is
    /// called far less often than `lookup`/`insert_or_update`.
    pub fn estimate_bytes(&self) -> usize {
        let mut total = std::mem::size_of::<Self>();
        let mut current = self.head.forward[0].load(Ordering::Acquire);

        while !current.is_null() {
            let node = unsafe { &*current };
            total += std::mem::size_of::<Node>();
            total += node.forward.len() * std::mem::size_of::<AtomicPtr<Node>>();
            total += node.key.len();
            total += node.slot.read().expect("node slot poisoned").value.capacity();
            current = node.forward[0].load(Ordering::Acquire);
        }

        total
    }

    /// Number of distinct keys ever inserted (including tombstoned ones).
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Whether the index has never had a key inserted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ordered snapshot of every entry, including tombstones, for the flush
    /// path. Does not mutate the index.
    pub fn iter_snapshot(&self) -> Vec<(Box<[u8]>, LookupResult)> {
        let mut out = Vec::with_capacity(self.len());
        let mut current = self.head.forward[0].load(Ordering::Acquire);

        while !current.is_null() {
            let node = unsafe { &*current };
            let slot = node.slot.read().expect("node slot poisoned");
            let result = if slot.deleted {
                LookupResult::Tombstone
            } else {
                LookupResult::Present(slot.value.clone())
            };
            out.push((node.key.clone(), result));
            current = node.forward[0].load(Ordering::Acquire);
        }

        out
    }
}

impl Drop for SkipList {
    fn drop(&mut self) {
        let mut current = self.head.forward[0].load(Ordering::Relaxed);
        while !current.is_null() {
            // SAFETY: no reader can be active once the index itself is being
            // dropped, and every non-head node was heap-allocated via
            // `Box::into_raw` in `link_new_node`.
            let node = unsafe { Box::from_raw(current) };
            current = node.forward[0].load(Ordering::Relaxed);
        }
    }
}
