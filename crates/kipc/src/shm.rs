//! Shared memory segments (spec §4.I).
//!
//! No per-process virtual-address mapping is modeled here: `shmat`
//! hands back the kernel-side pointer directly, and callers (or the
//! page-fault path, for a real mapping into user space) are trusted to
//! serialize their own access to the shared bytes.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use talon_core::error::{KError, Result};
use talon_core::sync::SpinLock;

/// One shared segment: a fixed-size byte buffer plus an attach count.
pub struct SharedSegment {
    size: usize,
    storage: SpinLock<Vec<u8>>,
    attach_count: AtomicU32,
}

impl SharedSegment {
    fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            storage: SpinLock::new(alloc::vec![0u8; size]),
            attach_count: AtomicU32::new(0),
        })
    }

    /// The segment's fixed size, in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of outstanding `shmat` attachments.
    pub fn attach_count(&self) -> u32 {
        self.attach_count.load(Ordering::Relaxed)
    }

    /// `shmat`: bumps the attach count and returns a pointer to the
    /// segment's backing storage. The buffer never reallocates after
    /// creation, so the pointer stays valid for the segment's lifetime.
    pub fn attach(&self) -> *mut u8 {
        self.attach_count.fetch_add(1, Ordering::Relaxed);
        self.storage.lock().as_mut_ptr()
    }

    /// `shmdt`: decrements the attach count.
    pub fn detach(&self) {
        self.attach_count.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The key→id and id→segment namespaces `shmget`/`shmat`/`shmdt` index
/// into.
pub struct SharedMemoryTable {
    by_key: SpinLock<BTreeMap<i64, i32>>,
    by_id: SpinLock<BTreeMap<i32, Arc<SharedSegment>>>,
    next_id: AtomicI32,
}

impl SharedMemoryTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            by_key: SpinLock::new(BTreeMap::new()),
            by_id: SpinLock::new(BTreeMap::new()),
            next_id: AtomicI32::new(1),
        }
    }

    /// `shmget(key, size)`: returns the existing segment id for `key`,
    /// or creates a new `size`-byte segment and registers it.
    pub fn shmget(&self, key: i64, size: usize) -> i32 {
        if let Some(&id) = self.by_key.lock().get(&key) {
            return id;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.by_id.lock().insert(id, SharedSegment::new(size));
        self.by_key.lock().insert(key, id);
        id
    }

    /// Looks up a live segment by id.
    pub fn segment(&self, id: i32) -> Result<Arc<SharedSegment>> {
        self.by_id.lock().get(&id).cloned().ok_or(KError::NoEnt)
    }
}

impl Default for SharedMemoryTable {
    fn default() -> Self {
        Self::new()
    }
}
