//! Dentry cache (dcache): a hash table of directory-entry names keyed by
//! `(parent, name)`, matching the Linux-style path-walking design named
//! in spec §4.H.1.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use talon_core::sync::SpinLock;

use crate::inode::Inode;

/// Number of hash buckets in the global dcache.
pub const DENTRY_HASH_SIZE: usize = 1024;

struct DentryInner {
    inode: Option<Arc<Inode>>,
    subdirs: Vec<Arc<Dentry>>,
    count: u64,
}

/// A single cached directory entry: a name plus (optionally) the inode
/// it resolves to. A `None` inode is a "negative dentry" recording a
/// failed lookup.
pub struct Dentry {
    name: String,
    parent: Option<Weak<Dentry>>,
    inner: SpinLock<DentryInner>,
}

impl Dentry {
    /// Creates the filesystem root dentry (no parent, no inode yet).
    pub fn new_root(name: String) -> Arc<Self> {
        Arc::new(Self {
            name,
            parent: None,
            inner: SpinLock::new(DentryInner {
                inode: None,
                subdirs: Vec::new(),
                count: 1,
            }),
        })
    }

    /// Allocates a dentry under `parent`, inheriting its superblock by
    /// construction (callers pass the superblock to [`Inode::new`]
    /// separately; the dcache itself is backend-agnostic) and linking it
    /// into the parent's subdirectory list.
    pub fn alloc(parent: &Arc<Dentry>, name: String) -> Arc<Self> {
        let child = Arc::new(Self {
            name,
            parent: Some(Arc::downgrade(parent)),
            inner: SpinLock::new(DentryInner {
                inode: None,
                subdirs: Vec::new(),
                count: 1,
            }),
        });
        parent.inner.lock().subdirs.push(child.clone());
        child
    }

    /// This dentry's name component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parent dentry, or `None` at the root.
    pub fn parent(&self) -> Option<Arc<Dentry>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// The inode this dentry currently resolves to, if positive.
    pub fn inode(&self) -> Option<Arc<Inode>> {
        self.inner.lock().inode.clone()
    }

    /// Links `inode` into this dentry (making it positive) and registers
    /// this dentry as one of the inode's aliases.
    pub fn instantiate(self: &Arc<Self>, inode: Arc<Inode>) {
        inode.add_alias(self);
        self.inner.lock().inode = Some(inode);
    }

    /// Increments the dentry's reference count.
    pub fn get(&self) {
        self.inner.lock().count += 1;
    }

    /// Current reference count.
    pub fn count(&self) -> u64 {
        self.inner.lock().count
    }

    /// Direct children currently cached under this dentry.
    pub fn subdirs(&self) -> Vec<Arc<Dentry>> {
        self.inner.lock().subdirs.clone()
    }

    /// Removes `child` from this dentry's subdirectory list (used when a
    /// negative dentry is pruned or an entry is unlinked/renamed away).
    pub fn remove_child(&self, child: &Arc<Dentry>) {
        let target = Arc::as_ptr(child);
        self.inner
            .lock()
            .subdirs
            .retain(|d| Arc::as_ptr(d) != target);
    }
}

fn hash_bucket(parent: &Arc<Dentry>, name: &str) -> usize {
    let mut h: u64 = 1469598103934665603; // FNV-1a offset basis
    let parent_ptr = Arc::as_ptr(parent) as usize as u64;
    for byte in parent_ptr.to_le_bytes() {
        h ^= byte as u64;
        h = h.wrapping_mul(1099511628211);
    }
    for byte in name.bytes() {
        h ^= byte as u64;
        h = h.wrapping_mul(1099511628211);
    }
    (h as usize) % DENTRY_HASH_SIZE
}

/// The global dentry cache: a hash table of `(parent, name) -> dentry`.
pub struct DentryCache {
    buckets: Vec<SpinLock<Vec<Arc<Dentry>>>>,
}

impl DentryCache {
    /// Creates an empty dcache with [`DENTRY_HASH_SIZE`] buckets.
    pub fn new() -> Self {
        let mut buckets = Vec::with_capacity(DENTRY_HASH_SIZE);
        for _ in 0..DENTRY_HASH_SIZE {
            buckets.push(SpinLock::new(Vec::new()));
        }
        Self { buckets }
    }

    /// Allocates a dentry under `parent` and inserts it into the cache.
    pub fn alloc_dentry(&self, parent: &Arc<Dentry>, name: &str) -> Arc<Dentry> {
        let dentry = Dentry::alloc(parent, String::from(name));
        let bucket = hash_bucket(parent, name);
        self.buckets[bucket].lock().push(dentry.clone());
        dentry
    }

    /// Links `inode` to `dentry` and ensures it is present in the
    /// correct hash bucket (idempotent if already inserted by
    /// [`alloc_dentry`](Self::alloc_dentry)).
    pub fn d_add(&self, dentry: &Arc<Dentry>, inode: Arc<Inode>) {
        dentry.instantiate(inode);
        if let Some(parent) = dentry.parent() {
            let bucket = hash_bucket(&parent, dentry.name());
            let mut slot = self.buckets[bucket].lock();
            if !slot.iter().any(|d| Arc::ptr_eq(d, dentry)) {
                slot.push(dentry.clone());
            }
        }
    }

    /// Searches the bucket for `(parent, name)`, incrementing the
    /// dentry's reference count on a hit.
    pub fn d_lookup(&self, parent: &Arc<Dentry>, name: &str) -> Option<Arc<Dentry>> {
        let bucket = hash_bucket(parent, name);
        let slot = self.buckets[bucket].lock();
        let found = slot
            .iter()
            .find(|d| {
                d.name() == name
                    && d.parent()
                        .is_some_and(|p| Arc::ptr_eq(&p, parent))
            })
            .cloned();
        if let Some(d) = &found {
            d.get();
        }
        found
    }
}

impl Default for DentryCache {
    fn default() -> Self {
        Self::new()
    }
}
