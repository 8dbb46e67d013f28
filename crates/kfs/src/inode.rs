//! Inode: filesystem-backend-agnostic file/directory metadata plus the
//! operation vtables backends implement.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use talon_core::error::{KError, Result};
use talon_core::sync::SpinLock;

use crate::dentry::Dentry;
use crate::page_cache::Mapping;
use crate::superblock::Superblock;

/// What kind of object an inode represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    /// A regular file.
    Regular,
    /// A directory.
    Directory,
    /// A character or block device node.
    Device,
    /// A named pipe (FIFO).
    Fifo,
    /// A symbolic link.
    Symlink,
}

/// Owner/permission/size bookkeeping mutated under the inode's lock.
#[derive(Debug, Clone, Copy)]
pub struct InodeMetadata {
    /// File type and permission bits.
    pub mode: u32,
    /// File size in bytes.
    pub size: u64,
    /// Hard link count.
    pub nlink: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Last access time, in nanoseconds since boot.
    pub atime: u64,
    /// Last modification time, in nanoseconds since boot.
    pub mtime: u64,
    /// Backend-preferred I/O block size.
    pub block_size: u32,
}

/// A single directory entry returned by [`InodeOps::readdir`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Entry name.
    pub name: alloc::string::String,
    /// The entry's inode type.
    pub inode_type: InodeType,
}

/// Backend-specific inode behavior: the "inode op vtable" and
/// "file op vtable" of spec §3, merged into one trait object per
/// concrete backend (ramfs, FAT32, ...).
pub trait InodeOps: Send + Sync {
    /// Looks up `name` as an immediate child of this (directory) inode.
    fn lookup(&self, name: &str) -> Result<Arc<Inode>>;

    /// Creates a new regular file named `name` under this directory.
    fn create(&self, _name: &str, _mode: u32) -> Result<Arc<Inode>> {
        Err(KError::NoSys)
    }

    /// Creates a new subdirectory named `name` under this directory.
    fn mkdir(&self, _name: &str, _mode: u32) -> Result<Arc<Inode>> {
        Err(KError::NoSys)
    }

    /// Creates a device/FIFO special file named `name`.
    fn mknod(&self, _name: &str, _mode: u32, _inode_type: InodeType) -> Result<Arc<Inode>> {
        Err(KError::NoSys)
    }

    /// Removes the non-directory entry `name`.
    fn unlink(&self, _name: &str) -> Result<()> {
        Err(KError::NoSys)
    }

    /// Removes the empty directory entry `name`.
    fn rmdir(&self, _name: &str) -> Result<()> {
        Err(KError::NoSys)
    }

    /// Renames `old_name` to `new_name`, both within this directory.
    fn rename(&self, _old_name: &str, _new_name: &str) -> Result<()> {
        Err(KError::NoSys)
    }

    /// Reads bytes starting at `offset` into `buf`, returning the count
    /// actually read (0 at or past end of file).
    fn read_at(&self, _offset: u64, _buf: &mut [u8]) -> Result<usize> {
        Err(KError::NoSys)
    }

    /// Writes bytes from `buf` starting at `offset`, extending the file
    /// if needed, and returns the count written.
    fn write_at(&self, _offset: u64, _buf: &[u8]) -> Result<usize> {
        Err(KError::NoSys)
    }

    /// Returns the directory entry at zero-indexed position `index`, or
    /// `None` past the last entry. Backends that want synthetic `.`/`..`
    /// entries return them at positions 0 and 1.
    fn readdir(&self, _index: usize) -> Result<Option<DirEntry>> {
        Err(KError::NotDir)
    }
}

/// A filesystem inode: shared metadata plus a reference to its
/// backend's operation vtable.
pub struct Inode {
    meta: SpinLock<InodeMetadata>,
    ops: Arc<dyn InodeOps>,
    inode_type: InodeType,
    superblock: Weak<Superblock>,
    /// Page cache mapping, present only for regular files.
    pub mapping: Option<Arc<Mapping>>,
    /// Dentries aliasing this inode (spec invariant: a positive dentry's
    /// inode's alias list contains it).
    aliases: SpinLock<Vec<Weak<Dentry>>>,
    refcount: AtomicU64,
    ino: u64,
}

static NEXT_INO: AtomicU64 = AtomicU64::new(1);
/// Monotonic id source for dynamically-created inode numbers.
pub(crate) fn alloc_ino() -> u64 {
    NEXT_INO.fetch_add(1, Ordering::Relaxed)
}

static _UNUSED_COUNTER: AtomicU32 = AtomicU32::new(0);

impl Inode {
    /// Creates a new inode with the given backend ops and metadata.
    pub fn new(
        ino: u64,
        inode_type: InodeType,
        meta: InodeMetadata,
        ops: Arc<dyn InodeOps>,
        superblock: Weak<Superblock>,
        mapping: Option<Arc<Mapping>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            meta: SpinLock::new(meta),
            ops,
            inode_type,
            superblock,
            mapping,
            aliases: SpinLock::new(Vec::new()),
            refcount: AtomicU64::new(0),
            ino,
        })
    }

    /// This inode's number, unique within its superblock.
    pub const fn ino(&self) -> u64 {
        self.ino
    }

    /// The inode's type (directory/regular/device/...).
    pub const fn inode_type(&self) -> InodeType {
        self.inode_type
    }

    /// The backend operation vtable for this inode.
    pub fn ops(&self) -> &Arc<dyn InodeOps> {
        &self.ops
    }

    /// Snapshot of the inode's metadata.
    pub fn metadata(&self) -> InodeMetadata {
        *self.meta.lock()
    }

    /// Runs `f` with a mutable reference to the inode's metadata.
    pub fn with_metadata_mut<R>(&self, f: impl FnOnce(&mut InodeMetadata) -> R) -> R {
        f(&mut self.meta.lock())
    }

    /// The superblock owning this inode.
    pub fn superblock(&self) -> Option<Arc<Superblock>> {
        self.superblock.upgrade()
    }

    /// Registers `dentry` as an alias of this inode.
    pub fn add_alias(&self, dentry: &Arc<Dentry>) {
        self.aliases.lock().push(Arc::downgrade(dentry));
    }

    /// Removes `dentry` from this inode's alias list, if present.
    pub fn remove_alias(&self, dentry: &Arc<Dentry>) {
        let target = Arc::as_ptr(dentry);
        self.aliases
            .lock()
            .retain(|w| w.upgrade().is_none_or(|d| Arc::as_ptr(&d) != target));
    }

    /// Number of live dentry aliases.
    pub fn alias_count(&self) -> usize {
        self.aliases
            .lock()
            .iter()
            .filter(|w| w.upgrade().is_some())
            .count()
    }

    /// Increments the in-flight lookup/alias reference count.
    pub fn get(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the reference count, returning the value after the
    /// decrement.
    pub fn put(&self) -> u64 {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dentry::Dentry;

    struct NullOps;
    impl InodeOps for NullOps {
        fn lookup(&self, _name: &str) -> Result<Arc<Inode>> {
            Err(KError::NoEnt)
        }
    }

    fn meta() -> InodeMetadata {
        InodeMetadata {
            mode: 0o755,
            size: 0,
            nlink: 1,
            uid: 0,
            gid: 0,
            atime: 0,
            mtime: 0,
            block_size: 4096,
        }
    }

    #[test]
    fn alias_list_tracks_dentries() {
        let inode = Inode::new(
            1,
            InodeType::Directory,
            meta(),
            Arc::new(NullOps),
            Weak::new(),
            None,
        );
        let dentry = Dentry::new_root("root".into());
        inode.add_alias(&dentry);
        assert_eq!(inode.alias_count(), 1);
        inode.remove_alias(&dentry);
        assert_eq!(inode.alias_count(), 0);
    }

    #[test]
    fn refcount_tracks_get_put() {
        let inode = Inode::new(
            2,
            InodeType::Regular,
            meta(),
            Arc::new(NullOps),
            Weak::new(),
            None,
        );
        inode.get();
        inode.get();
        assert_eq!(inode.put(), 1);
    }
}
