//! Superblock: per-mounted-filesystem state and the filesystem-type
//! registry that creates superblocks on `mount` (spec §4.H.5, §4.H.6).

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use talon_core::error::{KError, Result};
use talon_core::sync::SpinLock;

use crate::buffer_cache::BlockDevice;
use crate::dentry::Dentry;
use crate::inode::Inode;

/// Backend-specific teardown invoked by `kill_sb`.
pub trait SuperblockOps: Send + Sync {
    /// Releases any backend-owned resources before the superblock is
    /// dropped.
    fn kill_sb(&self) {}
}

struct NullSuperblockOps;
impl SuperblockOps for NullSuperblockOps {}

/// A mounted filesystem instance.
pub struct Superblock {
    /// Backend-reported block size.
    pub block_size: u32,
    /// Backend magic number, for diagnostics.
    pub magic: u32,
    root: SpinLock<Option<Arc<Dentry>>>,
    ops: Arc<dyn SuperblockOps>,
    inodes: SpinLock<Vec<Arc<Inode>>>,
}

impl Superblock {
    /// Creates a superblock with no root dentry yet (set via
    /// [`set_root`](Self::set_root) once the backend has created it).
    pub fn new(block_size: u32, magic: u32, ops: Arc<dyn SuperblockOps>) -> Arc<Self> {
        Arc::new(Self {
            block_size,
            magic,
            root: SpinLock::new(None),
            ops,
            inodes: SpinLock::new(Vec::new()),
        })
    }

    /// Test/demo helper: a superblock with no real backend.
    #[doc(hidden)]
    pub fn new_for_test() -> Arc<Self> {
        Self::new(512, 0, Arc::new(NullSuperblockOps))
    }

    /// Sets this superblock's root dentry (one-time, by its backend's
    /// `mount`).
    pub fn set_root(&self, dentry: Arc<Dentry>) {
        *self.root.lock() = Some(dentry);
    }

    /// The root dentry of the mounted subtree.
    pub fn root(&self) -> Option<Arc<Dentry>> {
        self.root.lock().clone()
    }

    /// Registers an inode as owned by this superblock.
    pub fn track_inode(&self, inode: Arc<Inode>) {
        self.inodes.lock().push(inode);
    }

    /// Frees all superblock-owned resources.
    pub fn kill_sb(&self) {
        self.inodes.lock().clear();
        self.ops.kill_sb();
    }
}

/// A registered filesystem driver: given an optional backing device and
/// mount options, produces a fresh superblock.
pub trait FileSystemType: Send + Sync {
    /// The name used to select this type in `mount(fs_type, ...)`.
    fn name(&self) -> &str;
    /// Creates a superblock for a new mount.
    fn mount(&self, dev: Option<Arc<dyn BlockDevice>>, data: &str) -> Result<Arc<Superblock>>;
}

/// The global registry of filesystem types, consulted by `mount`.
pub struct FileSystemRegistry {
    types: SpinLock<Vec<(String, Arc<dyn FileSystemType>)>>,
}

impl FileSystemRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            types: SpinLock::new(Vec::new()),
        }
    }

    /// Registers a filesystem type under its own name.
    pub fn register(&self, fs_type: Arc<dyn FileSystemType>) {
        let name = String::from(fs_type.name());
        self.types.lock().push((name, fs_type));
    }

    /// Looks up a filesystem type by name.
    pub fn find(&self, name: &str) -> Option<Arc<dyn FileSystemType>> {
        self.types
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.clone())
    }

    /// Mounts `name`, delegating to its registered type.
    ///
    /// Fails with [`KError::NoEnt`] if `name` is not registered.
    pub fn mount(
        &self,
        name: &str,
        dev: Option<Arc<dyn BlockDevice>>,
        data: &str,
    ) -> Result<Arc<Superblock>> {
        let fs_type = self.find(name).ok_or(KError::NoEnt)?;
        fs_type.mount(dev, data)
    }
}

impl Default for FileSystemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeFs;
    impl FileSystemType for FakeFs {
        fn name(&self) -> &str {
            "fakefs"
        }
        fn mount(&self, _dev: Option<Arc<dyn BlockDevice>>, _data: &str) -> Result<Arc<Superblock>> {
            Ok(Superblock::new_for_test())
        }
    }

    #[test]
    fn mount_unknown_type_returns_noent() {
        let registry = FileSystemRegistry::new();
        assert_eq!(
            registry.mount("nope", None, ""),
            Err(KError::NoEnt)
        );
    }

    #[test]
    fn mount_registered_type_succeeds() {
        let registry = FileSystemRegistry::new();
        registry.register(Arc::new(FakeFs));
        assert!(registry.mount("fakefs", None, "").is_ok());
    }
}
