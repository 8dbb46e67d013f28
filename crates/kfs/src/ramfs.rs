//! In-memory filesystem backend (spec §4.H.8): directory contents live
//! in the dentry's own subdir list; regular files carry a heap-grown
//! byte buffer whose capacity doubles, in 4 KiB quanta, to cover each
//! write.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use talon_core::error::{KError, Result};
use talon_core::sync::SpinLock;

use crate::dentry::Dentry;
use crate::inode::{alloc_ino, DirEntry, Inode, InodeMetadata, InodeOps, InodeType};
use crate::superblock::{FileSystemType, Superblock, SuperblockOps};

const GROWTH_QUANTUM: usize = 4096;

fn empty_meta(mode: u32) -> InodeMetadata {
    InodeMetadata {
        mode,
        size: 0,
        nlink: 1,
        uid: 0,
        gid: 0,
        atime: 0,
        mtime: 0,
        block_size: GROWTH_QUANTUM as u32,
    }
}

/// `InodeOps` for a ramfs directory: lookups and mutations operate
/// directly on the bound dentry's subdir list, so there is no separate
/// directory-contents structure to keep in sync.
struct RamDirOps {
    self_dentry: SpinLock<Weak<Dentry>>,
}

impl RamDirOps {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            self_dentry: SpinLock::new(Weak::new()),
        })
    }

    fn bind(&self, dentry: &Arc<Dentry>) {
        *self.self_dentry.lock() = Arc::downgrade(dentry);
    }

    fn dentry(&self) -> Result<Arc<Dentry>> {
        self.self_dentry.lock().upgrade().ok_or(KError::NoEnt)
    }

    fn find_child(&self, name: &str) -> Result<Arc<Dentry>> {
        self.dentry()?
            .subdirs()
            .into_iter()
            .find(|d| d.name() == name)
            .ok_or(KError::NoEnt)
    }
}

impl InodeOps for RamDirOps {
    fn lookup(&self, name: &str) -> Result<Arc<Inode>> {
        self.find_child(name)?.inode().ok_or(KError::NoEnt)
    }

    fn create(&self, name: &str, mode: u32) -> Result<Arc<Inode>> {
        let parent = self.dentry()?;
        if self.find_child(name).is_ok() {
            return Err(KError::Exists);
        }
        let ops = RamFileOps::new();
        let inode = Inode::new(
            alloc_ino(),
            InodeType::Regular,
            empty_meta(mode),
            ops.clone(),
            Weak::new(),
            None,
        );
        ops.bind(&inode);
        let child = Dentry::alloc(&parent, String::from(name));
        child.instantiate(inode.clone());
        Ok(inode)
    }

    fn mkdir(&self, name: &str, mode: u32) -> Result<Arc<Inode>> {
        let parent = self.dentry()?;
        if self.find_child(name).is_ok() {
            return Err(KError::Exists);
        }
        let ops = RamDirOps::new();
        let inode = Inode::new(
            alloc_ino(),
            InodeType::Directory,
            empty_meta(mode | 0o040000),
            ops.clone(),
            Weak::new(),
            None,
        );
        let child = Dentry::alloc(&parent, String::from(name));
        ops.bind(&child);
        child.instantiate(inode.clone());
        Ok(inode)
    }

    fn mknod(&self, name: &str, mode: u32, inode_type: InodeType) -> Result<Arc<Inode>> {
        let parent = self.dentry()?;
        if self.find_child(name).is_ok() {
            return Err(KError::Exists);
        }
        let inode = Inode::new(
            alloc_ino(),
            inode_type,
            empty_meta(mode),
            Arc::new(DeadEndOps),
            Weak::new(),
            None,
        );
        let child = Dentry::alloc(&parent, String::from(name));
        child.instantiate(inode.clone());
        Ok(inode)
    }

    fn unlink(&self, name: &str) -> Result<()> {
        let parent = self.dentry()?;
        let child = self.find_child(name)?;
        if child.inode().is_some_and(|i| i.inode_type() == InodeType::Directory) {
            return Err(KError::IsDir);
        }
        parent.remove_child(&child);
        Ok(())
    }

    fn rmdir(&self, name: &str) -> Result<()> {
        let parent = self.dentry()?;
        let child = self.find_child(name)?;
        if !child.inode().is_some_and(|i| i.inode_type() == InodeType::Directory) {
            return Err(KError::NotDir);
        }
        if !child.subdirs().is_empty() {
            return Err(KError::Inval);
        }
        parent.remove_child(&child);
        Ok(())
    }

    fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let parent = self.dentry()?;
        if self.find_child(new_name).is_ok() {
            return Err(KError::Exists);
        }
        let old = self.find_child(old_name)?;
        let renamed = Dentry::alloc(&parent, String::from(new_name));
        if let Some(inode) = old.inode() {
            renamed.instantiate(inode.clone());
            inode.remove_alias(&old);
        }
        parent.remove_child(&old);
        Ok(())
    }

    fn readdir(&self, index: usize) -> Result<Option<DirEntry>> {
        if index == 0 {
            return Ok(Some(DirEntry {
                name: String::from("."),
                inode_type: InodeType::Directory,
            }));
        }
        if index == 1 {
            return Ok(Some(DirEntry {
                name: String::from(".."),
                inode_type: InodeType::Directory,
            }));
        }
        let children = self.dentry()?.subdirs();
        match children.get(index - 2) {
            Some(child) => Ok(Some(DirEntry {
                name: String::from(child.name()),
                inode_type: child
                    .inode()
                    .map(|i| i.inode_type())
                    .unwrap_or(InodeType::Regular),
            })),
            None => Ok(None),
        }
    }
}

struct DeadEndOps;
impl InodeOps for DeadEndOps {
    fn lookup(&self, _name: &str) -> Result<Arc<Inode>> {
        Err(KError::NotDir)
    }
}

/// `InodeOps` for a ramfs regular file: a plain byte buffer, grown in
/// 4 KiB quanta.
struct RamFileOps {
    data: SpinLock<Vec<u8>>,
    self_inode: SpinLock<Weak<Inode>>,
}

impl RamFileOps {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            data: SpinLock::new(Vec::new()),
            self_inode: SpinLock::new(Weak::new()),
        })
    }

    fn bind(&self, inode: &Arc<Inode>) {
        *self.self_inode.lock() = Arc::downgrade(inode);
    }
}

impl InodeOps for RamFileOps {
    fn lookup(&self, _name: &str) -> Result<Arc<Inode>> {
        Err(KError::NotDir)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.data.lock();
        let start = offset as usize;
        if start >= data.len() {
            return Ok(0);
        }
        let n = core::cmp::min(buf.len(), data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let mut data = self.data.lock();
        let end = offset as usize + buf.len();
        if data.capacity() < end {
            let mut target = data.capacity().max(GROWTH_QUANTUM);
            while target < end {
                target *= 2;
            }
            data.reserve(target - data.len());
        }
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(buf);
        let new_size = data.len() as u64;
        drop(data);
        if let Some(inode) = self.self_inode.lock().upgrade() {
            inode.with_metadata_mut(|m| m.size = m.size.max(new_size));
        }
        Ok(buf.len())
    }
}

struct RamSuperblockOps;
impl SuperblockOps for RamSuperblockOps {}

/// The `ramfs` filesystem type, registerable with a
/// [`crate::superblock::FileSystemRegistry`].
pub struct RamFs;

impl FileSystemType for RamFs {
    fn name(&self) -> &str {
        "ramfs"
    }

    fn mount(
        &self,
        _dev: Option<Arc<dyn crate::buffer_cache::BlockDevice>>,
        _data: &str,
    ) -> Result<Arc<Superblock>> {
        let sb = Superblock::new(GROWTH_QUANTUM as u32, 0, Arc::new(RamSuperblockOps));
        let ops = RamDirOps::new();
        let root_inode = Inode::new(
            alloc_ino(),
            InodeType::Directory,
            empty_meta(0o755 | 0o040000),
            ops.clone(),
            Weak::new(),
            None,
        );
        let root_dentry = Dentry::new_root(String::from("/"));
        ops.bind(&root_dentry);
        root_dentry.instantiate(root_inode.clone());
        sb.set_root(root_dentry);
        sb.track_inode(root_inode);
        Ok(sb)
    }
}
