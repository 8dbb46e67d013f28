//! Open files and the per-process fd table (spec §4.H.3, §4.H.4).

use alloc::sync::Arc;

use bitflags::bitflags;
use talon_core::error::{KError, Result};
use talon_core::sync::SpinLock;

use crate::inode::{DirEntry, Inode};
use crate::path::LookupResult;

bitflags! {
    /// Flags for `open`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Open for reading.
        const READ_ONLY = 1 << 0;
        /// Open for writing.
        const WRITE_ONLY = 1 << 1;
        /// Open for reading and writing.
        const READ_WRITE = 1 << 2;
        /// Create the file if it does not exist.
        const CREATE = 1 << 3;
        /// Truncate to zero length on open.
        const TRUNCATE = 1 << 4;
        /// Only valid for directories.
        const DIRECTORY = 1 << 5;
        /// Append writes to the current end of file.
        const APPEND = 1 << 6;
    }
}

/// Origin for [`File::lseek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    /// Relative to the start of the file.
    Set(i64),
    /// Relative to the current position.
    Cur(i64),
    /// Relative to the end of the file.
    End(i64),
}

/// An open file: a positioned handle onto a dentry/inode, shared by
/// `dup`. Created by `open`, destroyed when its refcount reaches zero.
pub struct File {
    location: LookupResult,
    inode: Arc<Inode>,
    flags: OpenFlags,
    pos: SpinLock<u64>,
    refcount: SpinLock<u32>,
}

impl File {
    /// Opens `inode` at `location` with `flags`, with an initial
    /// refcount of one.
    pub fn new(location: LookupResult, inode: Arc<Inode>, flags: OpenFlags) -> Arc<Self> {
        Arc::new(Self {
            location,
            inode,
            flags,
            pos: SpinLock::new(0),
            refcount: SpinLock::new(1),
        })
    }

    /// The dentry/mount this file was opened through.
    pub fn location(&self) -> &LookupResult {
        &self.location
    }

    /// The backing inode.
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    /// The flags this file was opened with.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Current read/write position.
    pub fn pos(&self) -> u64 {
        *self.pos.lock()
    }

    fn bump_refcount(&self) {
        *self.refcount.lock() += 1;
    }

    fn drop_refcount(&self) -> u32 {
        let mut r = self.refcount.lock();
        *r = r.saturating_sub(1);
        *r
    }

    /// Reads into `buf` at the current position, advancing it.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let pos = self.pos();
        let n = self.inode.ops().read_at(pos, buf)?;
        *self.pos.lock() = pos + n as u64;
        Ok(n)
    }

    /// Writes `buf` at the current position (or at end-of-file if
    /// `APPEND` is set), advancing the position.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let pos = if self.flags.contains(OpenFlags::APPEND) {
            self.inode.metadata().size
        } else {
            self.pos()
        };
        let n = self.inode.ops().write_at(pos, buf)?;
        *self.pos.lock() = pos + n as u64;
        Ok(n)
    }

    /// Recomputes the file position from `whence`.
    ///
    /// Fails with [`KError::Inval`] if the resulting position would be
    /// negative.
    pub fn lseek(&self, whence: SeekFrom) -> Result<u64> {
        let size = self.inode.metadata().size as i64;
        let current = self.pos() as i64;
        let new_pos = match whence {
            SeekFrom::Set(off) => off,
            SeekFrom::Cur(off) => current + off,
            SeekFrom::End(off) => size + off,
        };
        if new_pos < 0 {
            return Err(KError::Inval);
        }
        *self.pos.lock() = new_pos as u64;
        Ok(new_pos as u64)
    }

    /// Returns the next directory entry and advances the position by
    /// one, or `None` past the last entry.
    pub fn readdir(&self) -> Result<Option<DirEntry>> {
        let index = self.pos() as usize;
        let entry = self.inode.ops().readdir(index)?;
        if entry.is_some() {
            *self.pos.lock() += 1;
        }
        Ok(entry)
    }
}

/// Bound on the number of simultaneously open fds per process (spec §3).
pub const MAX_FILES: usize = 256;

/// A process's table of open file descriptors, a bounded array indexed
/// by fd number.
pub struct FileDescriptorTable {
    slots: [Option<Arc<File>>; MAX_FILES],
}

impl FileDescriptorTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// Installs `file` in the first free slot.
    ///
    /// Fails with [`KError::BadFd`] if the table is full.
    pub fn install(&mut self, file: Arc<File>) -> Result<usize> {
        for (fd, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return Ok(fd);
            }
        }
        Err(KError::BadFd)
    }

    /// Installs `file` at a specific fd number, overwriting any
    /// existing entry (used for stdin/stdout/stderr setup).
    pub fn install_at(&mut self, fd: usize, file: Arc<File>) -> Result<()> {
        let slot = self.slots.get_mut(fd).ok_or(KError::BadFd)?;
        *slot = Some(file);
        Ok(())
    }

    /// Looks up the file at `fd`.
    pub fn get(&self, fd: usize) -> Result<Arc<File>> {
        self.slots
            .get(fd)
            .and_then(|s| s.clone())
            .ok_or(KError::BadFd)
    }

    /// Closes `fd`, dropping its reference to the underlying file.
    pub fn close(&mut self, fd: usize) -> Result<()> {
        let slot = self.slots.get_mut(fd).ok_or(KError::BadFd)?;
        let file = slot.take().ok_or(KError::BadFd)?;
        file.drop_refcount();
        Ok(())
    }

    /// Duplicates `fd` into the first free slot, bumping the file's
    /// refcount.
    ///
    /// Fails with [`KError::BadFd`] if `fd` is not open or the table is
    /// full.
    pub fn dup(&mut self, fd: usize) -> Result<usize> {
        let file = self.get(fd)?;
        file.bump_refcount();
        match self.install(file.clone()) {
            Ok(new_fd) => Ok(new_fd),
            Err(e) => {
                file.drop_refcount();
                Err(e)
            }
        }
    }
}

impl Default for FileDescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}
