//! Buffer cache: fixed-block cached disk I/O keyed by
//! `(block_device, block_number, size)`, per spec §4.F.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use bitflags::bitflags;
use talon_core::error::{KError, Result};
use talon_core::sync::SpinLock;

bitflags! {
    /// Buffer head state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferState: u8 {
        /// The data reflects the device as of the last read or write-through.
        const UPTODATE = 1 << 0;
        /// The data is newer than the device; needs writeback.
        const DIRTY = 1 << 1;
        /// The buffer is locked for exclusive I/O.
        const LOCKED = 1 << 2;
        /// An I/O request is in flight for this buffer.
        const REQ = 1 << 3;
        /// The buffer has an assigned block mapping.
        const MAPPED = 1 << 4;
    }
}

/// A block device as seen by the buffer cache: anything that can read
/// and write fixed-size blocks by number. The kernel's block layer
/// facade (spec §4.N) implements this over a `gendisk`/request queue.
pub trait BlockDevice: Send + Sync {
    /// A stable id distinguishing this device from others in the cache.
    fn device_id(&self) -> u64;
    /// The device's native block size in bytes.
    fn block_size(&self) -> u32;
    /// Reads the block at `block_number` into `buf` (`buf.len()` ==
    /// `block_size()`).
    fn read_block(&self, block_number: u64, buf: &mut [u8]) -> Result<()>;
    /// Writes `buf` to the block at `block_number`.
    fn write_block(&self, block_number: u64, buf: &[u8]) -> Result<()>;
}

/// One cached block's data plus state.
pub struct BufferHead {
    device_id: u64,
    block_number: u64,
    size: u32,
    data: SpinLock<Vec<u8>>,
    state: SpinLock<BufferState>,
    refcount: SpinLock<u32>,
}

impl BufferHead {
    /// This buffer's block number.
    pub const fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Current state bits.
    pub fn state(&self) -> BufferState {
        *self.state.lock()
    }

    /// Runs `f` with read access to the buffer's backing bytes.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.lock())
    }

    /// Runs `f` with mutable access to the buffer's backing bytes.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.data.lock())
    }
}

type Key = (u64, u64, u32);

struct Inner {
    buffers: BTreeMap<Key, Arc<BufferHead>>,
    /// Most-recently-used keys at the back; used to pick eviction
    /// candidates among buffers with zero references.
    lru: Vec<Key>,
}

/// A limit on cached buffers, beyond which unreferenced, clean entries
/// are reclaimed to bound kernel memory.
const MAX_CACHED_BUFFERS: usize = 4096;

/// The buffer cache.
pub struct BufferCache {
    inner: SpinLock<Inner>,
}

impl BufferCache {
    /// Creates an empty buffer cache.
    pub fn new() -> Self {
        Self {
            inner: SpinLock::new(Inner {
                buffers: BTreeMap::new(),
                lru: Vec::new(),
            }),
        }
    }

    fn touch(inner: &mut Inner, key: Key) {
        inner.lru.retain(|k| *k != key);
        inner.lru.push(key);
    }

    /// Returns the cached buffer for `(device, block_number, size)`,
    /// allocating a new (not-yet-Uptodate) one if absent.
    pub fn getblk(&self, device: &dyn BlockDevice, block_number: u64) -> Arc<BufferHead> {
        let size = device.block_size();
        let key = (device.device_id(), block_number, size);
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.buffers.get(&key).cloned() {
            Self::touch(&mut inner, key);
            return existing;
        }

        self.reclaim_if_needed(&mut inner);

        let buf = Arc::new(BufferHead {
            device_id: key.0,
            block_number,
            size,
            data: SpinLock::new(vec![0u8; size as usize]),
            state: SpinLock::new(BufferState::empty()),
            refcount: SpinLock::new(0),
        });
        inner.buffers.insert(key, buf.clone());
        Self::touch(&mut inner, key);
        buf
    }

    fn reclaim_if_needed(&self, inner: &mut Inner) {
        if inner.buffers.len() < MAX_CACHED_BUFFERS {
            return;
        }
        let candidates: Vec<Key> = inner.lru.clone();
        for key in candidates {
            if inner.buffers.len() < MAX_CACHED_BUFFERS {
                break;
            }
            if let Some(buf) = inner.buffers.get(&key) {
                let refs = *buf.refcount.lock();
                let dirty = buf.state().contains(BufferState::DIRTY);
                if refs == 0 && !dirty {
                    inner.buffers.remove(&key);
                    inner.lru.retain(|k| *k != key);
                }
            }
        }
    }

    /// Like [`getblk`](Self::getblk), but issues a read and blocks for it
    /// if the buffer is not yet `Uptodate`.
    pub fn bread(&self, device: &dyn BlockDevice, block_number: u64) -> Result<Arc<BufferHead>> {
        let buf = self.getblk(device, block_number);
        *buf.refcount.lock() += 1;
        if !buf.state().contains(BufferState::UPTODATE) {
            let result = buf.with_data_mut(|data| device.read_block(block_number, data));
            match result {
                Ok(()) => {
                    *buf.state.lock() |= BufferState::UPTODATE | BufferState::MAPPED;
                }
                Err(e) => {
                    *buf.refcount.lock() -= 1;
                    return Err(e);
                }
            }
        }
        Ok(buf)
    }

    /// Drops a reference to `buf` acquired via [`bread`](Self::bread).
    pub fn brelse(&self, buf: &Arc<BufferHead>) {
        let mut refcount = buf.refcount.lock();
        *refcount = refcount.saturating_sub(1);
    }

    /// Marks `buf` dirty, to be written back by
    /// [`sync_dirty_buffer`](Self::sync_dirty_buffer).
    pub fn mark_buffer_dirty(&self, buf: &Arc<BufferHead>) {
        *buf.state.lock() |= BufferState::DIRTY;
    }

    /// Writes `buf` back to `device` and clears `Dirty` on success.
    pub fn sync_dirty_buffer(&self, device: &dyn BlockDevice, buf: &Arc<BufferHead>) -> Result<()> {
        if !buf.state().contains(BufferState::DIRTY) {
            return Ok(());
        }
        *buf.state.lock() |= BufferState::LOCKED;
        let result = buf.with_data(|data| device.write_block(buf.block_number(), data));
        *buf.state.lock() &= !BufferState::LOCKED;
        match result {
            Ok(()) => {
                let mut state = buf.state.lock();
                *state &= !BufferState::DIRTY;
                *state |= BufferState::UPTODATE;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl Default for BufferCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    struct MemDevice {
        id: u64,
        block_size: u32,
        blocks: SpinLock<BTreeMap<u64, Vec<u8>>>,
        fail_read: SpinLock<bool>,
    }

    impl MemDevice {
        fn new(id: u64, block_size: u32) -> Self {
            Self {
                id,
                block_size,
                blocks: SpinLock::new(BTreeMap::new()),
                fail_read: SpinLock::new(false),
            }
        }
    }

    impl BlockDevice for MemDevice {
        fn device_id(&self) -> u64 {
            self.id
        }
        fn block_size(&self) -> u32 {
            self.block_size
        }
        fn read_block(&self, block_number: u64, buf: &mut [u8]) -> Result<()> {
            if *self.fail_read.lock() {
                return Err(KError::Io);
            }
            let blocks = self.blocks.lock();
            if let Some(data) = blocks.get(&block_number) {
                buf.copy_from_slice(data);
            } else {
                buf.fill(0);
            }
            Ok(())
        }
        fn write_block(&self, block_number: u64, buf: &[u8]) -> Result<()> {
            self.blocks.lock().insert(block_number, buf.to_vec());
            Ok(())
        }
    }

    #[test]
    fn bread_modify_mark_dirty_sync_bread_roundtrip() {
        let cache = BufferCache::new();
        let dev = MemDevice::new(1, 512);

        let buf = cache.bread(&dev, 3).unwrap();
        assert!(buf.state().contains(BufferState::UPTODATE));
        buf.with_data_mut(|d| d[0] = 0xAB);
        cache.mark_buffer_dirty(&buf);
        assert!(buf.state().contains(BufferState::DIRTY));
        cache.sync_dirty_buffer(&dev, &buf).unwrap();
        assert!(!buf.state().contains(BufferState::DIRTY));
        cache.brelse(&buf);

        let buf2 = cache.bread(&dev, 3).unwrap();
        buf2.with_data(|d| assert_eq!(d[0], 0xAB));
    }

    #[test]
    fn failed_read_surfaces_as_io_error() {
        let cache = BufferCache::new();
        let dev = MemDevice::new(2, 512);
        *dev.fail_read.lock() = true;
        assert_eq!(cache.bread(&dev, 0), Err(KError::Io));
    }

    #[test]
    fn getblk_returns_same_buffer_for_same_key() {
        let cache = BufferCache::new();
        let dev = MemDevice::new(3, 512);
        let a = cache.getblk(&dev, 5);
        let b = cache.getblk(&dev, 5);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
