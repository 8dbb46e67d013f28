//! Block layer facade (spec §4.N).
//!
//! `talon_fs::buffer_cache` depends only on `bread`/`brelse` against a
//! `BlockDevice`; this module supplies the `gendisk` identifier and a
//! request queue with a pluggable elevator sitting behind it, so a real
//! disk driver can reorder/merge requests without the buffer cache or
//! VFS ever seeing a `Request`.

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::String;

use talon_core::error::Result;
use talon_core::sync::SpinLock;
use talon_fs::buffer_cache::BlockDevice;

/// Direction of a block I/O request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Read from the device into the request's buffer.
    Read,
    /// Write the request's buffer to the device.
    Write,
}

/// One pending block I/O request.
pub struct Request {
    /// Direction of transfer.
    pub direction: Direction,
    /// Block number on the underlying device.
    pub block_number: u64,
    /// Data to write, or the destination for a read.
    pub data: alloc::vec::Vec<u8>,
}

/// A disk as seen by the block layer: a stable identity plus the raw
/// single-block transfer primitives a driver implements.
pub trait Gendisk: Send + Sync {
    /// Disk name, e.g. `"virtio-blk-0"`.
    fn name(&self) -> &str;
    /// Native block size, in bytes.
    fn block_size(&self) -> u32;
    /// Reads one block into `buf` (`buf.len() == block_size()`).
    fn read_block(&self, block_number: u64, buf: &mut [u8]) -> Result<()>;
    /// Writes one block from `buf`.
    fn write_block(&self, block_number: u64, buf: &[u8]) -> Result<()>;
}

/// Orders (and may merge) pending requests before they're dispatched to
/// the [`Gendisk`]. Specified as a trait only (spec §4.N); this kernel
/// ships a single FIFO implementation since it has no concurrent I/O
/// source to benefit from reordering.
pub trait Elevator: Send + Sync {
    /// Inserts `req` into `queue` according to this elevator's policy.
    fn insert(&mut self, queue: &mut VecDeque<Request>, req: Request);
    /// Removes the next request to dispatch, if any.
    fn next(&mut self, queue: &mut VecDeque<Request>) -> Option<Request>;
}

/// First-in-first-out elevator: no reordering or merging.
#[derive(Default)]
pub struct NoopElevator;

impl Elevator for NoopElevator {
    fn insert(&mut self, queue: &mut VecDeque<Request>, req: Request) {
        queue.push_back(req);
    }
    fn next(&mut self, queue: &mut VecDeque<Request>) -> Option<Request> {
        queue.pop_front()
    }
}

struct QueueInner {
    pending: VecDeque<Request>,
    elevator: Box<dyn Elevator>,
}

/// A disk's request queue: requests are inserted via the elevator and
/// dispatched to the [`Gendisk`] synchronously (this kernel has no
/// async I/O completion path — `ll_rw_block` both submits and drains).
pub struct RequestQueue {
    name: String,
    disk: Box<dyn Gendisk>,
    inner: SpinLock<QueueInner>,
}

impl RequestQueue {
    /// Wraps `disk` in a request queue using `elevator` to order
    /// requests.
    pub fn new(disk: Box<dyn Gendisk>, elevator: Box<dyn Elevator>) -> Self {
        let name = String::from(disk.name());
        Self {
            name,
            disk,
            inner: SpinLock::new(QueueInner {
                pending: VecDeque::new(),
                elevator,
            }),
        }
    }

    /// The underlying gendisk's stable name.
    pub fn gendisk_name(&self) -> &str {
        &self.name
    }
}

/// Submits `req` through the queue's elevator and immediately
/// dispatches it to the disk, as both read and write paths require
/// (spec §4.N: "core only depends on bread/brelse/ll_rw_block").
pub fn ll_rw_block(queue: &RequestQueue, direction: Direction, block_number: u64, buf: &mut [u8]) -> Result<()> {
    let req = Request {
        direction,
        block_number,
        data: buf.to_vec(),
    };
    let mut inner = queue.inner.lock();
    inner.elevator.insert(&mut inner.pending, req);
    let Some(dispatched) = inner.elevator.next(&mut inner.pending) else {
        return Ok(());
    };
    drop(inner);

    match dispatched.direction {
        Direction::Read => {
            queue.disk.read_block(dispatched.block_number, buf)?;
        }
        Direction::Write => {
            queue.disk.write_block(dispatched.block_number, &dispatched.data)?;
        }
    }
    Ok(())
}

impl BlockDevice for RequestQueue {
    fn device_id(&self) -> u64 {
        self.name.as_bytes().iter().fold(0u64, |acc, &b| {
            acc.wrapping_mul(31).wrapping_add(b as u64)
        })
    }

    fn block_size(&self) -> u32 {
        self.disk.block_size()
    }

    fn read_block(&self, block_number: u64, buf: &mut [u8]) -> Result<()> {
        ll_rw_block(self, Direction::Read, block_number, buf)
    }

    fn write_block(&self, block_number: u64, buf: &[u8]) -> Result<()> {
        let mut scratch = buf.to_vec();
        ll_rw_block(self, Direction::Write, block_number, &mut scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talon_core::sync::SpinLock as Lock;

    struct MemDisk {
        blocks: Lock<alloc::vec::Vec<[u8; 512]>>,
    }

    impl Gendisk for MemDisk {
        fn name(&self) -> &str {
            "mem0"
        }
        fn block_size(&self) -> u32 {
            512
        }
        fn read_block(&self, block_number: u64, buf: &mut [u8]) -> Result<()> {
            buf.copy_from_slice(&self.blocks.lock()[block_number as usize]);
            Ok(())
        }
        fn write_block(&self, block_number: u64, buf: &[u8]) -> Result<()> {
            self.blocks.lock()[block_number as usize].copy_from_slice(buf);
            Ok(())
        }
    }

    #[test]
    fn write_then_read_round_trips_through_queue() {
        let disk = MemDisk {
            blocks: Lock::new(alloc::vec![[0u8; 512]; 4]),
        };
        let queue = RequestQueue::new(Box::new(disk), Box::new(NoopElevator));

        let mut write_buf = [7u8; 512];
        ll_rw_block(&queue, Direction::Write, 2, &mut write_buf).unwrap();

        let mut read_buf = [0u8; 512];
        ll_rw_block(&queue, Direction::Read, 2, &mut read_buf).unwrap();
        assert_eq!(read_buf, [7u8; 512]);
    }

    #[test]
    fn buffer_cache_bread_brelse_round_trip_via_request_queue() {
        let disk = MemDisk {
            blocks: Lock::new(alloc::vec![[0u8; 512]; 4]),
        };
        let queue = RequestQueue::new(Box::new(disk), Box::new(NoopElevator));
        let cache = talon_fs::buffer_cache::BufferCache::new();

        {
            let buf = cache.bread(&queue, 1).unwrap();
            buf.with_data_mut(|d| d[0] = 0x42);
            cache.mark_buffer_dirty(&buf);
            cache.sync_dirty_buffer(&queue, &buf).unwrap();
            cache.brelse(&buf);
        }

        let buf = cache.bread(&queue, 1).unwrap();
        buf.with_data(|d| assert_eq!(d[0], 0x42));
        cache.brelse(&buf);
    }
}
