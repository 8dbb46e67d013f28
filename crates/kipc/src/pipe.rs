//! Byte-oriented pipe (spec §4.I).
//!
//! A pipe is a fixed 4096-byte ring shared by a reader and writer side,
//! each tracked by a refcount. `read` blocks while the ring is empty
//! unless all writers have closed (EOF); `write` blocks while the ring
//! is full unless all readers have closed (`EPIPE`).

extern crate alloc;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use talon_core::error::{KError, Result};
use talon_core::sync::{SpinLock, WaitQueue};

/// Ring capacity, in bytes (spec §4.I, §8).
pub const PIPE_CAPACITY: usize = 4096;

struct Ring {
    data: [u8; PIPE_CAPACITY],
    read_pos: usize,
    write_pos: usize,
    count: usize,
}

impl Ring {
    fn new() -> Self {
        Self {
            data: [0; PIPE_CAPACITY],
            read_pos: 0,
            write_pos: 0,
            count: 0,
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.count);
        for slot in buf.iter_mut().take(n) {
            *slot = self.data[self.read_pos];
            self.read_pos = (self.read_pos + 1) % PIPE_CAPACITY;
        }
        self.count -= n;
        n
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let n = buf.len().min(PIPE_CAPACITY - self.count);
        for &byte in buf.iter().take(n) {
            self.data[self.write_pos] = byte;
            self.write_pos = (self.write_pos + 1) % PIPE_CAPACITY;
        }
        self.count += n;
        n
    }
}

/// A pipe's shared state: the ring buffer plus both halves' refcounts.
pub struct Pipe {
    ring: SpinLock<Ring>,
    read_wait: WaitQueue,
    write_wait: WaitQueue,
    readers: AtomicU32,
    writers: AtomicU32,
}

impl Pipe {
    /// Creates a pipe with one reader and one writer already attached
    /// (the two ends `pipe(2)` hands back).
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ring: SpinLock::new(Ring::new()),
            read_wait: WaitQueue::new(),
            write_wait: WaitQueue::new(),
            readers: AtomicU32::new(1),
            writers: AtomicU32::new(1),
        })
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    /// Whether the ring holds no data.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads up to `buf.len()` bytes, blocking while the ring is empty
    /// and at least one writer remains. Returns `0` once all writers
    /// have closed (EOF).
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            {
                let mut ring = self.ring.lock();
                if ring.count > 0 {
                    let n = ring.read(buf);
                    drop(ring);
                    self.write_wait.wake_one();
                    return Ok(n);
                }
                if self.writers.load(Ordering::Acquire) == 0 {
                    return Ok(0);
                }
            }
            self.read_wait.wait();
        }
    }

    /// Writes up to `buf.len()` bytes, blocking while the ring is full
    /// and at least one reader remains. Fails with [`KError::Pipe`]
    /// once all readers have closed.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        loop {
            {
                let mut ring = self.ring.lock();
                if self.readers.load(Ordering::Acquire) == 0 {
                    return Err(KError::Pipe);
                }
                if ring.count < PIPE_CAPACITY {
                    let n = ring.write(buf);
                    drop(ring);
                    self.read_wait.wake_one();
                    return Ok(n);
                }
            }
            self.write_wait.wait();
        }
    }

    /// Attaches another reader handle (e.g. across `fork`).
    pub fn add_reader(&self) {
        self.readers.fetch_add(1, Ordering::Relaxed);
    }

    /// Attaches another writer handle.
    pub fn add_writer(&self) {
        self.writers.fetch_add(1, Ordering::Relaxed);
    }

    /// Closes one reader handle, waking writers blocked on the `EPIPE`
    /// transition.
    pub fn close_reader(&self) {
        self.readers.fetch_sub(1, Ordering::Release);
        self.write_wait.wake_all();
    }

    /// Closes one writer handle, waking readers blocked on the EOF
    /// transition.
    pub fn close_writer(&self) {
        self.writers.fetch_sub(1, Ordering::Release);
        self.read_wait.wake_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let pipe = Pipe::new();
        assert_eq!(pipe.write(b"HELLO").unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(pipe.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"HELLO");
    }

    #[test]
    fn read_returns_eof_once_writers_closed_and_empty() {
        let pipe = Pipe::new();
        pipe.close_writer();
        let mut buf = [0u8; 8];
        assert_eq!(pipe.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn write_fails_epipe_once_readers_closed() {
        let pipe = Pipe::new();
        pipe.close_reader();
        assert_eq!(pipe.write(b"x").unwrap_err(), KError::Pipe);
    }

    #[test]
    fn write_partial_when_near_full_then_read_drains_in_order() {
        let pipe = Pipe::new();
        let chunk = [7u8; PIPE_CAPACITY - 2];
        assert_eq!(pipe.write(&chunk).unwrap(), PIPE_CAPACITY - 2);
        let overflow = [9u8; 10];
        assert_eq!(pipe.write(&overflow).unwrap(), 2);
        assert_eq!(pipe.len(), PIPE_CAPACITY);

        let mut buf = [0u8; PIPE_CAPACITY];
        assert_eq!(pipe.read(&mut buf).unwrap(), PIPE_CAPACITY);
        assert_eq!(&buf[..PIPE_CAPACITY - 2], &chunk[..]);
        assert_eq!(&buf[PIPE_CAPACITY - 2..], &[9u8, 9u8]);
    }

    #[test]
    fn count_invariant_matches_position_delta() {
        let pipe = Pipe::new();
        pipe.write(b"0123456789").unwrap();
        let mut buf = [0u8; 4];
        pipe.read(&mut buf).unwrap();
        let ring = pipe.ring.lock();
        assert_eq!(
            ring.count,
            (ring.write_pos + PIPE_CAPACITY - ring.read_pos) % PIPE_CAPACITY
        );
    }
}
