//! System V-style message queues (spec §4.I).
//!
//! Queues are named by an integer key; `msgget` creates one on first
//! use and returns the existing id on a repeat call for the same key.
//! Key `0` is always private: every `msgget(0, ...)` mints a fresh,
//! unshared queue.

extern crate alloc;

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, Ordering};

use talon_core::error::{KError, Result};
use talon_core::sync::{SpinLock, WaitQueue};

/// Max bytes per message body (spec §4.I).
pub const MSG_SIZE: usize = 1024;

struct Message {
    msg_type: i64,
    bytes: Vec<u8>,
}

/// A single FIFO queue of `{type, bytes}` entries.
pub struct MsgQueue {
    messages: SpinLock<VecDeque<Message>>,
    recv_wait: WaitQueue,
}

impl MsgQueue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: SpinLock::new(VecDeque::new()),
            recv_wait: WaitQueue::new(),
        })
    }

    /// Appends `{msg_type, bytes}` and wakes every blocked receiver.
    ///
    /// Fails with [`KError::Inval`] if `bytes` exceeds [`MSG_SIZE`].
    pub fn send(&self, msg_type: i64, bytes: &[u8]) -> Result<()> {
        if bytes.len() > MSG_SIZE {
            return Err(KError::Inval);
        }
        self.messages.lock().push_back(Message {
            msg_type,
            bytes: bytes.to_vec(),
        });
        self.recv_wait.wake_all();
        Ok(())
    }

    /// Blocks until an entry matches `msgtyp` (`0` matches any,
    /// otherwise the first entry with `type == msgtyp`), then splices
    /// it out and copies up to `buf.len()` bytes of its body.
    ///
    /// Returns the matched entry's type and the number of bytes copied
    /// (truncated to `buf.len()` if the stored message was longer).
    pub fn recv(&self, msgtyp: i64, buf: &mut [u8]) -> (i64, usize) {
        loop {
            {
                let mut messages = self.messages.lock();
                let pos = messages
                    .iter()
                    .position(|m| msgtyp == 0 || m.msg_type == msgtyp);
                if let Some(pos) = pos {
                    let entry = messages.remove(pos).expect("position just located");
                    drop(messages);
                    let n = buf.len().min(entry.bytes.len());
                    buf[..n].copy_from_slice(&entry.bytes[..n]);
                    return (entry.msg_type, n);
                }
            }
            self.recv_wait.wait();
        }
    }
}

/// The key→id and id→queue namespaces `msgget`/`msgsnd`/`msgrcv` index
/// into.
pub struct MsgQueueTable {
    by_key: SpinLock<BTreeMap<i64, i32>>,
    by_id: SpinLock<BTreeMap<i32, Arc<MsgQueue>>>,
    next_id: AtomicI32,
}

impl MsgQueueTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            by_key: SpinLock::new(BTreeMap::new()),
            by_id: SpinLock::new(BTreeMap::new()),
            next_id: AtomicI32::new(1),
        }
    }

    /// `msgget(key)`: returns the existing queue id for `key` if one was
    /// already created with it, otherwise mints a new one. `key == 0`
    /// always mints a new, unkeyed queue.
    pub fn msgget(&self, key: i64) -> i32 {
        if key != 0 {
            if let Some(&id) = self.by_key.lock().get(&key) {
                return id;
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.by_id.lock().insert(id, MsgQueue::new());
        if key != 0 {
            self.by_key.lock().insert(key, id);
        }
        id
    }

    /// Looks up a live queue by id.
    pub fn queue(&self, id: i32) -> Result<Arc<MsgQueue>> {
        self.by_id.lock().get(&id).cloned().ok_or(KError::NoEnt)
    }
}

impl Default for MsgQueueTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msgget_same_key_returns_same_id() {
        let table = MsgQueueTable::new();
        let a = table.msgget(42);
        let b = table.msgget(42);
        assert_eq!(a, b);
    }

    #[test]
    fn msgget_zero_key_always_mints_fresh_id() {
        let table = MsgQueueTable::new();
        let a = table.msgget(0);
        let b = table.msgget(0);
        assert_ne!(a, b);
    }

    #[test]
    fn send_too_large_is_rejected() {
        let table = MsgQueueTable::new();
        let id = table.msgget(1);
        let queue = table.queue(id).unwrap();
        let big = alloc::vec![0u8; MSG_SIZE + 1];
        assert_eq!(queue.send(1, &big).unwrap_err(), KError::Inval);
    }

    #[test]
    fn recv_matches_first_entry_of_requested_type() {
        let table = MsgQueueTable::new();
        let id = table.msgget(1);
        let queue = table.queue(id).unwrap();
        queue.send(1, b"one").unwrap();
        queue.send(2, b"two").unwrap();
        queue.send(2, b"two-again").unwrap();

        let mut buf = [0u8; 16];
        let (ty, n) = queue.recv(2, &mut buf);
        assert_eq!(ty, 2);
        assert_eq!(&buf[..n], b"two");
    }

    #[test]
    fn recv_zero_matches_any_type_in_order() {
        let table = MsgQueueTable::new();
        let id = table.msgget(1);
        let queue = table.queue(id).unwrap();
        queue.send(5, b"first").unwrap();
        queue.send(9, b"second").unwrap();

        let mut buf = [0u8; 16];
        let (ty, n) = queue.recv(0, &mut buf);
        assert_eq!(ty, 5);
        assert_eq!(&buf[..n], b"first");
    }

    #[test]
    fn recv_truncates_to_caller_buffer() {
        let table = MsgQueueTable::new();
        let id = table.msgget(1);
        let queue = table.queue(id).unwrap();
        queue.send(1, b"HELLOWORLD").unwrap();

        let mut buf = [0u8; 5];
        let (_, n) = queue.recv(0, &mut buf);
        assert_eq!(n, 5);
        assert_eq!(&buf, b"HELLO");
    }

    #[test]
    fn unknown_id_is_noent() {
        let table = MsgQueueTable::new();
        assert_eq!(table.queue(999).unwrap_err(), KError::NoEnt);
    }
}
