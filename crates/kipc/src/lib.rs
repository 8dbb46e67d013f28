//! IPC primitives: pipes, System V-style message queues, and shared
//! memory segments (spec §4.I).
//!
//! Host-testable like the other core crates; the kernel binary owns the
//! per-process key→id namespaces and the syscalls that drive these
//! types.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod msgqueue;
pub mod pipe;
pub mod shm;

pub use msgqueue::MsgQueueTable;
pub use pipe::Pipe;
pub use shm::SharedMemoryTable;
