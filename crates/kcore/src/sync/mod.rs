//! Synchronization primitives.
//!
//! [`SpinLock`] protects state reachable from interrupt context (dcache,
//! inode, mapping, run queues, buffer heads — spec §5). [`Mutex`] and
//! [`WaitQueue`] instead park the calling task via
//! [`crate::sched_hooks`], matching the ordering rule of spec §5: no
//! sleeping primitive is ever invoked while a spinlock is held.

mod mutex;
mod rwlock;
mod spinlock;
mod waitqueue;

pub use mutex::{Mutex, MutexGuard};
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use spinlock::{SpinLock, SpinLockGuard};
pub use waitqueue::WaitQueue;
