//! Task wait queues.
//!
//! Unlike the teacher's `Waker`-based async wait queue, this one parks
//! and wakes real tasks through [`crate::sched_hooks`]. A task enqueues
//! itself, then blocks; a waker pops task ids off the queue and resumes
//! them one at a time (or all at once).

use crate::sched_hooks;
use crate::sync::SpinLock;
use alloc::collections::VecDeque;

/// A FIFO queue of blocked task ids.
pub struct WaitQueue {
    waiters: SpinLock<VecDeque<u32>>,
}

impl WaitQueue {
    /// Creates an empty wait queue.
    pub const fn new() -> Self {
        Self {
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// Blocks the current task until [`wake_one`](Self::wake_one) or
    /// [`wake_all`](Self::wake_all) removes it from the queue.
    ///
    /// Must not be called while holding any [`SpinLock`] — blocking with
    /// interrupts or a spinlock held would deadlock the scheduler.
    pub fn wait(&self) {
        let id = sched_hooks::current_task();
        self.waiters.lock().push_back(id);
        sched_hooks::block_current();
    }

    /// Wakes a single waiting task, if any are queued.
    pub fn wake_one(&self) {
        let next = self.waiters.lock().pop_front();
        if let Some(id) = next {
            sched_hooks::wake(id);
        }
    }

    /// Wakes every waiting task.
    pub fn wake_all(&self) {
        let drained: VecDeque<u32> = core::mem::take(&mut *self.waiters.lock());
        for id in drained {
            sched_hooks::wake(id);
        }
    }

    /// Returns the number of tasks currently queued.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Returns whether no tasks are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static WOKEN: AtomicU32 = AtomicU32::new(0);

    fn fake_block() {}
    fn fake_wake(id: u32) {
        WOKEN.store(id, Ordering::SeqCst);
    }
    fn fake_current() -> u32 {
        7
    }

    #[test]
    fn wake_one_pops_fifo_order() {
        unsafe { sched_hooks::install(fake_block, fake_wake, fake_current) };
        let q = WaitQueue::new();
        q.wait();
        q.wait();
        assert_eq!(q.len(), 2);
        q.wake_one();
        assert_eq!(WOKEN.load(Ordering::SeqCst), 7);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn wake_all_drains_queue() {
        unsafe { sched_hooks::install(fake_block, fake_wake, fake_current) };
        let q = WaitQueue::new();
        q.wait();
        q.wait();
        q.wake_all();
        assert!(q.is_empty());
    }
}
