//! Fair (CFS-like) scheduler class: a single vruntime-ordered list
//! (spec §4.E).

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use talon_core::sync::SpinLock;

use crate::task::Task;

/// A single list of Fair-class tasks, kept sorted by ascending
/// `vruntime` on insert.
pub struct Fair {
    queue: SpinLock<Vec<Arc<Task>>>,
}

impl Fair {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            queue: SpinLock::new(Vec::new()),
        }
    }

    /// Inserts `task` keeping the list ordered by `vruntime`.
    pub fn enqueue(&self, task: Arc<Task>) {
        let vruntime = task.vruntime.load(Ordering::Relaxed);
        let mut queue = self.queue.lock();
        let pos = queue
            .iter()
            .position(|t| t.vruntime.load(Ordering::Relaxed) > vruntime)
            .unwrap_or(queue.len());
        queue.insert(pos, task);
    }

    /// Takes the head of the list (smallest `vruntime`).
    pub fn pick_next(&self) -> Option<Arc<Task>> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }

    /// Whether any task is queued.
    pub fn has_ready(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    /// Called once per tick for the currently running Fair task:
    /// increments its accumulated `vruntime`.
    pub fn task_tick(&self, task: &Task) {
        task.vruntime.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for Fair {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{alloc_pid, SchedPolicy, INIT_PID};
    use alloc::string::String;
    use talon_core::addr::PhysAddr;
    use talon_fs::dentry::Dentry;
    use talon_fs::mount::MountTable;
    use talon_fs::path::LookupResult;
    use talon_fs::superblock::Superblock;

    fn root_lookup() -> LookupResult {
        let root = Dentry::new_root(String::from("/"));
        let mounts = MountTable::new();
        let sb = Superblock::new_for_test();
        let mnt = mounts.mount_root(root.clone(), sb);
        LookupResult {
            mount: mnt,
            dentry: root,
        }
    }

    fn make_task() -> Arc<Task> {
        Task::new(
            alloc_pid(),
            INIT_PID,
            SchedPolicy::Cfs,
            0x1000,
            PhysAddr::new(0),
            root_lookup(),
        )
    }

    #[test]
    fn pick_next_takes_smallest_vruntime() {
        let fair = Fair::new();
        let a = make_task();
        a.vruntime.store(10, Ordering::Relaxed);
        let b = make_task();
        b.vruntime.store(2, Ordering::Relaxed);
        fair.enqueue(a.clone());
        fair.enqueue(b.clone());
        assert_eq!(fair.pick_next().unwrap().pid, b.pid);
        assert_eq!(fair.pick_next().unwrap().pid, a.pid);
    }

    #[test]
    fn task_tick_increments_vruntime() {
        let task = make_task();
        let fair = Fair::new();
        fair.task_tick(&task);
        fair.task_tick(&task);
        assert_eq!(task.vruntime.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn empty_queue_has_no_ready_task() {
        let fair = Fair::new();
        assert!(!fair.has_ready());
        assert!(fair.pick_next().is_none());
    }
}
