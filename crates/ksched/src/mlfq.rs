//! MLFQ scheduler class: per-level FIFO queues, demotion on slice
//! exhaustion (spec §4.E).

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use talon_core::sync::SpinLock;

use crate::task::{Task, MLFQ_LEVELS, MLFQ_QUANTA};

/// Per-level FIFO ready queues, highest priority (level 0) first.
pub struct Mlfq {
    levels: [SpinLock<VecDeque<Arc<Task>>>; MLFQ_LEVELS],
}

impl Mlfq {
    /// Creates all levels empty.
    pub fn new() -> Self {
        Self {
            levels: core::array::from_fn(|_| SpinLock::new(VecDeque::new())),
        }
    }

    /// Appends `task` to the tail of its current priority level.
    pub fn enqueue(&self, task: Arc<Task>) {
        let level = task.priority().min(MLFQ_LEVELS - 1);
        self.levels[level].lock().push_back(task);
    }

    /// Scans levels from highest (0) to lowest, returning the head of
    /// the first non-empty one.
    pub fn pick_next(&self) -> Option<Arc<Task>> {
        for level in &self.levels {
            if let Some(task) = level.lock().pop_front() {
                return Some(task);
            }
        }
        None
    }

    /// Whether any level has a runnable task.
    pub fn has_ready(&self) -> bool {
        self.levels.iter().any(|l| !l.lock().is_empty())
    }

    /// Called once per tick for the currently running MLFQ task.
    /// Decrements its time slice; on exhaustion, demotes it one level
    /// (clamped at the lowest) and resets the slice from that level's
    /// quantum table.
    pub fn task_tick(&self, task: &Task) {
        let remaining = task.time_slice.fetch_sub(1, Ordering::Relaxed);
        if remaining <= 1 {
            let demoted = (task.priority() + 1).min(MLFQ_LEVELS - 1);
            task.priority.store(demoted as u32, Ordering::Relaxed);
            task.time_slice
                .store(MLFQ_QUANTA[demoted], Ordering::Relaxed);
        }
    }

    /// Whether `task`'s quantum is exhausted (its slice hit zero this
    /// tick), the signal the dispatcher uses to reschedule.
    pub fn slice_exhausted(&self, task: &Task) -> bool {
        task.time_slice.load(Ordering::Relaxed) == 0
    }
}

impl Default for Mlfq {
    fn default() -> Self {
        Self::new()
    }
}
