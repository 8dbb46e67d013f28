//! The sleep queue: tasks parked for N ticks, woken by the tick handler
//! (spec §4.E).

extern crate alloc;

use alloc::collections::BinaryHeap;
use core::cmp::{Ordering as CmpOrdering, Reverse};

use talon_core::sync::SpinLock;

use crate::task::Pid;

struct SleepEntry {
    wake_tick: u64,
    pid: Pid,
}

impl PartialEq for SleepEntry {
    fn eq(&self, other: &Self) -> bool {
        self.wake_tick == other.wake_tick
    }
}
impl Eq for SleepEntry {}
impl PartialOrd for SleepEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for SleepEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.wake_tick.cmp(&other.wake_tick)
    }
}

/// A single list of sleeping tasks, keyed by the tick at which each
/// should wake, scanned on every tick.
pub struct SleepQueue {
    entries: SpinLock<BinaryHeap<Reverse<SleepEntry>>>,
}

impl SleepQueue {
    /// Creates an empty sleep queue.
    pub fn new() -> Self {
        Self {
            entries: SpinLock::new(BinaryHeap::new()),
        }
    }

    /// Parks `pid` until `wake_tick`.
    pub fn sleep_until(&self, pid: Pid, wake_tick: u64) {
        self.entries.lock().push(Reverse(SleepEntry { wake_tick, pid }));
    }

    /// Pops and returns every pid whose `wake_tick` has passed, in
    /// ascending wake-tick order. Called once per tick.
    pub fn wake_expired(&self, now_tick: u64) -> alloc::vec::Vec<Pid> {
        let mut woken = alloc::vec::Vec::new();
        let mut entries = self.entries.lock();
        while let Some(Reverse(entry)) = entries.peek() {
            if entry.wake_tick > now_tick {
                break;
            }
            let Reverse(entry) = entries.pop().unwrap();
            woken.push(entry.pid);
        }
        woken
    }
}

impl Default for SleepQueue {
    fn default() -> Self {
        Self::new()
    }
}
