//! High-resolution one-shot timers: a single expiry-ordered list,
//! drained by the tick (spec §4.L).

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::BinaryHeap;
use core::cmp::{Ordering as CmpOrdering, Reverse};

use talon_core::sync::SpinLock;

/// What the tick handler does with a fired timer's callback return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrtimerRestart {
    /// The timer is one-shot; drop it.
    NoRestart,
    /// The callback re-armed itself; the caller should re-insert at its
    /// new `expires_ns`.
    Restart(u64),
}

/// A callback invoked when a timer's deadline has passed.
pub type Callback = Box<dyn FnMut() -> HrtimerRestart + Send>;

struct Entry {
    expires_ns: u64,
    callback: Callback,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.expires_ns == other.expires_ns
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.expires_ns.cmp(&other.expires_ns)
    }
}

/// The expiry-ordered timer list.
pub struct HrtimerQueue {
    entries: SpinLock<BinaryHeap<Reverse<Entry>>>,
}

impl HrtimerQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            entries: SpinLock::new(BinaryHeap::new()),
        }
    }

    /// Inserts a timer expiring at `expires_ns`, in order.
    pub fn hrtimer_start(&self, expires_ns: u64, callback: Callback) {
        self.entries.lock().push(Reverse(Entry {
            expires_ns,
            callback,
        }));
    }

    /// Pops and runs every timer whose deadline has passed, releasing
    /// the list lock around each callback invocation and reacquiring it
    /// before continuing, so a callback is free to arm new timers.
    pub fn hrtimer_run_queues(&self, now_ns: u64) {
        loop {
            let due = {
                let mut entries = self.entries.lock();
                match entries.peek() {
                    Some(Reverse(entry)) if entry.expires_ns <= now_ns => {
                        entries.pop().map(|Reverse(e)| e)
                    }
                    _ => None,
                }
            };
            let Some(mut entry) = due else { break };
            if let HrtimerRestart::Restart(next) = (entry.callback)() {
                entry.expires_ns = next;
                self.entries.lock().push(Reverse(entry));
            }
        }
    }
}

impl Default for HrtimerQueue {
    fn default() -> Self {
        Self::new()
    }
}
