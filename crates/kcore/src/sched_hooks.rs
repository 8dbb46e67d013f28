//! Indirection point between `talon-core`'s blocking primitives and
//! `talon-sched`'s task scheduler.
//!
//! `talon-core` cannot depend on `talon-sched` (the scheduler builds on
//! these primitives), so [`WaitQueue`](crate::sync::WaitQueue) blocks a
//! task by calling through a small set of function pointers the
//! scheduler installs once at boot — the same "register a hook, call
//! through an atomic pointer" idiom used by [`crate::log`].

use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

/// Blocks the calling task until it is woken by [`WakeFn`]. Must only be
/// called from task context (never from an interrupt handler).
pub type BlockFn = fn();
/// Moves the task identified by `task_id` from Blocked to Ready.
pub type WakeFn = fn(task_id: u32);
/// Returns the identifier of the currently running task.
pub type CurrentTaskFn = fn() -> u32;

fn null_block() {}
fn null_wake(_task_id: u32) {}
fn null_current() -> u32 {
    0
}

static BLOCK_FN: AtomicPtr<()> = AtomicPtr::new(null_block as *mut ());
static WAKE_FN: AtomicPtr<()> = AtomicPtr::new(null_wake as *mut ());
static CURRENT_FN: AtomicPtr<()> = AtomicPtr::new(null_current as *mut ());

/// A placeholder task id used before the scheduler installs its hooks
/// (e.g. while running host unit tests of `talon-core` in isolation).
pub static NO_SCHEDULER_TASK_ID: AtomicU32 = AtomicU32::new(u32::MAX);

/// Installs the scheduler's blocking hooks.
///
/// # Safety
///
/// Must be called exactly once, before any code calls
/// [`block_current`]/[`wake`]/[`current_task`], and the supplied
/// functions must satisfy the contracts documented on [`BlockFn`],
/// [`WakeFn`], and [`CurrentTaskFn`].
pub unsafe fn install(block: BlockFn, wake: WakeFn, current: CurrentTaskFn) {
    BLOCK_FN.store(block as *mut (), Ordering::Release);
    WAKE_FN.store(wake as *mut (), Ordering::Release);
    CURRENT_FN.store(current as *mut (), Ordering::Release);
}

/// Blocks the calling task until woken.
pub fn block_current() {
    // SAFETY: only ever stores a valid `BlockFn` via `install`.
    let f: BlockFn = unsafe { core::mem::transmute(BLOCK_FN.load(Ordering::Acquire)) };
    f();
}

/// Wakes the task identified by `task_id`.
pub fn wake(task_id: u32) {
    // SAFETY: only ever stores a valid `WakeFn` via `install`.
    let f: WakeFn = unsafe { core::mem::transmute(WAKE_FN.load(Ordering::Acquire)) };
    f(task_id);
}

/// Returns the currently running task's id.
pub fn current_task() -> u32 {
    // SAFETY: only ever stores a valid `CurrentTaskFn` via `install`.
    let f: CurrentTaskFn = unsafe { core::mem::transmute(CURRENT_FN.load(Ordering::Acquire)) };
    f()
}
