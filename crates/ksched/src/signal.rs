//! Signal delivery: pending bitmask, dispositions, and the sigframe
//! trampoline protocol (spec §4.J).

extern crate alloc;

use core::mem::size_of;
use core::sync::atomic::Ordering;

use talon_core::error::{KError, Result};

use crate::task::{Task, TrapFrame};

/// Disposition stored in a task's handler vector for signal `0`: kill
/// the task with exit code `128 + sig`.
pub const SIG_DFL_TERMINATE: u64 = 0;
/// Disposition meaning "drop the signal".
pub const SIG_IGN: u64 = 1;

/// Lowest and highest valid signal numbers (bit 0 is unused; signals
/// are numbered 1..31, per the pending-bitmask layout in spec §4.J).
pub const SIG_MIN: u32 = 1;
/// See [`SIG_MIN`].
pub const SIG_MAX: u32 = 31;

/// Access to a task's user address space, abstracting over how the
/// kernel actually reaches user pages (copy-on-page-fault, HHDM
/// mapping, ...) so this module stays host-testable.
pub trait UserMemory {
    /// Copies `bytes` to `addr` in the target user address space.
    fn write(&self, addr: u64, bytes: &[u8]) -> Result<()>;
    /// Copies `len` bytes starting at `addr` into a fresh buffer.
    fn read(&self, addr: u64, len: usize) -> Result<alloc::vec::Vec<u8>>;
}

/// Machine code for the sigreturn trampoline: loads the `sigreturn`
/// syscall number and traps. Planted on the user stack below the saved
/// frame so a handler's `ret` lands here.
pub const SIGRETURN_TRAMPOLINE: [u8; 7] = [
    0x48, 0xc7, 0xc0, 0x00, 0x00, 0x00, 0x00, // mov rax, <patched below>
];

/// The syscall number `handle_pending_signals` plants into the
/// trampoline bytes (spec §6: recognized syscall numbers do not
/// reserve one explicitly for `sigreturn`; this implementation assigns
/// the first number past the documented range).
pub const SIGRETURN_SYSCALL_NR: u32 = 21;

fn trampoline_bytes() -> [u8; 7] {
    let mut bytes = SIGRETURN_TRAMPOLINE;
    bytes[3..7].copy_from_slice(&SIGRETURN_SYSCALL_NR.to_le_bytes());
    bytes
}

/// Sets the bit for `sig` on `task`'s pending mask.
///
/// # Panics
///
/// Panics if `sig` is outside `SIG_MIN..=SIG_MAX`.
fn raise(task: &Task, sig: u32) {
    assert!((SIG_MIN..=SIG_MAX).contains(&sig), "signal out of range");
    task.pending_signals.fetch_or(1 << sig, Ordering::Relaxed);
}

/// A process-table lookup used by [`kill`] to resolve pid/pgid targets
/// without this module depending on the scheduler's global state.
pub trait ProcessDirectory {
    /// All tasks with pid greater than 1 (used by `pid == -1`).
    fn all_except(&self, caller: &Task) -> alloc::vec::Vec<alloc::sync::Arc<Task>>;
    /// All tasks in the given process group.
    fn by_group(&self, pgid: u32) -> alloc::vec::Vec<alloc::sync::Arc<Task>>;
    /// The single task with the given pid, if live.
    fn by_pid(&self, pid: u32) -> Option<alloc::sync::Arc<Task>>;
}

/// Implements `kill(pid, sig)` pid-targeting semantics (spec §4.J).
pub fn kill(directory: &dyn ProcessDirectory, caller: &Task, pid: i64, sig: u32) -> Result<()> {
    if !(SIG_MIN as i64..=SIG_MAX as i64).contains(&(sig as i64)) {
        return Err(KError::Inval);
    }
    if pid > 0 {
        let target = directory.by_pid(pid as u32).ok_or(KError::NoEnt)?;
        raise(&target, sig);
        target.wait_queue.wake_all();
    } else if pid == -1 {
        for task in directory.all_except(caller) {
            raise(&task, sig);
        }
    } else if pid == 0 {
        let pgid = *caller.pgid.lock();
        for task in directory.by_group(pgid.0) {
            raise(&task, sig);
        }
    } else {
        for task in directory.by_group((-pid) as u32) {
            raise(&task, sig);
        }
    }
    Ok(())
}

/// What `handle_pending_signals` decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// The task should be terminated with this exit code.
    Terminate(u32),
    /// A handler was delivered; `frame` was rewritten in place.
    Delivered(u32),
}

/// Walks `task`'s pending bitmask low-to-high, handling at most one
/// signal per call (spec §4.J): the caller re-invokes this at the next
/// safe point if more bits remain.
pub fn handle_pending_signals(
    task: &Task,
    frame: &mut TrapFrame,
    user_stack_top: u64,
    mem: &dyn UserMemory,
) -> Result<Option<SignalOutcome>> {
    let pending = task.pending_signals.load(Ordering::Relaxed);
    for sig in SIG_MIN..=SIG_MAX {
        if pending & (1 << sig) == 0 {
            continue;
        }
        task.pending_signals
            .fetch_and(!(1 << sig), Ordering::Relaxed);

        let handler = task.signal_handlers.lock()[sig as usize];
        return match handler {
            SIG_DFL_TERMINATE => Ok(Some(SignalOutcome::Terminate(128 + sig))),
            SIG_IGN => Ok(None),
            handler_addr => {
                deliver(frame, user_stack_top, mem, sig, handler_addr)?;
                Ok(Some(SignalOutcome::Delivered(sig)))
            }
        };
    }
    Ok(None)
}

/// Builds the sigframe: saves `*frame` below the user stack top, plants
/// the sigreturn trampoline below that, and rewrites `*frame` so
/// execution resumes in the handler with `sig` as its first argument
/// and the trampoline as its return address.
fn deliver(
    frame: &mut TrapFrame,
    user_stack_top: u64,
    mem: &dyn UserMemory,
    sig: u32,
    handler_addr: u64,
) -> Result<()> {
    let saved_frame_size = size_of::<TrapFrame>() as u64;
    let saved_frame_addr = (user_stack_top - saved_frame_size) & !0xf;
    // SAFETY-irrelevant: `TrapFrame` is `repr(C)` plain data.
    let frame_bytes = unsafe {
        core::slice::from_raw_parts(frame as *const TrapFrame as *const u8, saved_frame_size as usize)
    };
    mem.write(saved_frame_addr, frame_bytes)?;

    let trampoline = trampoline_bytes();
    let trampoline_addr = saved_frame_addr - trampoline.len() as u64;
    mem.write(trampoline_addr, &trampoline)?;

    let return_addr_slot = trampoline_addr - 8;
    mem.write(return_addr_slot, &trampoline_addr.to_le_bytes())?;

    frame.rsp = return_addr_slot;
    frame.rip = handler_addr;
    frame.rdi = sig as u64;
    Ok(())
}

/// `sigreturn`: restores `*frame` from the sigframe previously planted
/// by [`deliver`], given the stack pointer the trampoline trapped with
/// (one past the saved return-address slot).
pub fn sigreturn(frame: &mut TrapFrame, trampoline_rsp: u64, mem: &dyn UserMemory) -> Result<()> {
    let saved_frame_size = size_of::<TrapFrame>();
    // The trampoline's own return address slot sits at `trampoline_rsp`;
    // the saved frame was planted just above the trampoline bytes.
    let trampoline_addr_bytes = mem.read(trampoline_rsp, 8)?;
    let trampoline_addr = u64::from_le_bytes(trampoline_addr_bytes.try_into().map_err(|_| KError::Inval)?);
    let saved_frame_addr = trampoline_addr + SIGRETURN_TRAMPOLINE.len() as u64;
    let bytes = mem.read(saved_frame_addr, saved_frame_size)?;
    if bytes.len() != saved_frame_size {
        return Err(KError::Inval);
    }
    // SAFETY: `TrapFrame` is `repr(C)` plain data and `bytes` holds
    // exactly `size_of::<TrapFrame>()` bytes written by `deliver`.
    *frame = unsafe { core::ptr::read(bytes.as_ptr() as *const TrapFrame) };
    Ok(())
}
