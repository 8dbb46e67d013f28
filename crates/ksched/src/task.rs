//! The task/process control block (spec §3) and its identifiers.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use talon_core::addr::PhysAddr;
use talon_core::sync::SpinLock;
use talon_fs::file::FileDescriptorTable;
use talon_fs::path::LookupResult;

/// Process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Pid(pub u32);

/// The kernel's own task, created at boot before any `fork`.
pub const INIT_PID: Pid = Pid(1);

static NEXT_PID: AtomicU32 = AtomicU32::new(2);

/// Allocates a fresh, never-reused pid.
pub fn alloc_pid() -> Pid {
    Pid(NEXT_PID.fetch_add(1, Ordering::Relaxed))
}

/// A task's run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Currently executing on the CPU.
    Running,
    /// Runnable, waiting in a scheduler class's queue.
    Ready,
    /// Waiting for a timer or event, off the run queue, resumable by a
    /// tick or explicit wake.
    Sleeping,
    /// Waiting on a resource (wait queue, child exit), resumable only by
    /// an explicit wake.
    Blocked,
    /// Exited; the slot is retained until the parent reaps it.
    Terminated,
}

/// Which scheduler class owns a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// MLFQ: demoted on slice exhaustion.
    Other,
    /// Fixed priority, never preempted by the tick. Shares the MLFQ
    /// queues but is never demoted.
    Fifo,
    /// CFS/Fair: vruntime-ordered, never demoted.
    Cfs,
}

/// Per-level MLFQ quanta, in ticks (spec §4.E).
pub const MLFQ_QUANTA: [u32; 4] = [2, 5, 10, 20];
/// Number of MLFQ priority levels.
pub const MLFQ_LEVELS: usize = MLFQ_QUANTA.len();

/// One entry of a task's resource-limit vector (`RLIMIT`-style).
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimit {
    /// Currently enforced (soft) limit.
    pub current: u64,
    /// Ceiling the task may raise `current` to.
    pub max: u64,
}

/// Sentinel for an unbounded resource limit.
pub const RLIM_INFINITY: u64 = u64::MAX;

impl ResourceLimit {
    /// A limit with no bound.
    pub const fn infinite() -> Self {
        Self {
            current: RLIM_INFINITY,
            max: RLIM_INFINITY,
        }
    }
}

/// Index into a task's resource-limit vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Resource {
    /// Max open file descriptors (mirrors `talon_fs::file::MAX_FILES`).
    NoFile = 0,
    /// Max process address-space size, in bytes.
    As = 1,
}

/// Count of tracked resources, sizing [`Task::rlimits`].
pub const RESOURCE_COUNT: usize = 2;

/// A register snapshot saved/restored across traps, interrupts, and
/// `fork`/`sigreturn`. Field layout mirrors the x86-64 trap frame the
/// arch-specific entry stubs construct; modeled here as plain data so
/// the scheduler's bookkeeping is host-testable independent of arch
/// code.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct TrapFrame {
    /// General-purpose registers, in SysV order (rax first).
    pub rax: u64,
    /// See `rax`.
    pub rbx: u64,
    /// See `rax`.
    pub rcx: u64,
    /// See `rax`.
    pub rdx: u64,
    /// See `rax`.
    pub rsi: u64,
    /// See `rax`.
    pub rdi: u64,
    /// See `rax`.
    pub rbp: u64,
    /// See `rax`.
    pub r8: u64,
    /// See `rax`.
    pub r9: u64,
    /// See `rax`.
    pub r10: u64,
    /// See `rax`.
    pub r11: u64,
    /// See `rax`.
    pub r12: u64,
    /// See `rax`.
    pub r13: u64,
    /// See `rax`.
    pub r14: u64,
    /// See `rax`.
    pub r15: u64,
    /// Faulting/returning instruction pointer.
    pub rip: u64,
    /// Code segment selector.
    pub cs: u64,
    /// CPU flags register.
    pub rflags: u64,
    /// Stack pointer at the time of the trap.
    pub rsp: u64,
    /// Stack segment selector.
    pub ss: u64,
}

/// A task/process control block (spec §3).
pub struct Task {
    /// Process identifier.
    pub pid: Pid,
    /// Parent's pid. `init` reparents orphans onto `INIT_PID`.
    pub ppid: SpinLock<Pid>,
    /// Session id (the session leader's pid).
    pub sid: Pid,
    /// Process group id.
    pub pgid: SpinLock<Pid>,

    /// Run state.
    pub state: SpinLock<TaskState>,

    /// Scheduling class.
    pub policy: SchedPolicy,
    /// MLFQ priority level, `0..MLFQ_LEVELS`. Unused by `Other`.
    pub priority: AtomicU32,
    /// Ticks remaining in the current quantum (MLFQ).
    pub time_slice: AtomicU32,
    /// Accumulated virtual runtime (Fair class).
    pub vruntime: AtomicU64,

    /// Top of the kernel-mode stack, for reloading `rsp0` on context
    /// switch back into this task.
    pub kernel_stack_top: AtomicU64,
    /// Saved kernel stack pointer while not Running.
    pub saved_rsp: SpinLock<u64>,
    /// Saved user-mode register state, restored on return to userspace.
    pub trap_frame: SpinLock<TrapFrame>,
    /// Root of this task's page tables.
    pub page_table_root: PhysAddr,

    /// Current working directory.
    pub cwd: SpinLock<LookupResult>,
    /// Open file descriptors.
    pub files: SpinLock<FileDescriptorTable>,

    /// Bitmask of pending, undelivered signals (bits 1..31).
    pub pending_signals: AtomicU32,
    /// Per-signal disposition: `0` terminates, `1` ignores, anything
    /// else is a user handler address.
    pub signal_handlers: SpinLock<[u64; 32]>,
    /// Locks currently held by this task, for priority inheritance.
    pub held_locks: SpinLock<Vec<u64>>,

    /// Per-resource soft/hard limits.
    pub rlimits: SpinLock<[ResourceLimit; RESOURCE_COUNT]>,

    /// Children not yet reaped, weak so a child's drop doesn't need the
    /// parent to reach back.
    pub children: SpinLock<Vec<Pid>>,
    /// Exit code, valid once `state == Terminated`.
    pub exit_code: AtomicU32,
    /// Woken when this task terminates, so `wait()` can block on it.
    pub wait_queue: talon_core::sync::WaitQueue,
}

impl Task {
    /// Builds a brand-new task with no parent, an empty fd table, and a
    /// fresh kernel stack already installed at `kernel_stack_top`.
    pub fn new(
        pid: Pid,
        ppid: Pid,
        policy: SchedPolicy,
        kernel_stack_top: u64,
        page_table_root: PhysAddr,
        cwd: LookupResult,
    ) -> Arc<Self> {
        Arc::new(Self {
            pid,
            ppid: SpinLock::new(ppid),
            sid: pid,
            pgid: SpinLock::new(pid),
            state: SpinLock::new(TaskState::Ready),
            policy,
            priority: AtomicU32::new(0),
            time_slice: AtomicU32::new(MLFQ_QUANTA[0]),
            vruntime: AtomicU64::new(0),
            kernel_stack_top: AtomicU64::new(kernel_stack_top),
            saved_rsp: SpinLock::new(kernel_stack_top),
            trap_frame: SpinLock::new(TrapFrame::default()),
            page_table_root,
            cwd: SpinLock::new(cwd),
            files: SpinLock::new(FileDescriptorTable::new()),
            pending_signals: AtomicU32::new(0),
            signal_handlers: SpinLock::new([0; 32]),
            held_locks: SpinLock::new(Vec::new()),
            rlimits: SpinLock::new([ResourceLimit::infinite(); RESOURCE_COUNT]),
            children: SpinLock::new(Vec::new()),
            exit_code: AtomicU32::new(0),
            wait_queue: talon_core::sync::WaitQueue::new(),
        })
    }

    /// Current run state.
    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Sets the run state.
    pub fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    /// Current MLFQ priority level.
    pub fn priority(&self) -> usize {
        self.priority.load(Ordering::Relaxed) as usize
    }

    /// Deep-copies this task's state into a fresh child with its own
    /// pid, kernel stack, and page-table root; the caller installs the
    /// new page-table root after copying the address space (spec §4.B).
    /// The child's `rax` is zeroed so it observes `fork()` returning 0.
    pub fn fork(self: &Arc<Self>, child_pid: Pid, child_kernel_stack_top: u64) -> Arc<Self> {
        let mut child_frame = *self.trap_frame.lock();
        child_frame.rax = 0;

        let child = Arc::new(Self {
            pid: child_pid,
            ppid: SpinLock::new(self.pid),
            sid: self.sid,
            pgid: SpinLock::new(*self.pgid.lock()),
            state: SpinLock::new(TaskState::Ready),
            policy: self.policy,
            priority: AtomicU32::new(self.priority.load(Ordering::Relaxed)),
            time_slice: AtomicU32::new(MLFQ_QUANTA[self.priority()]),
            vruntime: AtomicU64::new(self.vruntime.load(Ordering::Relaxed)),
            kernel_stack_top: AtomicU64::new(child_kernel_stack_top),
            saved_rsp: SpinLock::new(child_kernel_stack_top),
            trap_frame: SpinLock::new(child_frame),
            page_table_root: self.page_table_root,
            cwd: SpinLock::new(self.cwd.lock().clone()),
            files: SpinLock::new(FileDescriptorTable::new()),
            pending_signals: AtomicU32::new(0),
            signal_handlers: SpinLock::new(*self.signal_handlers.lock()),
            held_locks: SpinLock::new(Vec::new()),
            rlimits: SpinLock::new(*self.rlimits.lock()),
            children: SpinLock::new(Vec::new()),
            exit_code: AtomicU32::new(0),
            wait_queue: talon_core::sync::WaitQueue::new(),
        });
        self.children.lock().push(child_pid);
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use talon_fs::dentry::Dentry;
    use talon_fs::mount::MountTable;
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

    #[test]
    fn new_task_starts_ready_at_level_zero() {
        let t = Task::new(
            alloc_pid(),
            INIT_PID,
            SchedPolicy::Cfs,
            0x1000,
            PhysAddr::new(0),
            root_lookup(),
        );
        assert_eq!(t.state(), TaskState::Ready);
        assert_eq!(t.priority(), 0);
        assert_eq!(t.time_slice.load(Ordering::Relaxed), MLFQ_QUANTA[0]);
    }

    #[test]
    fn fork_zeroes_child_rax_and_registers_child() {
        let parent = Task::new(
            alloc_pid(),
            INIT_PID,
            SchedPolicy::Cfs,
            0x1000,
            PhysAddr::new(0),
            root_lookup(),
        );
        parent.trap_frame.lock().rax = 42;
        parent.priority.store(2, Ordering::Relaxed);

        let child_pid = alloc_pid();
        let child = parent.fork(child_pid, 0x2000);

        assert_eq!(child.trap_frame.lock().rax, 0);
        assert_eq!(*child.ppid.lock(), parent.pid);
        assert_eq!(child.priority(), 2);
        assert_eq!(parent.children.lock().as_slice(), &[child_pid]);
    }

    #[test]
    fn alloc_pid_never_repeats() {
        let a = alloc_pid();
        let b = alloc_pid();
        assert_ne!(a, b);
    }
}
