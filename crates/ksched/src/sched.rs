//! The dispatcher: owns every live task, composes the MLFQ and Fair
//! run-queue classes, drives the tick, and implements process lifecycle
//! (spec §3, §4.E).
//!
//! Picking the next task to run never itself performs a context switch
//! — that is arch-specific machinery the kernel binary supplies.
//! Everything here is the policy half: who runs next, and the
//! bookkeeping around fork/exit/wait.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use talon_core::addr::PhysAddr;
use talon_core::error::{KError, Result};
use talon_core::sched_hooks;
use talon_core::sync::SpinLock;
use talon_fs::file::MAX_FILES;
use talon_fs::path::LookupResult;

use crate::fair::Fair;
use crate::hrtimer::HrtimerQueue;
use crate::mlfq::Mlfq;
use crate::sleep::SleepQueue;
use crate::task::{alloc_pid, Pid, SchedPolicy, Task, TaskState, INIT_PID};

/// Every live task plus both run-queue classes and the timer lists that
/// feed the tick handler.
pub struct Scheduler {
    tasks: SpinLock<BTreeMap<u32, Arc<Task>>>,
    current: AtomicU32,
    mlfq: Mlfq,
    fair: Fair,
    sleep: SleepQueue,
    hrtimer: HrtimerQueue,
    ticks: AtomicU64,
}

impl Scheduler {
    /// Creates an empty scheduler with no tasks and no task current.
    pub fn new() -> Self {
        Self {
            tasks: SpinLock::new(BTreeMap::new()),
            current: AtomicU32::new(0),
            mlfq: Mlfq::new(),
            fair: Fair::new(),
            sleep: SleepQueue::new(),
            hrtimer: HrtimerQueue::new(),
            ticks: AtomicU64::new(0),
        }
    }

    /// Creates a fresh kernel task (no parent process beyond `init`) and
    /// enqueues it Ready.
    pub fn create_kernel_task(
        &self,
        policy: SchedPolicy,
        kernel_stack_top: u64,
        page_table_root: PhysAddr,
        cwd: LookupResult,
    ) -> Arc<Task> {
        let pid = alloc_pid();
        let task = Task::new(pid, INIT_PID, policy, kernel_stack_top, page_table_root, cwd);
        self.tasks.lock().insert(pid.0, task.clone());
        self.enqueue(task.clone());
        task
    }

    /// Registers `parent`'s pid as the session/process-group leader for
    /// the table (used for the very first task at boot, which has no
    /// prior parent to inherit from).
    pub fn register(&self, task: Arc<Task>) {
        self.tasks.lock().insert(task.pid.0, task);
    }

    /// `fork()`: deep-copies `parent` into a new task with a fresh pid
    /// and kernel stack, inserts it into the table, and enqueues it
    /// Ready. The caller is responsible for giving the child its own
    /// copy-on-write address space (spec §4.B); `page_table_root` is
    /// copied verbatim until then.
    pub fn fork(&self, parent: &Arc<Task>, child_kernel_stack_top: u64) -> Arc<Task> {
        let child_pid = alloc_pid();
        let child = parent.fork(child_pid, child_kernel_stack_top);
        self.tasks.lock().insert(child_pid.0, child.clone());
        self.enqueue(child.clone());
        child
    }

    /// `exit(code)`: closes every open fd, reparents children onto
    /// `init`, marks the task Terminated, and wakes its parent's
    /// `wait()`. The task's slot in the table is retained until the
    /// parent reaps it.
    pub fn exit(&self, pid: Pid, code: u32) {
        let Some(task) = self.tasks.lock().get(&pid.0).cloned() else {
            return;
        };

        {
            let mut files = task.files.lock();
            for fd in 0..MAX_FILES {
                let _ = files.close(fd);
            }
        }

        let orphans = core::mem::take(&mut *task.children.lock());
        if !orphans.is_empty() {
            let tasks = self.tasks.lock();
            if let Some(init_task) = tasks.get(&INIT_PID.0).cloned() {
                let mut init_children = init_task.children.lock();
                for child_pid in &orphans {
                    if let Some(child) = tasks.get(&child_pid.0) {
                        *child.ppid.lock() = INIT_PID;
                    }
                    init_children.push(*child_pid);
                }
            }
        }

        task.exit_code.store(code, Ordering::Relaxed);
        task.set_state(TaskState::Terminated);

        let ppid = *task.ppid.lock();
        if let Some(parent) = self.tasks.lock().get(&ppid.0).cloned() {
            parent.wait_queue.wake_all();
        }
    }

    /// `wait()`: blocks until `target` (or any child, if `None`) has
    /// exited, removes it from the table, and returns its pid and exit
    /// code.
    ///
    /// Fails with [`KError::NoEnt`] if `target` is not one of `parent`'s
    /// children, or `parent` has no children at all.
    pub fn wait(&self, parent: &Arc<Task>, target: Option<Pid>) -> Result<(Pid, u32)> {
        match target {
            Some(pid) if !parent.children.lock().contains(&pid) => return Err(KError::NoEnt),
            None if parent.children.lock().is_empty() => return Err(KError::NoEnt),
            _ => {}
        }
        loop {
            if let Some(reaped) = self.reap_terminated_child(parent, target) {
                return Ok(reaped);
            }
            parent.wait_queue.wait();
        }
    }

    fn reap_terminated_child(&self, parent: &Arc<Task>, target: Option<Pid>) -> Option<(Pid, u32)> {
        let candidates = parent.children.lock().clone();
        let mut tasks = self.tasks.lock();
        for child_pid in candidates {
            if let Some(want) = target {
                if child_pid != want {
                    continue;
                }
            }
            let Some(child) = tasks.get(&child_pid.0) else {
                continue;
            };
            if child.state() != TaskState::Terminated {
                continue;
            }
            let code = child.exit_code.load(Ordering::Relaxed);
            tasks.remove(&child_pid.0);
            drop(tasks);
            parent.children.lock().retain(|p| *p != child_pid);
            return Some((child_pid, code));
        }
        None
    }

    /// Routes `task` into whichever run-queue class its policy maps to
    /// and marks it Ready.
    pub fn enqueue(&self, task: Arc<Task>) {
        task.set_state(TaskState::Ready);
        match task.policy {
            SchedPolicy::Other | SchedPolicy::Fifo => self.mlfq.enqueue(task),
            SchedPolicy::Cfs => self.fair.enqueue(task),
        }
    }

    /// Picks the next task to run: MLFQ (including `Fifo` tasks, which
    /// share its queues but are never demoted) is consulted first, Fair
    /// second. Returns `None` if nothing is ready — the caller should
    /// idle (`sti; hlt`).
    pub fn pick_next(&self) -> Option<Arc<Task>> {
        self.mlfq.pick_next().or_else(|| self.fair.pick_next())
    }

    /// Whether any task is runnable.
    pub fn has_ready(&self) -> bool {
        self.mlfq.has_ready() || self.fair.has_ready()
    }

    /// The task currently marked current, if any.
    pub fn current_task(&self) -> Option<Arc<Task>> {
        let pid = self.current.load(Ordering::Relaxed);
        if pid == 0 {
            None
        } else {
            self.tasks.lock().get(&pid).cloned()
        }
    }

    /// Marks `pid` as the running task. Called by the dispatcher after
    /// `pick_next` and the arch layer's context switch.
    pub fn set_current(&self, pid: Pid) {
        self.current.store(pid.0, Ordering::Relaxed);
    }

    /// Looks up a live task by pid.
    pub fn task(&self, pid: Pid) -> Option<Arc<Task>> {
        self.tasks.lock().get(&pid.0).cloned()
    }

    /// Every live task except `caller` (`kill(-1, sig)`, spec §4.J).
    pub fn all_except(&self, caller: Pid) -> Vec<Arc<Task>> {
        self.tasks
            .lock()
            .values()
            .filter(|t| t.pid != caller)
            .cloned()
            .collect()
    }

    /// Every live task in process group `pgid` (`kill(0, sig)` and
    /// `kill(-pgid, sig)`, spec §4.J).
    pub fn by_group(&self, pgid: Pid) -> Vec<Arc<Task>> {
        self.tasks
            .lock()
            .values()
            .filter(|t| *t.pgid.lock() == pgid)
            .cloned()
            .collect()
    }

    /// Parks the calling context until `wake_tick`.
    pub fn sleep_until(&self, pid: Pid, wake_tick: u64) {
        self.sleep.sleep_until(pid, wake_tick);
    }

    /// Arms a one-shot callback at `expires_ns`.
    pub fn hrtimer_start(&self, expires_ns: u64, callback: crate::hrtimer::Callback) {
        self.hrtimer.hrtimer_start(expires_ns, callback);
    }

    /// Runs one tick: fires due hrtimers, wakes expired sleepers, and
    /// ticks the current task's scheduling class. Returns whether the
    /// dispatcher should run again before returning to userspace (the
    /// current task's MLFQ quantum expired, or a higher-priority task
    /// just became ready).
    pub fn scheduler_tick(&self, now_ns: u64) -> bool {
        self.hrtimer.hrtimer_run_queues(now_ns);

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        for pid in self.sleep.wake_expired(tick) {
            if let Some(task) = self.tasks.lock().get(&pid.0).cloned() {
                if task.state() == TaskState::Sleeping {
                    self.enqueue(task);
                }
            }
        }

        let Some(current) = self.current_task() else {
            return self.has_ready();
        };
        match current.policy {
            SchedPolicy::Fifo => false,
            SchedPolicy::Other => {
                self.mlfq.task_tick(&current);
                self.mlfq.slice_exhausted(&current)
            }
            SchedPolicy::Cfs => {
                self.fair.task_tick(&current);
                self.fair.has_ready()
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Global scheduler instance, initialized once at boot.
pub static SCHEDULER: SpinLock<Option<Scheduler>> = SpinLock::named("scheduler", None);

/// Initializes the global scheduler and wires `talon_core::sched_hooks`
/// so `WaitQueue`/`Mutex` block and wake real tasks through it.
///
/// # Panics
///
/// Panics if called more than once.
pub fn init() {
    let mut scheduler = SCHEDULER.lock();
    assert!(scheduler.is_none(), "scheduler already initialized");
    *scheduler = Some(Scheduler::new());
    drop(scheduler);
    // SAFETY: called once, here, before any task can block or wake.
    unsafe { sched_hooks::install(block_hook, wake_hook, current_hook) };
}

/// Runs `f` with a reference to the global scheduler.
///
/// # Panics
///
/// Panics if the scheduler has not been initialized.
pub fn with_scheduler<R>(f: impl FnOnce(&Scheduler) -> R) -> R {
    let scheduler = SCHEDULER.lock();
    f(scheduler.as_ref().expect("scheduler not initialized"))
}

fn block_hook() {
    with_scheduler(|s| {
        if let Some(task) = s.current_task() {
            task.set_state(TaskState::Blocked);
        }
    });
}

fn wake_hook(task_id: u32) {
    with_scheduler(|s| {
        if let Some(task) = s.task(Pid(task_id)) {
            if task.state() == TaskState::Blocked {
                s.enqueue(task);
            }
        }
    });
}

fn current_hook() -> u32 {
    with_scheduler(|s| s.current.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::MLFQ_QUANTA;
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
    fn pick_next_prefers_mlfq_over_fair() {
        let s = Scheduler::new();
        let mlfq = s.create_kernel_task(SchedPolicy::Other, 0x1000, PhysAddr::new(0), root_lookup());
        let fair = s.create_kernel_task(SchedPolicy::Cfs, 0x2000, PhysAddr::new(0), root_lookup());
        let picked = s.pick_next().unwrap();
        assert_eq!(picked.pid, mlfq.pid);
        let picked = s.pick_next().unwrap();
        assert_eq!(picked.pid, fair.pid);
    }

    #[test]
    fn fork_registers_child_and_enqueues_it() {
        let s = Scheduler::new();
        let parent = s.create_kernel_task(SchedPolicy::Cfs, 0x1000, PhysAddr::new(0), root_lookup());
        s.set_current(parent.pid);
        let child = s.fork(&parent, 0x3000);
        assert_eq!(s.task(child.pid).unwrap().pid, child.pid);
        assert_eq!(s.pick_next().unwrap().pid, parent.pid);
        assert_eq!(s.pick_next().unwrap().pid, child.pid);
    }

    #[test]
    fn exit_then_wait_harvests_exit_code() {
        let s = Scheduler::new();
        let parent = s.create_kernel_task(SchedPolicy::Cfs, 0x1000, PhysAddr::new(0), root_lookup());
        s.set_current(parent.pid);
        let child = s.fork(&parent, 0x3000);

        s.exit(child.pid, 7);
        assert_eq!(child.state(), TaskState::Terminated);

        let (pid, code) = s.wait(&parent, Some(child.pid)).unwrap();
        assert_eq!(pid, child.pid);
        assert_eq!(code, 7);
        assert!(s.task(child.pid).is_none());
    }

    #[test]
    fn wait_with_no_children_is_noent() {
        let s = Scheduler::new();
        let parent = s.create_kernel_task(SchedPolicy::Cfs, 0x1000, PhysAddr::new(0), root_lookup());
        assert_eq!(s.wait(&parent, None).unwrap_err(), KError::NoEnt);
    }

    #[test]
    fn exit_reparents_orphans_to_init() {
        let s = Scheduler::new();
        let init_task = Task::new(
            INIT_PID,
            INIT_PID,
            SchedPolicy::Cfs,
            0,
            PhysAddr::new(0),
            root_lookup(),
        );
        s.register(init_task.clone());

        let parent = s.create_kernel_task(SchedPolicy::Cfs, 0x1000, PhysAddr::new(0), root_lookup());
        s.set_current(parent.pid);
        let child = s.fork(&parent, 0x3000);

        s.exit(parent.pid, 0);

        assert_eq!(*child.ppid.lock(), INIT_PID);
        assert!(init_task.children.lock().contains(&child.pid));
    }

    #[test]
    fn scheduler_tick_demotes_mlfq_task_and_reports_exhaustion() {
        let s = Scheduler::new();
        let task = s.create_kernel_task(SchedPolicy::Other, 0x1000, PhysAddr::new(0), root_lookup());
        s.set_current(task.pid);

        let mut exhausted = false;
        for _ in 0..MLFQ_QUANTA[0] {
            exhausted = s.scheduler_tick(0);
        }
        assert!(exhausted);
        assert_eq!(task.priority(), 1);
    }

    #[test]
    fn scheduler_tick_never_preempts_fifo() {
        let s = Scheduler::new();
        let task = s.create_kernel_task(SchedPolicy::Fifo, 0x1000, PhysAddr::new(0), root_lookup());
        s.set_current(task.pid);
        for _ in 0..100 {
            assert!(!s.scheduler_tick(0));
        }
        assert_eq!(task.priority(), 0);
    }

    #[test]
    fn all_except_excludes_only_the_caller() {
        let s = Scheduler::new();
        let a = s.create_kernel_task(SchedPolicy::Cfs, 0x1000, PhysAddr::new(0), root_lookup());
        let b = s.create_kernel_task(SchedPolicy::Cfs, 0x2000, PhysAddr::new(0), root_lookup());
        let others: alloc::vec::Vec<_> = s.all_except(a.pid).iter().map(|t| t.pid).collect();
        assert!(others.contains(&b.pid));
        assert!(!others.contains(&a.pid));
    }

    #[test]
    fn by_group_returns_only_matching_pgid() {
        let s = Scheduler::new();
        let a = s.create_kernel_task(SchedPolicy::Cfs, 0x1000, PhysAddr::new(0), root_lookup());
        let b = s.create_kernel_task(SchedPolicy::Cfs, 0x2000, PhysAddr::new(0), root_lookup());
        *b.pgid.lock() = *a.pgid.lock();
        let group: alloc::vec::Vec<_> = s.by_group(*a.pgid.lock()).iter().map(|t| t.pid).collect();
        assert!(group.contains(&a.pid));
        assert!(group.contains(&b.pid));
    }

    #[test]
    fn blocking_hooks_round_trip_through_global_scheduler() {
        init();
        with_scheduler(|s| {
            let task = s.create_kernel_task(SchedPolicy::Other, 0x1000, PhysAddr::new(0), root_lookup());
            s.pick_next();
            s.set_current(task.pid);
        });
        let pid = current_hook();
        block_hook();
        with_scheduler(|s| {
            assert_eq!(s.task(Pid(pid)).unwrap().state(), TaskState::Blocked);
        });
        wake_hook(pid);
        with_scheduler(|s| {
            assert_eq!(s.task(Pid(pid)).unwrap().state(), TaskState::Ready);
        });
    }
}
