//! Syscall dispatch table (spec §6).
//!
//! One [`KernelContext`] holds every subsystem singleton this kernel
//! needs past boot (dcache, mount table, message/shared-memory
//! namespaces) instead of scattering them across module-level statics —
//! the scheduler and the MM singletons still follow the `static
//! SpinLock<Option<T>>` pattern since they're needed from interrupt
//! and arch glue that has no natural path to a `KernelContext`
//! reference, but everything reachable only from a syscall hangs off
//! this one value (design note §9).

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;

use talon_core::error::{KError, Result};
use talon_fs::dentry::DentryCache;
use talon_fs::file::{File, OpenFlags, SeekFrom};
use talon_fs::mount::MountTable;
use talon_fs::path::{self, LookupResult};
use talon_ipc::{MsgQueueTable, SharedMemoryTable};
use talon_sched::task::{Pid, Task, TrapFrame};

/// Syscall numbers recognized by [`dispatch`] (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyscallNumber {
    /// Voluntarily yield the CPU.
    Yield = 0,
    /// Terminate the calling task.
    Exit = 1,
    /// Write a string to the kernel log.
    Print = 2,
    /// Duplicate the calling task.
    Fork = 3,
    /// Replace the calling task's image (unsupported, see `exec`).
    Exec = 4,
    /// Block until a child terminates.
    Wait = 5,
    /// Create a pipe.
    Pipe = 6,
    /// Read from a file descriptor.
    Read = 7,
    /// Write to a file descriptor.
    Write = 8,
    /// Close a file descriptor.
    Close = 9,
    /// Duplicate a file descriptor.
    Dup = 10,
    /// Open (and optionally create) a file.
    Open = 11,
    /// Load a kernel module (unsupported).
    InitModule = 12,
    /// Unload a kernel module (unsupported).
    DeleteModule = 13,
    /// Return the calling task's pid.
    GetPid = 14,
    /// Sleep for a tick count.
    Sleep = 15,
    /// Change the working directory.
    Chdir = 16,
    /// Read back the working directory.
    Getcwd = 17,
    /// Reposition a file descriptor's offset.
    Lseek = 18,
    /// Send a signal to a pid/process group.
    Kill = 19,
    /// Reboot the machine (unsupported outside real hardware).
    Reboot = 20,
    /// Return from a signal handler (not in the external ABI table,
    /// allocated past it so it never collides with a future syscall).
    SigReturn = talon_sched::signal::SIGRETURN_SYSCALL_NR,
}

impl SyscallNumber {
    /// Maps a raw `rax`-style syscall number to its enum value.
    pub fn from_u32(n: u32) -> Result<Self> {
        Ok(match n {
            0 => Self::Yield,
            1 => Self::Exit,
            2 => Self::Print,
            3 => Self::Fork,
            4 => Self::Exec,
            5 => Self::Wait,
            6 => Self::Pipe,
            7 => Self::Read,
            8 => Self::Write,
            9 => Self::Close,
            10 => Self::Dup,
            11 => Self::Open,
            12 => Self::InitModule,
            13 => Self::DeleteModule,
            14 => Self::GetPid,
            15 => Self::Sleep,
            16 => Self::Chdir,
            17 => Self::Getcwd,
            18 => Self::Lseek,
            19 => Self::Kill,
            20 => Self::Reboot,
            talon_sched::signal::SIGRETURN_SYSCALL_NR => Self::SigReturn,
            _ => return Err(KError::NoSys),
        })
    }
}

/// Every subsystem singleton a syscall might touch, besides the
/// scheduler global (owned separately, see the module doc comment).
pub struct KernelContext {
    /// Dentry cache shared by every mount.
    pub dcache: DentryCache,
    /// Mount table.
    pub mounts: MountTable,
    /// Filesystem root, fixed once at boot.
    pub root: LookupResult,
    /// System V message queue namespace.
    pub msgqueues: MsgQueueTable,
    /// System V shared memory namespace.
    pub shm: SharedMemoryTable,
}

impl KernelContext {
    /// Builds a context rooted at `root`, with fresh IPC namespaces.
    pub fn new(dcache: DentryCache, mounts: MountTable, root: LookupResult) -> Self {
        Self {
            dcache,
            mounts,
            root,
            msgqueues: MsgQueueTable::new(),
            shm: SharedMemoryTable::new(),
        }
    }
}

/// Six-register argument list, mirroring `rdi..r9` (spec §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct Args {
    /// `rdi`.
    pub a0: u64,
    /// `rsi`.
    pub a1: u64,
    /// `rdx`.
    pub a2: u64,
    /// `r10` (syscall ABI uses `r10` in place of `rcx`, which the
    /// `syscall` instruction clobbers).
    pub a3: u64,
    /// `r8`.
    pub a4: u64,
    /// `r9`.
    pub a5: u64,
}

/// Reads a NUL-free, length-prefix-free string out of task memory.
///
/// This kernel has no userspace yet, so paths and print buffers are
/// passed as kernel-resident `(ptr, len)` pairs already; a real
/// `copy_from_user` belongs here once user address spaces exist.
fn str_arg(ptr: u64, len: u64) -> Result<String> {
    // SAFETY: `ptr`/`len` describe kernel-resident bytes; see the
    // function's doc comment for the userspace caveat.
    let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) };
    core::str::from_utf8(bytes)
        .map(String::from)
        .map_err(|_| KError::Inval)
}

/// Dispatches one syscall, returning the `rax` convention value: the
/// non-negative result on success, or `errno()` (already negated) on
/// failure.
pub fn dispatch(ctx: &KernelContext, task: &Arc<Task>, number: u32, args: Args) -> i64 {
    match run(ctx, task, number, args) {
        Ok(v) => v,
        Err(e) => e.errno(),
    }
}

fn run(ctx: &KernelContext, task: &Arc<Task>, number: u32, args: Args) -> Result<i64> {
    let number = SyscallNumber::from_u32(number)?;
    match number {
        SyscallNumber::Yield => {
            talon_core::sched_hooks::block_current();
            Ok(0)
        }
        SyscallNumber::GetPid => Ok(task.pid.0 as i64),
        SyscallNumber::Sleep => {
            talon_sched::sched::with_scheduler(|s| {
                s.sleep_until(task.pid, args.a0);
            });
            Ok(0)
        }
        SyscallNumber::Exit => {
            talon_sched::sched::with_scheduler(|s| s.exit(task.pid, args.a0 as u32));
            Ok(0)
        }
        SyscallNumber::Fork => {
            let child = talon_sched::sched::with_scheduler(|s| s.fork(task, args.a0));
            Ok(child.pid.0 as i64)
        }
        SyscallNumber::Wait => {
            let target = if args.a0 == u64::MAX {
                None
            } else {
                Some(Pid(args.a0 as u32))
            };
            let (pid, code) = talon_sched::sched::with_scheduler(|s| s.wait(task, target))?;
            Ok(((pid.0 as i64) << 32) | code as i64)
        }
        SyscallNumber::Kill => {
            talon_sched::signal::kill(&SchedulerDirectory, task, args.a0 as i64, args.a1 as u32)?;
            Ok(0)
        }
        SyscallNumber::Print => {
            let s = str_arg(args.a0, args.a1)?;
            talon_core::kprint!("{}", s);
            Ok(s.len() as i64)
        }
        SyscallNumber::Open => {
            let path_str = str_arg(args.a0, args.a1)?;
            let flags = OpenFlags::from_bits_truncate(args.a2 as u32);
            open(ctx, task, &path_str, flags)
        }
        SyscallNumber::Read => {
            let file = task.files.lock().get(args.a0 as usize)?;
            // SAFETY: `a1`/`a2` describe a kernel-resident buffer; see
            // `str_arg`'s doc comment for the same userspace caveat.
            let buf = unsafe { core::slice::from_raw_parts_mut(args.a1 as *mut u8, args.a2 as usize) };
            Ok(file.read(buf)? as i64)
        }
        SyscallNumber::Write => {
            let file = task.files.lock().get(args.a0 as usize)?;
            // SAFETY: see `Read` above.
            let buf = unsafe { core::slice::from_raw_parts(args.a1 as *const u8, args.a2 as usize) };
            Ok(file.write(buf)? as i64)
        }
        SyscallNumber::Close => {
            task.files.lock().close(args.a0 as usize)?;
            Ok(0)
        }
        SyscallNumber::Dup => Ok(task.files.lock().dup(args.a0 as usize)? as i64),
        SyscallNumber::Lseek => {
            let file = task.files.lock().get(args.a0 as usize)?;
            let whence = match args.a2 {
                0 => SeekFrom::Set(args.a1),
                1 => SeekFrom::Cur(args.a1 as i64),
                2 => SeekFrom::End(args.a1 as i64),
                _ => return Err(KError::Inval),
            };
            Ok(file.lseek(whence)? as i64)
        }
        SyscallNumber::Chdir => {
            let path_str = str_arg(args.a0, args.a1)?;
            let cwd = task.cwd.lock().clone();
            let resolved = path::resolve_path(&ctx.dcache, &ctx.mounts, &ctx.root, &cwd, &path_str)?;
            if resolved
                .dentry
                .inode()
                .map(|i| i.inode_type())
                != Some(talon_fs::inode::InodeType::Directory)
            {
                return Err(KError::NotDir);
            }
            *task.cwd.lock() = resolved;
            Ok(0)
        }
        SyscallNumber::Getcwd => {
            let cwd_path = absolute_path(&task.cwd.lock().dentry);
            let bytes = cwd_path.as_bytes();
            if (args.a1 as usize) < bytes.len() + 1 {
                return Err(KError::Inval);
            }
            // SAFETY: see `Read`/`Write` above; `a0`/`a1` describe a
            // kernel-resident buffer until user address spaces exist.
            let buf = unsafe { core::slice::from_raw_parts_mut(args.a0 as *mut u8, args.a1 as usize) };
            buf[..bytes.len()].copy_from_slice(bytes);
            buf[bytes.len()] = 0;
            Ok(bytes.len() as i64)
        }
        SyscallNumber::Pipe => {
            let pipe = talon_ipc::Pipe::new();
            let read_file = File::new(task.cwd.lock().clone(), pipe_inode(pipe.clone()), OpenFlags::READ_ONLY);
            let write_file = File::new(task.cwd.lock().clone(), pipe_inode(pipe), OpenFlags::WRITE_ONLY);
            let mut files = task.files.lock();
            let rfd = files.install(read_file)?;
            let wfd = files.install(write_file)?;
            Ok(((wfd as i64) << 32) | rfd as i64)
        }
        SyscallNumber::SigReturn => {
            let mut frame = *task.trap_frame.lock();
            talon_sched::signal::sigreturn(&mut frame, args.a0, &TaskMemory(task))?;
            *task.trap_frame.lock() = frame;
            Ok(0)
        }
        SyscallNumber::Exec | SyscallNumber::InitModule | SyscallNumber::DeleteModule | SyscallNumber::Reboot => {
            Err(KError::NoSys)
        }
    }
}

/// Reconstructs an absolute path by walking `dentry`'s parent chain up
/// to the mount root, the same traversal `getcwd(2)` does.
fn absolute_path(dentry: &Arc<talon_fs::dentry::Dentry>) -> String {
    let mut components = alloc::vec::Vec::new();
    let mut current = dentry.clone();
    while let Some(parent) = current.parent() {
        components.push(String::from(current.name()));
        current = parent;
    }
    if components.is_empty() {
        return String::from("/");
    }
    components.reverse();
    let mut path = String::new();
    for component in components {
        path.push('/');
        path.push_str(&component);
    }
    path
}

fn open(ctx: &KernelContext, task: &Arc<Task>, path_str: &str, flags: OpenFlags) -> Result<i64> {
    let cwd = task.cwd.lock().clone();
    let resolved = match path::resolve_path(&ctx.dcache, &ctx.mounts, &ctx.root, &cwd, path_str) {
        Ok(r) => r,
        Err(KError::NoEnt) if flags.contains(OpenFlags::CREATE) => {
            let (parent_path, name) = path::split_parent(path_str);
            let parent = path::resolve_path(&ctx.dcache, &ctx.mounts, &ctx.root, &cwd, &parent_path)?;
            let parent_inode = parent.dentry.inode().ok_or(KError::NotDir)?;
            let inode = parent_inode.ops().create(&name, 0o644)?;
            let dentry = ctx.dcache.alloc_dentry(&parent.dentry, &name);
            ctx.dcache.d_add(&dentry, inode);
            LookupResult {
                mount: parent.mount,
                dentry,
            }
        }
        Err(e) => return Err(e),
    };
    let inode = resolved.dentry.inode().ok_or(KError::NoEnt)?;
    let file = File::new(resolved, inode, flags);
    let fd = task.files.lock().install(file)?;
    Ok(fd as i64)
}

/// `InodeOps` over a [`talon_ipc::Pipe`]: `read_at`/`write_at` ignore
/// the offset `File` threads through (a pipe has no random-access
/// position) and forward straight to the ring buffer.
struct PipeOps(Arc<talon_ipc::Pipe>);

impl talon_fs::inode::InodeOps for PipeOps {
    fn lookup(&self, _name: &str) -> Result<Arc<talon_fs::inode::Inode>> {
        Err(KError::NotDir)
    }
    fn read_at(&self, _offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.0.read(buf)
    }
    fn write_at(&self, _offset: u64, buf: &[u8]) -> Result<usize> {
        self.0.write(buf)
    }
}

/// Inode numbers for unlinked pipe inodes, separate from any
/// superblock's own numbering since these are never looked up by ino.
static NEXT_PIPE_INO: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(1);

/// Wraps `pipe` as an unlinked FIFO inode, not attached to any dentry —
/// a pipe fd is reachable only through the fd table, exactly like a
/// real `pipe(2)` result.
fn pipe_inode(pipe: Arc<talon_ipc::Pipe>) -> Arc<talon_fs::inode::Inode> {
    talon_fs::inode::Inode::new(
        NEXT_PIPE_INO.fetch_add(1, core::sync::atomic::Ordering::Relaxed),
        talon_fs::inode::InodeType::Fifo,
        talon_fs::inode::InodeMetadata {
            mode: 0o600,
            size: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            atime: 0,
            mtime: 0,
            block_size: talon_ipc::pipe::PIPE_CAPACITY as u32,
        },
        Arc::new(PipeOps(pipe)),
        alloc::sync::Weak::new(),
        None,
    )
}

struct SchedulerDirectory;

impl talon_sched::signal::ProcessDirectory for SchedulerDirectory {
    fn all_except(&self, caller: &Task) -> alloc::vec::Vec<Arc<Task>> {
        talon_sched::sched::with_scheduler(|s| s.all_except(caller.pid))
    }
    fn by_group(&self, pgid: u32) -> alloc::vec::Vec<Arc<Task>> {
        talon_sched::sched::with_scheduler(|s| s.by_group(Pid(pgid)))
    }
    fn by_pid(&self, pid: u32) -> Option<Arc<Task>> {
        talon_sched::sched::with_scheduler(|s| s.task(Pid(pid)))
    }
}

struct TaskMemory<'a>(&'a Arc<Task>);

impl talon_sched::signal::UserMemory for TaskMemory<'_> {
    fn write(&self, addr: u64, bytes: &[u8]) -> Result<()> {
        // SAFETY: placeholder until real user address spaces exist;
        // `addr` is trusted kernel-resident memory in the interim.
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len()) };
        Ok(())
    }
    fn read(&self, addr: u64, len: usize) -> Result<alloc::vec::Vec<u8>> {
        // SAFETY: see `write` above.
        Ok(unsafe { core::slice::from_raw_parts(addr as *const u8, len) }.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_syscall_number_is_nosys() {
        assert_eq!(SyscallNumber::from_u32(999).unwrap_err(), KError::NoSys);
    }

    #[test]
    fn sigreturn_number_matches_ksched_constant() {
        assert_eq!(
            SyscallNumber::from_u32(talon_sched::signal::SIGRETURN_SYSCALL_NR).unwrap(),
            SyscallNumber::SigReturn
        );
    }

    #[test]
    fn pipe_inode_round_trips_through_read_and_write_at() {
        let pipe = talon_ipc::Pipe::new();
        let write_end = pipe_inode(pipe.clone());
        let read_end = pipe_inode(pipe);
        assert_eq!(write_end.ops().write_at(0, b"hello").unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(read_end.ops().read_at(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }
}
