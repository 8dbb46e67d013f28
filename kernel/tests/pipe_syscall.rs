//! Exercises the syscall dispatch table directly, without touching the
//! scheduler or PMM singletons — `Pipe`/`Open`/`Read`/`Write`/`Close`/
//! `Getcwd` only need a `KernelContext` and a bare `Task`.

use std::sync::Arc;

use talon_fs::dentry::{Dentry, DentryCache};
use talon_fs::file::OpenFlags;
use talon_fs::mount::MountTable;
use talon_fs::path::LookupResult;
use talon_fs::superblock::FileSystemType;
use talon_kernel::syscall::{self, Args, KernelContext, SyscallNumber};
use talon_sched::task::{alloc_pid, SchedPolicy, Task};

fn root_context() -> KernelContext {
    let mounts = MountTable::new();
    let fs = talon_fs::ramfs::RamFs;
    let sb = fs.mount(None, "").expect("mount ramfs");
    let root_dentry = sb.root().expect("ramfs root");
    let vfsmount = mounts.mount_root(root_dentry.clone(), sb);
    let root = LookupResult {
        mount: vfsmount,
        dentry: root_dentry,
    };
    KernelContext::new(DentryCache::new(), mounts, root)
}

fn task_at(ctx: &KernelContext) -> Arc<Task> {
    Task::new(
        alloc_pid(),
        alloc_pid(),
        SchedPolicy::Other,
        0,
        talon_core::addr::PhysAddr::new(0),
        ctx.root.clone(),
    )
}

fn dispatch(ctx: &KernelContext, task: &Arc<Task>, number: SyscallNumber, args: Args) -> i64 {
    syscall::dispatch(ctx, task, number as u32, args)
}

#[test]
fn open_write_read_close_round_trips_through_ramfs() {
    let ctx = root_context();
    let task = task_at(&ctx);

    let path = b"/greeting\0";
    let fd = dispatch(
        &ctx,
        &task,
        SyscallNumber::Open,
        Args {
            a0: path.as_ptr() as u64,
            a1: path.len() as u64 - 1,
            a2: (OpenFlags::READ_WRITE | OpenFlags::CREATE).bits() as u64,
            ..Default::default()
        },
    );
    assert!(fd >= 0, "open failed: {fd}");

    let payload = b"hello kernel";
    let written = dispatch(
        &ctx,
        &task,
        SyscallNumber::Write,
        Args {
            a0: fd as u64,
            a1: payload.as_ptr() as u64,
            a2: payload.len() as u64,
            ..Default::default()
        },
    );
    assert_eq!(written, payload.len() as i64);

    dispatch(
        &ctx,
        &task,
        SyscallNumber::Lseek,
        Args {
            a0: fd as u64,
            a1: 0,
            a2: 0, // SeekFrom::Set
            ..Default::default()
        },
    );

    let mut read_buf = [0u8; 64];
    let read = dispatch(
        &ctx,
        &task,
        SyscallNumber::Read,
        Args {
            a0: fd as u64,
            a1: read_buf.as_mut_ptr() as u64,
            a2: read_buf.len() as u64,
            ..Default::default()
        },
    );
    assert_eq!(read, payload.len() as i64);
    assert_eq!(&read_buf[..payload.len()], payload);

    let closed = dispatch(
        &ctx,
        &task,
        SyscallNumber::Close,
        Args {
            a0: fd as u64,
            ..Default::default()
        },
    );
    assert_eq!(closed, 0);
}

#[test]
fn pipe_write_end_feeds_read_end_across_two_fds() {
    let ctx = root_context();
    let task = task_at(&ctx);

    let packed = dispatch(&ctx, &task, SyscallNumber::Pipe, Args::default());
    assert!(packed >= 0, "pipe failed: {packed}");
    let read_fd = (packed & 0xFFFF_FFFF) as u64;
    let write_fd = ((packed >> 32) & 0xFFFF_FFFF) as u64;

    let payload = b"through the ring";
    let written = dispatch(
        &ctx,
        &task,
        SyscallNumber::Write,
        Args {
            a0: write_fd,
            a1: payload.as_ptr() as u64,
            a2: payload.len() as u64,
            ..Default::default()
        },
    );
    assert_eq!(written, payload.len() as i64);

    let mut buf = [0u8; 32];
    let read = dispatch(
        &ctx,
        &task,
        SyscallNumber::Read,
        Args {
            a0: read_fd,
            a1: buf.as_mut_ptr() as u64,
            a2: buf.len() as u64,
            ..Default::default()
        },
    );
    assert_eq!(read, payload.len() as i64);
    assert_eq!(&buf[..payload.len()], payload);
}

#[test]
fn getcwd_reports_root_for_a_task_started_there() {
    let ctx = root_context();
    let task = task_at(&ctx);

    let mut buf = [0u8; 16];
    let len = dispatch(
        &ctx,
        &task,
        SyscallNumber::Getcwd,
        Args {
            a0: buf.as_mut_ptr() as u64,
            a1: buf.len() as u64,
            ..Default::default()
        },
    );
    assert_eq!(len, 1);
    assert_eq!(&buf[..1], b"/");
}

#[test]
fn getcwd_with_undersized_buffer_is_inval() {
    let ctx = root_context();
    let task = task_at(&ctx);

    let mut buf = [0u8; 0];
    let result = dispatch(
        &ctx,
        &task,
        SyscallNumber::Getcwd,
        Args {
            a0: buf.as_mut_ptr() as u64,
            a1: buf.len() as u64,
            ..Default::default()
        },
    );
    assert_eq!(result, talon_core::error::KError::Inval.errno());
}
