//! Fork/exit/wait through the real global scheduler, plus boot-time
//! PMM init against a synthetic memory map. Both singletons panic if
//! initialized twice, so every test in this file shares one `Once`.

use std::sync::Once;

use talon_core::addr::PhysAddr;
use talon_fs::mount::MountTable;
use talon_fs::superblock::FileSystemType;
use talon_mm::pmm::PhysMemoryRegion;
use talon_sched::task::SchedPolicy;

static INIT: Once = Once::new();

fn ensure_subsystems_initialized() {
    INIT.call_once(|| {
        talon_mm::pmm::init(&[PhysMemoryRegion {
            start: PhysAddr::new(0x10_0000),
            size: 16 * 1024 * 1024,
            usable: true,
        }]);
        talon_sched::sched::init();
    });
}

fn root_cwd() -> talon_fs::path::LookupResult {
    let mounts = MountTable::new();
    let fs = talon_fs::ramfs::RamFs;
    let sb = fs.mount(None, "").expect("mount ramfs");
    let root_dentry = sb.root().expect("ramfs root");
    let vfsmount = mounts.mount_root(root_dentry.clone(), sb);
    talon_fs::path::LookupResult {
        mount: vfsmount,
        dentry: root_dentry,
    }
}

#[test]
fn fork_then_exit_lets_parent_wait_reap_the_child() {
    ensure_subsystems_initialized();

    talon_sched::sched::with_scheduler(|s| {
        let parent = s.create_kernel_task(SchedPolicy::Other, 0, PhysAddr::new(0), root_cwd());
        let child = s.fork(&parent, 0);
        assert_ne!(child.pid, parent.pid);

        s.exit(child.pid, 7);
        let (reaped_pid, code) = s.wait(&parent, Some(child.pid)).expect("wait for child");
        assert_eq!(reaped_pid, child.pid);
        assert_eq!(code, 7);
    });
}

#[test]
fn wait_with_no_children_is_noent() {
    ensure_subsystems_initialized();

    talon_sched::sched::with_scheduler(|s| {
        let lonely = s.create_kernel_task(SchedPolicy::Other, 0, PhysAddr::new(0), root_cwd());
        let err = s.wait(&lonely, None).unwrap_err();
        assert_eq!(err, talon_core::error::KError::NoEnt);
    });
}

#[test]
fn all_except_excludes_only_the_caller_across_the_real_table() {
    ensure_subsystems_initialized();

    talon_sched::sched::with_scheduler(|s| {
        let a = s.create_kernel_task(SchedPolicy::Other, 0, PhysAddr::new(0), root_cwd());
        let b = s.create_kernel_task(SchedPolicy::Other, 0, PhysAddr::new(0), root_cwd());
        let others = s.all_except(a.pid);
        assert!(others.iter().any(|t| t.pid == b.pid));
        assert!(others.iter().all(|t| t.pid != a.pid));
    });
}
