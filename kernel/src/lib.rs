//! Kernel glue: boot information parsing, the bus/device registry, the
//! block layer, architecture init, and the syscall dispatch table.
//!
//! Split into a library so the glue can be exercised under `cargo
//! test` on the host; [`main`] is a thin `no_std`/`no_main` wrapper
//! around [`boot::parse`] and the init order it drives.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_os = "none", feature(abi_x86_interrupt))]
#![warn(missing_docs)]

extern crate alloc;

pub mod arch;
pub mod block;
pub mod boot;
pub mod bus;
pub mod config;
pub mod heap;
pub mod log;
pub mod syscall;

use talon_core::addr::{PhysAddr, PAGE_SIZE};
use talon_core::error::KError;
use talon_fs::path::LookupResult;
use talon_mm::pmm::{Frame, PhysMemoryRegion};

/// Whether a heap of `size` bytes placed at `base` fits entirely below
/// `window_end`, the boundary `init_subsystems` enforces for the early
/// identity-mapped window (spec §4.A).
fn heap_fits_identity_window(base: u64, size: u64, window_end: u64) -> bool {
    base + size <= window_end
}

/// Runs the early boot sequence against parsed boot information: global
/// heap bootstrap, PMM and scheduler init, plus raising the log filter
/// to its configured level once the rest of boot has had a chance to
/// log at `Debug`.
///
/// The heap is installed first — every later step here, and every
/// `no_std` crate's own init path, reaches for `alloc::` on its very
/// first call (the PMM's own bitmap storage included). Once the heap
/// is live, the kernel image, frame 0, and the heap region itself are
/// reserved in the PMM so `allocate_frame` never hands out physical
/// memory something else already owns.
///
/// Stops short of mounting a filesystem, enabling interrupts, or
/// entering the scheduler loop — callers (normally [`main`], or a test
/// harness) do those once this returns.
pub fn init_subsystems(boot_info: &boot::BootInfo) -> Result<(), KError> {
    let heap_end = heap::heap_phys_end();
    if !heap_fits_identity_window(heap::HEAP_PHYS_BASE, config::KERNEL_HEAP_SIZE as u64, config::IDENTITY_WINDOW_END) {
        return Err(KError::Inval);
    }

    // SAFETY: nothing before this point performs an `alloc::` call; the
    // region was just checked against the identity window above.
    #[cfg(target_os = "none")]
    unsafe {
        heap::init();
    }

    let regions: alloc::vec::Vec<PhysMemoryRegion> = boot_info.memory_map.clone();
    talon_mm::pmm::init(&regions);
    talon_mm::pmm::with_pmm(|pmm| {
        let reserved_frames = heap_end.div_ceil(PAGE_SIZE) as usize;
        pmm.reserve(Frame::containing_address(PhysAddr::new(0)), reserved_frames);
    });

    talon_sched::sched::init();
    talon_core::log::set_max_level(config::MAX_LOG_LEVEL);
    Ok(())
}

/// Mounts an in-memory root filesystem and returns the resolved `/`
/// location, ready to hand to [`talon_sched::sched::Scheduler::create_kernel_task`]
/// as the init task's working directory.
pub fn mount_root(mounts: &talon_fs::mount::MountTable) -> Result<LookupResult, talon_core::error::KError> {
    use talon_fs::superblock::FileSystemType;

    let fs = talon_fs::ramfs::RamFs;
    let sb = fs.mount(None, "")?;
    let root_dentry = sb.root().ok_or(talon_core::error::KError::NoEnt)?;
    let vfsmount = mounts.mount_root(root_dentry.clone(), sb);
    Ok(LookupResult {
        mount: vfsmount,
        dentry: root_dentry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_heap_fits_the_identity_window() {
        assert!(heap_fits_identity_window(
            heap::HEAP_PHYS_BASE,
            config::KERNEL_HEAP_SIZE as u64,
            config::IDENTITY_WINDOW_END,
        ));
    }

    #[test]
    fn a_heap_crossing_the_window_is_rejected() {
        let window_end = 0x1000u64;
        assert!(!heap_fits_identity_window(0x0900, 0x1000, window_end));
        assert!(heap_fits_identity_window(0x0000, 0x1000, window_end));
    }
}
