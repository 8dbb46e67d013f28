//! Kernel entry point.
//!
//! Freestanding binary: no `std`, no Rust-provided `main`. The
//! bootloader jumps to [`_start`] with the multiboot magic in `eax`
//! and the info pointer in `ebx`, per the calling convention both
//! multiboot versions share.

#![no_std]
#![no_main]
#![cfg_attr(target_os = "none", feature(abi_x86_interrupt))]

use talon_kernel::{boot, config, log as klog};

/// Panic handler: logs the message and parks the CPU. There is nowhere
/// else to unwind to.
#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    talon_core::kfatal!("panic: {}", info);
    loop {
        talon_kernel::arch::x86_64::halt();
    }
}

/// Entry point reached directly from the bootloader trampoline.
///
/// # Safety
///
/// Must only be called once, by the bootloader, with `eax`/`ebx`
/// holding a valid multiboot handoff — see the module doc comment.
#[cfg(target_os = "none")]
#[no_mangle]
pub unsafe extern "C" fn _start(magic: u32, info_addr: usize) -> ! {
    klog::init();
    talon_core::kinfo!("boot: magic={:#x} info={:#x}", magic, info_addr);

    // SAFETY: `magic`/`info_addr` come straight from the bootloader
    // handoff this function's own contract requires.
    let boot_info = unsafe { boot::parse(magic, info_addr) }
        .unwrap_or_else(|| panic!("unrecognized boot magic {:#x}", magic));

    talon_kernel::init_subsystems(&boot_info).expect("boot-time reservation crosses the identity window");
    talon_kernel::arch::x86_64::cpu_init();

    let mounts = talon_fs::mount::MountTable::new();
    let cwd = talon_kernel::mount_root(&mounts).expect("mount root ramfs");

    talon_sched::sched::with_scheduler(|s| {
        s.create_kernel_task(
            talon_sched::task::SchedPolicy::Other,
            0,
            talon_core::addr::PhysAddr::new(0),
            cwd,
        )
    });

    talon_core::kinfo!(
        "init complete: {} MLFQ levels, {}-byte heap",
        config::MLFQ_LEVELS,
        config::KERNEL_HEAP_SIZE
    );

    // SAFETY: every subsystem interrupts rely on (GDT/IDT, scheduler,
    // PMM) is initialized above.
    unsafe { talon_kernel::arch::x86_64::enable_interrupts() };

    loop {
        talon_kernel::arch::x86_64::halt();
    }
}
