//! x86_64 architecture glue: GDT/TSS, IDT, and the port-I/O primitives
//! the serial sink and PIT calibration need.

pub mod gdt;
pub mod idt;

use core::arch::asm;

/// Reads a byte from an I/O port.
///
/// # Safety
///
/// `port` must name a port that is safe to read in the current
/// context (no side effects the caller isn't expecting).
#[cfg(target_os = "none")]
pub unsafe fn inb(port: u16) -> u8 {
    let value: u8;
    // SAFETY: caller upholds the port-read contract documented above.
    unsafe {
        asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack, preserves_flags));
    }
    value
}

/// Writes a byte to an I/O port.
///
/// # Safety
///
/// Same contract as [`inb`], plus the write must not corrupt state the
/// caller depends on.
#[cfg(target_os = "none")]
pub unsafe fn outb(port: u16, value: u8) {
    // SAFETY: caller upholds the port-write contract documented above.
    unsafe {
        asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
    }
}

/// Disables interrupts on this CPU.
///
/// # Safety
///
/// Must be paired with [`enable_interrupts`] (or a trap return that
/// restores the prior `rflags.IF`) before any code that expects
/// interrupts to fire runs.
#[cfg(target_os = "none")]
pub unsafe fn disable_interrupts() {
    // SAFETY: `cli` has no memory effects this crate needs to track.
    unsafe { asm!("cli", options(nomem, nostack)) };
}

/// Enables interrupts on this CPU.
///
/// # Safety
///
/// Must only be called once the IDT, GDT, and per-CPU state are fully
/// initialized — an interrupt firing before then is undefined.
#[cfg(target_os = "none")]
pub unsafe fn enable_interrupts() {
    // SAFETY: `sti` has no memory effects this crate needs to track.
    unsafe { asm!("sti", options(nomem, nostack)) };
}

/// Halts the CPU until the next interrupt.
#[cfg(target_os = "none")]
pub fn halt() {
    // SAFETY: `hlt` is always safe to execute; at worst it returns
    // immediately on a pending interrupt.
    unsafe { asm!("hlt", options(nomem, nostack)) };
}

/// Performs architecture-specific early CPU init: loads the GDT/TSS and
/// IDT built by [`gdt`]/[`idt`].
#[cfg(target_os = "none")]
pub fn cpu_init() {
    gdt::init();
    idt::init();
}
