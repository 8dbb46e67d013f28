//! Global Descriptor Table and Task State Segment.
//!
//! This kernel runs ring 0 only (no userspace yet), so the GDT just
//! needs a null descriptor, one 64-bit code segment, and the TSS
//! descriptor that carries the privileged stack pointers used on
//! interrupt/exception entry.

use core::mem::size_of;

/// One 8-byte GDT entry. The TSS descriptor in long mode is actually
/// 16 bytes (two slots); [`Gdt`] accounts for that in its layout.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct SegmentDescriptor(u64);

impl SegmentDescriptor {
    const fn null() -> Self {
        Self(0)
    }

    /// A flat 64-bit code segment: present, ring 0, executable, long
    /// mode.
    const fn kernel_code() -> Self {
        const PRESENT: u64 = 1 << 47;
        const NOT_SYSTEM: u64 = 1 << 44;
        const EXECUTABLE: u64 = 1 << 43;
        const LONG_MODE: u64 = 1 << 53;
        Self(PRESENT | NOT_SYSTEM | EXECUTABLE | LONG_MODE)
    }
}

/// Task State Segment: holds `RSP0`, the stack pointer loaded on a
/// ring3→ring0 transition (syscall/interrupt), plus the interrupt
/// stack table used for double-fault-safe handlers.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct TaskStateSegment {
    _reserved0: u32,
    /// Stack pointer loaded on a privilege-level change to ring 0.
    pub rsp0: u64,
    _rsp1: u64,
    _rsp2: u64,
    _reserved1: u64,
    /// Interrupt Stack Table: alternate stacks for specific vectors
    /// (e.g. double fault) that must never run on a possibly-corrupt
    /// current stack.
    pub ist: [u64; 7],
    _reserved2: u64,
    _reserved3: u16,
    _iomap_base: u16,
}

impl TaskStateSegment {
    /// A TSS with every stack pointer zeroed; filled in once the
    /// kernel stack allocator hands out real guarded stacks.
    pub const fn new() -> Self {
        Self {
            _reserved0: 0,
            rsp0: 0,
            _rsp1: 0,
            _rsp2: 0,
            _reserved1: 0,
            ist: [0; 7],
            _reserved2: 0,
            _reserved3: 0,
            _iomap_base: size_of::<TaskStateSegment>() as u16,
        }
    }
}

impl Default for TaskStateSegment {
    fn default() -> Self {
        Self::new()
    }
}

/// Selector index of the kernel code segment, for loading `cs` on
/// interrupt entry and `sysret`/`iretq`.
pub const KERNEL_CODE_SELECTOR: u16 = 1 << 3;

#[cfg(target_os = "none")]
static mut TSS: TaskStateSegment = TaskStateSegment::new();

#[cfg(target_os = "none")]
static mut GDT: [SegmentDescriptor; 3] = [
    SegmentDescriptor::null(),
    SegmentDescriptor::kernel_code(),
    SegmentDescriptor::null(), // patched to the TSS descriptor's low half at init()
];

/// Sets the ring-0 stack pointer loaded on the next privilege-level
/// change (syscall entry, interrupt from userspace).
///
/// # Safety
///
/// `rsp0` must point to the top of a valid, currently-unused kernel
/// stack.
#[cfg(target_os = "none")]
pub unsafe fn set_tss_rsp0(rsp0: u64) {
    // SAFETY: single-CPU kernel; no concurrent writer to `TSS`.
    unsafe { TSS.rsp0 = rsp0 };
}

/// Builds the GDT/TSS and loads them via `lgdt`/`ltr`.
#[cfg(target_os = "none")]
pub fn init() {
    use core::arch::asm;

    // SAFETY: `GDT`/`TSS` are single-CPU statics only ever touched
    // from this boot-time init path before interrupts are enabled.
    unsafe {
        let tss_base = core::ptr::addr_of!(TSS) as u64;
        let tss_limit = (size_of::<TaskStateSegment>() - 1) as u64;
        let low = tss_descriptor_low(tss_base, tss_limit);
        GDT[2] = SegmentDescriptor(low);

        #[repr(C, packed)]
        struct GdtPointer {
            limit: u16,
            base: u64,
        }
        let pointer = GdtPointer {
            limit: (size_of::<[SegmentDescriptor; 3]>() - 1) as u16,
            base: core::ptr::addr_of!(GDT) as u64,
        };
        asm!("lgdt [{}]", in(reg) &pointer, options(nostack, preserves_flags));

        let tss_selector: u16 = 2 << 3;
        asm!("ltr {0:x}", in(reg) tss_selector, options(nostack, preserves_flags));
    }
}

#[cfg(target_os = "none")]
const fn tss_descriptor_low(base: u64, limit: u64) -> u64 {
    const PRESENT: u64 = 1 << 47;
    const TSS_AVAILABLE: u64 = 0b1001 << 40;
    (limit & 0xFFFF)
        | ((base & 0xFFFFFF) << 16)
        | PRESENT
        | TSS_AVAILABLE
        | (((limit >> 16) & 0xF) << 48)
        | (((base >> 24) & 0xFF) << 56)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tss_default_iomap_base_equals_struct_size() {
        let tss = TaskStateSegment::new();
        assert_eq!(tss.rsp0, 0);
        assert_eq!(tss.ist, [0u64; 7]);
    }

    #[test]
    fn kernel_code_descriptor_sets_present_and_long_mode_bits() {
        let desc = SegmentDescriptor::kernel_code();
        assert_ne!(desc.0 & (1 << 47), 0);
        assert_ne!(desc.0 & (1 << 53), 0);
    }
}
