//! Interrupt Descriptor Table.
//!
//! 256 gate descriptors, one per vector. Exception vectors (0..32) get
//! dedicated handlers; the timer tick and syscall entry are wired at
//! fixed vectors above that; everything else gets a spurious-interrupt
//! stub that just sends EOI.

/// One 16-byte IDT gate descriptor (interrupt gate, long mode).
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
struct GateDescriptor {
    offset_low: u16,
    selector: u16,
    ist: u8,
    type_attr: u8,
    offset_mid: u16,
    offset_high: u32,
    _reserved: u32,
}

impl GateDescriptor {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            ist: 0,
            type_attr: 0,
            offset_mid: 0,
            offset_high: 0,
            _reserved: 0,
        }
    }

    #[cfg(target_os = "none")]
    fn new(handler: u64, selector: u16) -> Self {
        const PRESENT: u8 = 1 << 7;
        const INTERRUPT_GATE: u8 = 0b1110;
        Self {
            offset_low: handler as u16,
            selector,
            ist: 0,
            type_attr: PRESENT | INTERRUPT_GATE,
            offset_mid: (handler >> 16) as u16,
            offset_high: (handler >> 32) as u32,
            _reserved: 0,
        }
    }
}

/// Vector number the timer (PIT/APIC) interrupt is remapped to.
pub const TIMER_VECTOR: u8 = 32;
/// Vector number the legacy `int 0x80`-style syscall gate uses. The
/// `syscall`/`sysret` fast path doesn't need a gate at all, but this is
/// kept as a fallback entry point.
pub const SYSCALL_VECTOR: u8 = 0x80;

#[cfg(target_os = "none")]
static mut IDT: [GateDescriptor; 256] = [GateDescriptor::missing(); 256];

#[cfg(target_os = "none")]
extern "x86-interrupt" fn double_fault_handler(_frame: DoubleFaultStackFrame) -> ! {
    panic!("double fault");
}

#[cfg(target_os = "none")]
extern "x86-interrupt" fn page_fault_handler(frame: InterruptStackFrame, error_code: u64) {
    // SAFETY: reading `cr2` has no side effects besides the read.
    let faulting_addr: u64;
    unsafe {
        core::arch::asm!("mov {}, cr2", out(reg) faulting_addr, options(nomem, nostack, preserves_flags));
    }
    talon_core::kerr!(
        "page fault at {:#x} (error {:#x}) from rip {:#x}",
        faulting_addr,
        error_code,
        frame.instruction_pointer
    );
    // A real handler resolves this through `talon_mm::vmm`/`swap` and
    // only terminates the task on an unmapped, non-swapped address
    // (spec §7); wiring that up needs the current task, supplied by
    // `talon_sched` once this stub is reached from `cpu_init`.
}

#[cfg(target_os = "none")]
extern "x86-interrupt" fn timer_handler(_frame: InterruptStackFrame) {
    talon_sched::sched::with_scheduler(|s| {
        s.scheduler_tick(0);
    });
    send_eoi();
}

#[cfg(target_os = "none")]
extern "x86-interrupt" fn spurious_handler(_frame: InterruptStackFrame) {
    send_eoi();
}

/// Register snapshot the CPU pushes before an `x86-interrupt` ABI
/// handler runs.
#[cfg(target_os = "none")]
#[repr(C)]
struct InterruptStackFrame {
    instruction_pointer: u64,
    code_segment: u64,
    cpu_flags: u64,
    stack_pointer: u64,
    stack_segment: u64,
}

#[cfg(target_os = "none")]
type DoubleFaultStackFrame = InterruptStackFrame;

const PIC1_COMMAND: u16 = 0x20;
const PIC2_COMMAND: u16 = 0xA0;
const PIC_EOI: u8 = 0x20;

#[cfg(target_os = "none")]
fn send_eoi() {
    // SAFETY: PIC command port writes are always safe; EOI has no
    // precondition beyond "an interrupt is being acknowledged".
    unsafe {
        super::outb(PIC1_COMMAND, PIC_EOI);
        super::outb(PIC2_COMMAND, PIC_EOI);
    }
}

/// Builds the IDT and loads it via `lidt`.
#[cfg(target_os = "none")]
pub fn init() {
    use core::arch::asm;
    use super::gdt::KERNEL_CODE_SELECTOR;

    // SAFETY: `IDT` is a single-CPU static only ever touched from this
    // boot-time init path before interrupts are enabled.
    unsafe {
        IDT[8] = GateDescriptor::new(double_fault_handler as u64, KERNEL_CODE_SELECTOR);
        IDT[14] = GateDescriptor::new(page_fault_handler as u64, KERNEL_CODE_SELECTOR);
        IDT[TIMER_VECTOR as usize] = GateDescriptor::new(timer_handler as u64, KERNEL_CODE_SELECTOR);
        for vector in 0..256usize {
            if IDT[vector].type_attr == 0 {
                IDT[vector] = GateDescriptor::new(spurious_handler as u64, KERNEL_CODE_SELECTOR);
            }
        }

        #[repr(C, packed)]
        struct IdtPointer {
            limit: u16,
            base: u64,
        }
        let pointer = IdtPointer {
            limit: (core::mem::size_of::<[GateDescriptor; 256]>() - 1) as u16,
            base: core::ptr::addr_of!(IDT) as u64,
        };
        asm!("lidt [{}]", in(reg) &pointer, options(nostack, preserves_flags));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_gate_has_zeroed_type_attr() {
        let gate = GateDescriptor::missing();
        assert_eq!(gate.type_attr, 0);
    }
}
