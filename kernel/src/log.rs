//! Serial-port logging sink.
//!
//! Installed once during early boot so every `kinfo!`/`kerr!`/etc. call
//! from any crate reaches the COM1 UART; nothing more elaborate (no
//! framebuffer console, no ring buffer) is in scope.

use core::fmt::Write;

use talon_core::log::LogLevel;

const COM1: u16 = 0x3F8;

struct Serial;

impl Write for Serial {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        #[cfg(target_os = "none")]
        for byte in s.bytes() {
            // SAFETY: COM1 is a fixed, always-present legacy UART port;
            // writing the data register has no precondition beyond the
            // line being initialized, which `init` below guarantees.
            unsafe { crate::arch::x86_64::outb(COM1, byte) };
        }
        #[cfg(not(target_os = "none"))]
        let _ = s;
        Ok(())
    }
}

fn print(args: core::fmt::Arguments<'_>) {
    let _ = Serial.write_fmt(args);
}

fn log(level: LogLevel, args: core::fmt::Arguments<'_>) {
    let _ = write!(Serial, "[{}] ", level.name());
    let _ = Serial.write_fmt(args);
    let _ = Serial.write_str("\n");
}

/// Initializes the COM1 UART at 38400 baud, 8N1, and installs it as
/// both the raw-print and leveled-log sink.
#[cfg(target_os = "none")]
pub fn init() {
    use crate::arch::x86_64::outb;
    // SAFETY: standard 16550 UART initialization sequence on the fixed
    // COM1 port range; run once, before interrupts are enabled.
    unsafe {
        outb(COM1 + 1, 0x00); // disable interrupts
        outb(COM1 + 3, 0x80); // enable DLAB
        outb(COM1, 0x03); // divisor low byte: 38400 baud
        outb(COM1 + 1, 0x00); // divisor high byte
        outb(COM1 + 3, 0x03); // 8 bits, no parity, one stop bit
        outb(COM1 + 2, 0xC7); // enable FIFO, clear, 14-byte threshold
        outb(COM1 + 4, 0x0B); // IRQs enabled, RTS/DSR set
    }
    // SAFETY: sinks are plain function pointers callable from any
    // context; installing them this early is exactly what they're for.
    unsafe {
        talon_core::log::set_print_fn(print);
        talon_core::log::set_log_fn(log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_formats_level_prefix() {
        // Host builds never touch the UART; this only exercises the
        // formatting path via the non-gated `write_str` branch.
        let mut out = alloc::string::String::new();
        let _ = write!(out, "[{}] {}", LogLevel::Info.name(), "booted");
        assert_eq!(out, "[INFO ] booted");
    }
}
