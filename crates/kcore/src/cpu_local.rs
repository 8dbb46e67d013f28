//! Per-CPU storage.
//!
//! The kernel targets a single CPU (spec §5: one run queue, preemption
//! driven entirely by the timer interrupt), so `CpuLocal` is a thin
//! wrapper that always resolves to slot 0. The indirection is kept so
//! callers read no differently than they would on a true per-CPU kernel,
//! and so a later SMP port only has to change [`current_cpu_id`].

use core::cell::UnsafeCell;

/// Per-CPU storage wrapping a single `T` for the one supported CPU.
pub struct CpuLocal<T> {
    data: UnsafeCell<T>,
}

impl<T> CpuLocal<T> {
    /// Creates a new `CpuLocal` wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            data: UnsafeCell::new(value),
        }
    }

    /// Returns a reference to the current CPU's instance.
    pub fn get(&self) -> &T {
        debug_assert_eq!(current_cpu_id(), 0);
        // SAFETY: single-CPU kernel; this is the only slot and is only
        // ever accessed from the one execution context that owns it.
        unsafe { &*self.data.get() }
    }

    /// Returns a mutable reference to the current CPU's instance.
    ///
    /// # Safety
    ///
    /// The caller must ensure no other reference to this CPU's slot is
    /// live for the duration of the returned borrow.
    pub unsafe fn get_mut(&self) -> &mut T {
        debug_assert_eq!(current_cpu_id(), 0);
        // SAFETY: forwarded to the caller.
        unsafe { &mut *self.data.get() }
    }
}

// SAFETY: a single-CPU kernel has exactly one accessor at a time.
unsafe impl<T: Send> Send for CpuLocal<T> {}
unsafe impl<T: Send> Sync for CpuLocal<T> {}

/// Returns the current CPU's id. Always `0`; kept so call sites read the
/// same as they would on a multi-CPU kernel.
#[inline]
pub const fn current_cpu_id() -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_reads_back() {
        let local = CpuLocal::new(41);
        assert_eq!(*local.get(), 41);
        unsafe {
            *local.get_mut() += 1;
        }
        assert_eq!(*local.get(), 42);
    }
}
