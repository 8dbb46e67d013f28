//! Interrupt-safe spinlock.
//!
//! Acquiring disables local interrupts and restores the prior interrupt
//! state on release, so a spinlock can be safely taken from both task
//! and interrupt context without deadlocking against itself (spec §5).
//! The interrupt enable/disable is delegated to a pair of hooks the
//! `no_std` kernel installs at boot; outside the kernel (host tests)
//! they are no-ops.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// Disables interrupts on the current CPU and returns whether they were
/// previously enabled.
pub type IrqSaveFn = fn() -> bool;
/// Restores the interrupt-enable state previously returned by an
/// [`IrqSaveFn`] call.
pub type IrqRestoreFn = fn(bool);

fn default_irq_save() -> bool {
    false
}
fn default_irq_restore(_prev: bool) {}

static IRQ_SAVE: AtomicPtr<()> = AtomicPtr::new(default_irq_save as *mut ());
static IRQ_RESTORE: AtomicPtr<()> = AtomicPtr::new(default_irq_restore as *mut ());

/// Installs the arch-specific interrupt save/restore hooks.
///
/// # Safety
///
/// Must be called once during boot before interrupts are enabled.
pub unsafe fn install_irq_hooks(save: IrqSaveFn, restore: IrqRestoreFn) {
    IRQ_SAVE.store(save as *mut (), Ordering::Release);
    IRQ_RESTORE.store(restore as *mut (), Ordering::Release);
}

fn irq_save() -> bool {
    // SAFETY: only ever stores a valid `IrqSaveFn` via `install_irq_hooks`.
    let f: IrqSaveFn = unsafe { core::mem::transmute(IRQ_SAVE.load(Ordering::Acquire)) };
    f()
}

fn irq_restore(prev: bool) {
    // SAFETY: only ever stores a valid `IrqRestoreFn` via `install_irq_hooks`.
    let f: IrqRestoreFn = unsafe { core::mem::transmute(IRQ_RESTORE.load(Ordering::Acquire)) };
    f(prev);
}

/// A mutual-exclusion lock that spins and disables interrupts while held.
pub struct SpinLock<T> {
    locked: AtomicBool,
    name: &'static str,
    data: UnsafeCell<T>,
}

// SAFETY: `SpinLock` provides its own synchronization; `T: Send` is
// required because the guarded data may be accessed from whichever CPU
// holds the lock.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new unlocked spinlock.
    pub const fn new(value: T) -> Self {
        Self::named("<unnamed>", value)
    }

    /// Creates a new unlocked, named spinlock (name used in diagnostics).
    pub const fn named(name: &'static str, value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            name,
            data: UnsafeCell::new(value),
        }
    }

    /// Returns this lock's diagnostic name.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Acquires the lock, spinning (with interrupts disabled) until free.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let irq_state = irq_save();
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinLockGuard {
                    lock: self,
                    irq_state,
                };
            }
            core::hint::spin_loop();
        }
    }

    /// Attempts to acquire the lock without spinning.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let irq_state = irq_save();
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinLockGuard {
                lock: self,
                irq_state,
            })
        } else {
            irq_restore(irq_state);
            None
        }
    }
}

/// RAII guard releasing a [`SpinLock`] and restoring interrupt state on drop.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    irq_state: bool,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the guard guarantees exclusive access while it exists.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard guarantees exclusive access while it exists.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        irq_restore(self.irq_state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_excludes_concurrent_try_lock() {
        let lock = SpinLock::new(0);
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn guard_mutates_inner_value() {
        let lock = SpinLock::new(10);
        *lock.lock() += 5;
        assert_eq!(*lock.lock(), 15);
    }
}
