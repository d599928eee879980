//! A [`SpinLock`] that also masks interrupts while held.
//!
//! Spec section 4.1 requires that "interrupts must not call into the
//! allocator"; more generally, section 5's shared-resource policy holds
//! every coarse lock (allocator, shared-memory registry, pipe, VTY) only
//! briefly and never across a blocking operation. An ordinary [`SpinLock`]
//! is unsound to take from both normal and interrupt context on the same
//! CPU: an interrupt that fires while the lock is held and also wants it
//! spins forever against itself. `IrqSpinLock` disables interrupts for the
//! lifetime of the guard to rule that out on this single-CPU kernel.

use core::ops::{Deref, DerefMut};

use super::spinlock::{SpinLock, SpinLockGuard};
use crate::arch::interrupts::{interrupts_enabled, restore_interrupts, disable_interrupts};

/// A [`SpinLock`] that disables interrupts for the duration of the hold.
pub struct IrqSpinLock<T> {
    inner: SpinLock<T>,
}

impl<T> IrqSpinLock<T> {
    /// Creates a new unlocked, unnamed `IrqSpinLock`.
    pub const fn new(value: T) -> Self {
        Self {
            inner: SpinLock::new(value),
        }
    }

    /// Creates a new unlocked, named `IrqSpinLock` at the given lock-order
    /// level (diagnostics only, see [`SpinLock::leveled`]).
    pub const fn leveled(name: &'static str, level: u8, value: T) -> Self {
        Self {
            inner: SpinLock::leveled(name, level, value),
        }
    }

    /// Creates a new unlocked, named `IrqSpinLock` at level 0.
    pub const fn named(name: &'static str, value: T) -> Self {
        Self {
            inner: SpinLock::named(name, value),
        }
    }

    /// Disables interrupts, then acquires the lock. Interrupts are restored
    /// to whatever state they were in when the returned guard is dropped.
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let was_enabled = interrupts_enabled();
        disable_interrupts();
        IrqSpinLockGuard {
            guard: self.inner.lock(),
            restore_interrupts: was_enabled,
        }
    }
}

/// RAII guard that releases the lock and restores the prior interrupt
/// state when dropped.
pub struct IrqSpinLockGuard<'a, T> {
    guard: SpinLockGuard<'a, T>,
    restore_interrupts: bool,
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        if self.restore_interrupts {
            // SAFETY: guard is being dropped, the critical section is over.
            unsafe { restore_interrupts() };
        }
    }
}
