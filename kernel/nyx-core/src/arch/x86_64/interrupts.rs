//! `cli` / `sti` / `pushfq` wrappers.

const INTERRUPT_FLAG: u64 = 1 << 9;

/// Returns whether the interrupt flag is currently set.
#[inline]
pub fn interrupts_enabled() -> bool {
    let flags: u64;
    // SAFETY: `pushfq`/`pop` reads RFLAGS without side effects.
    unsafe {
        core::arch::asm!(
            "pushfq",
            "pop {}",
            out(reg) flags,
            options(nomem, preserves_flags),
        );
    }
    flags & INTERRUPT_FLAG != 0
}

/// Disables maskable interrupts on this CPU.
#[inline]
pub fn disable_interrupts() {
    // SAFETY: `cli` has no memory effects visible to the compiler.
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }
}

/// Re-enables maskable interrupts on this CPU.
///
/// # Safety
///
/// The caller must ensure re-enabling interrupts here cannot violate an
/// invariant an outer critical section is still relying on (e.g. this must
/// not be called while a coarser lock that forbids interrupt reentry is
/// still held).
#[inline]
pub unsafe fn restore_interrupts() {
    // SAFETY: `sti` has no memory effects visible to the compiler; caller
    // contract covers the logical precondition.
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack));
    }
}
