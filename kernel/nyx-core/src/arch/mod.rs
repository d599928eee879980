//! Architecture-specific leaf module.
//!
//! Per spec design note "Inline assembly boundaries": CR3 load, invlpg,
//! rdmsr/wrmsr, cpuid, in/out, sti/cli are confined here so the rest of the
//! core stays shaped for portability even though only x86_64 is implemented.

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
pub mod x86_64;

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
pub use x86_64::interrupts;

/// Host-test fallback: interrupts are never really masked off-target, so
/// these are plain booleans with no hardware effect. Gated on `target_os`
/// rather than `target_arch` alone — the kernel's own `x86_64` target uses
/// `target_os = "none"`, but a host unit-test binary runs in ring 3 on a
/// real x86_64 CPU, where `cli`/`sti` would fault.
#[cfg(not(all(target_os = "none", target_arch = "x86_64")))]
pub mod interrupts {
    use core::sync::atomic::{AtomicBool, Ordering};

    static ENABLED: AtomicBool = AtomicBool::new(true);

    /// Returns whether interrupts are (notionally) enabled.
    pub fn interrupts_enabled() -> bool {
        ENABLED.load(Ordering::Relaxed)
    }

    /// Disables (notional) interrupts.
    pub fn disable_interrupts() {
        ENABLED.store(false, Ordering::Relaxed);
    }

    /// Re-enables interrupts if `was_enabled` is true.
    ///
    /// # Safety
    /// No actual hardware state on non-x86_64 host builds; safe to call
    /// unconditionally.
    pub unsafe fn restore_interrupts() {
        ENABLED.store(true, Ordering::Relaxed);
    }
}
