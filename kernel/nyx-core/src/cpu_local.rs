//! Single-CPU storage cell.
//!
//! This kernel assumes one CPU (spec section 1, Non-goals: "No SMP"), so
//! `CpuLocal<T>` collapses to a single backing slot rather than an array
//! indexed by APIC id. It still exists as its own type, not a bare `static`,
//! so the arch/boot layer has one well-known place to stash the one CPU's
//! saved kernel stack pointer and similar state without every call site
//! re-deriving "there is exactly one of these."

/// A single-CPU storage cell.
pub struct CpuLocal<T> {
    data: T,
}

impl<T> CpuLocal<T> {
    /// Creates a new `CpuLocal` wrapping `data`.
    pub const fn new(data: T) -> Self {
        Self { data }
    }

    /// Returns a reference to the stored value.
    pub fn get(&self) -> &T {
        &self.data
    }
}

// SAFETY: single-CPU kernel — there is no other core that could race this
// access. `T: Send` is still required since the state is reachable from
// both normal and interrupt context on the one CPU.
unsafe impl<T: Send> Send for CpuLocal<T> {}
unsafe impl<T: Send> Sync for CpuLocal<T> {}
