//! Synchronization primitives for the kernel.
//!
//! Provides [`SpinLock`], [`IrqSpinLock`], [`LazyLock`], and [`WaitQueue`],
//! all usable before any allocator or scheduler exists and all suitable for
//! placement in `static` items. There is no `Mutex`/future-based lock here:
//! this kernel has no async executor (spec section 9 design note — blocking
//! is modeled as an explicit `Outcome::Suspended`, not a polled future), so
//! every lock here is a plain spin lock with a bounded, briefly-held
//! critical section (spec section 5's shared-resource policy).

mod irq_spinlock;
mod lazy;
mod spinlock;
pub mod waitqueue;

pub use irq_spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use lazy::LazyLock;
pub use spinlock::{SpinLock, SpinLockGuard};
pub use waitqueue::WaitQueue;
