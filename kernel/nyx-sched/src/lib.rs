//! L2 process table and cooperative scheduler.
//!
//! A fixed array of process slots (`MAX_PROCESSES`), each with its own
//! kernel stack, saved register frame, and a single state machine:
//! `Unused -> Ready -> Running -> Blocked -> Terminated`. There is no
//! kernel-thread preemption; a slot only changes state at the reschedule
//! points the dispatcher calls out to explicitly (syscall entry/exit,
//! `Yield`, `Exit`, the moment a descriptor operation blocks the caller).
//!
//! This crate does not know about pipes, shared memory, or descriptor
//! tables — those live a layer up in `nyx-kernel`. A blocked process only
//! carries an opaque `waiting_on` token; the subsystem that blocked it is
//! the one that interprets it and calls [`Table::enqueue`] to wake it.

#![cfg_attr(not(test), no_std)]

pub mod context;
pub mod process;
pub mod table;

pub use context::Context;
pub use process::{ProcState, ProcessSlot};
pub use table::{ProcError, Table};

/// Maximum number of process-table slots (spec 4.3: "fixed small array (≤16 slots)").
pub const MAX_PROCESSES: usize = 16;

/// Size in bytes of each slot's dedicated kernel stack (spec 4.3: "16 KiB").
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Alignment required of each slot's kernel stack (spec 4.3: "aligned to 16 bytes").
pub const KERNEL_STACK_ALIGN: usize = 16;

/// Maximum length, in bytes, of the opaque current-working-directory string
/// carried in a process slot (spec 3: "current working directory (opaque
/// string)"). This crate never interprets the bytes it stores here.
pub const MAX_CWD_LEN: usize = 64;

/// The result of a descriptor operation that may need to suspend its caller.
///
/// Replaces the original's `WouldBlock` sentinel (design note, spec section
/// 9) with a real enum the dispatcher matches exhaustively: a descriptor
/// operation either produces a value immediately, or has already blocked the
/// calling process (via [`Table::block`]) and left its saved frame untouched
/// for the eventual waker to fill in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation completed; the dispatcher writes `T` into the caller's
    /// frame and resumes it.
    Returned(T),
    /// The operation already transitioned the caller to `Blocked`. The
    /// dispatcher must not write anything to the frame.
    Suspended,
}

impl<T> Outcome<T> {
    /// `true` if this is [`Outcome::Returned`].
    pub const fn is_returned(&self) -> bool {
        matches!(self, Outcome::Returned(_))
    }

    /// `true` if this is [`Outcome::Suspended`].
    pub const fn is_suspended(&self) -> bool {
        matches!(self, Outcome::Suspended)
    }
}
