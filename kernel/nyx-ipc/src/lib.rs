//! L4 pipe and shared-memory segment subsystems.
//!
//! Both subsystems need to move bytes into and out of a *specific*
//! process's user address space, but that process need not be the one
//! currently running (a blocked reader's buffer is addressed long after
//! its own syscall's stack frame is gone). Rather than thread `nyx-mm`'s
//! generic `AddressSpace<M>` through every function here, each subsystem
//! defines a small trait ([`pipe::UserCopy`], [`shm::SegmentMapper`])
//! that `nyx-kernel` implements against its own per-process address-space
//! table — the same decoupling technique `nyx-mm::mapper` already uses
//! for `PageMapper`/`PageTranslator`.

#![cfg_attr(not(test), no_std)]

pub mod pipe;
pub mod shm;

pub use pipe::UserCopy;

/// Capacity, in bytes, of a single pipe's ring buffer (spec 3: "A
/// fixed-capacity byte ring (4 KiB)").
pub const PIPE_RING_CAPACITY: usize = 4096;

/// Maximum number of simultaneously live pipes (matches the original's
/// `kMaxPipes`).
pub const MAX_PIPES: usize = 64;

/// Maximum number of processes blocked on pipe I/O at once, across every
/// pipe (matches the original's `kMaxPipeWaiters`). Waiter records live
/// in a small static pool (spec 4.5: "Waiter records live in a small static
/// pool").
pub const MAX_PIPE_WAITERS: usize = 128;

/// Maximum number of simultaneously live named shared-memory segments
/// (matches the original's `kMaxSegments`).
pub const MAX_SEGMENTS: usize = 32;

/// Maximum length, in bytes, of a shared-memory segment name (spec 3:
/// "unique name (up to 48 bytes)").
pub const MAX_SEGMENT_NAME_LEN: usize = 48;

/// Maximum number of 4 KiB pages a single segment may back. The original's
/// `kMaxSegmentPages` is 4096, but `nyx-kernel`'s `SegmentMapper::map_into`
/// stages the frame list on the caller's kernel stack (16 KiB per process,
/// spec 4.3) rather than the heap, so this core keeps a smaller bound —
/// 4096 pages would alone take twice that stack.
pub const MAX_SEGMENT_PAGES: usize = 512;

/// Maximum number of distinct processes that may hold a mapping of the same
/// segment at once.
pub const MAX_SEGMENT_MAPPINGS: usize = 16;
