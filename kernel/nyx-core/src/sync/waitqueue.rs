//! A FIFO queue of blocked process ids.
//!
//! This core has no async executor (design note, spec section 9:
//! `WouldBlock`/`Outcome::Suspended` replaces the blocking-future model).
//! A [`WaitQueue`] is therefore just a small fixed-capacity ring of `Pid`s —
//! the resource that owns it (pipe, VTY, shared-memory registry) pushes the
//! blocked caller's pid under its own lock when a descriptor operation
//! returns `Outcome::Suspended`, and pops pids in FIFO order to decide who
//! wakes next. Waking itself (writing the return value into the woken
//! process's frame and re-enqueuing it on the scheduler's ready queue) is
//! the caller's job — this type only tracks *who* is waiting, in order.

use planck_noalloc::ringbuf::RingBuf;

use crate::id::Pid;

/// A bounded FIFO queue of waiting process ids.
pub struct WaitQueue<const N: usize> {
    ring: RingBuf<Pid, N>,
}

impl<const N: usize> WaitQueue<N> {
    /// Creates a new, empty wait queue.
    pub const fn new() -> Self {
        Self { ring: RingBuf::new() }
    }

    /// Enqueues `pid`. Returns `false` if the queue is already full — a
    /// resource invariant violation (spec bounds every pool with a fixed
    /// capacity; callers must size `N` to the resource's own waiter limit).
    pub fn push(&mut self, pid: Pid) -> bool {
        self.ring.try_push(pid).is_ok()
    }

    /// Dequeues and returns the pid that has waited longest, if any.
    pub fn pop(&mut self) -> Option<Pid> {
        self.ring.pop()
    }

    /// Removes every occurrence of `pid` from the queue, preserving the
    /// relative order of the rest. Used when a process closes its own
    /// descriptor while still queued as a waiter on it (spec 4.5 close:
    /// "remove any waiters whose owning process is the closer").
    pub fn remove_all(&mut self, pid: Pid) {
        let mut drained = [const { None }; N];
        let mut count = 0;
        while let Some(p) = self.ring.pop() {
            drained[count] = Some(p);
            count += 1;
        }
        for slot in drained.into_iter().take(count).flatten() {
            if slot != pid {
                let _ = self.ring.try_push(slot);
            }
        }
    }

    /// Returns `true` if no process is waiting.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl<const N: usize> Default for WaitQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
