//! The process table and cooperative ready queue (spec 4.3).
//!
//! All mutation goes through a single coarse [`SpinLock`], matching spec
//! 5's "per-process tables are single-writer" model: there is no per-slot
//! locking, and the whole table is expected to be held only briefly.

use nyx_core::addr::{PhysAddr, VirtAddr};
use nyx_core::id::Pid;
use nyx_core::sync::{SpinLock, WaitQueue};

use crate::process::{ProcState, ProcessSlot};
use crate::MAX_PROCESSES;

/// Errors from process-table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcError {
    /// Every slot is occupied by a non-[`ProcState::Unused`],
    /// non-reclaimable process.
    TableFull,
    /// No slot holds the given pid.
    NoSuchProcess,
    /// The named process is not currently [`ProcState::Blocked`].
    NotBlocked,
}

/// The ready queue needs true capacity `MAX_PROCESSES`; `WaitQueue`'s
/// backing ring reserves one slot to distinguish full from empty, so the
/// const generic is sized one larger.
type ReadyQueue = WaitQueue<{ MAX_PROCESSES + 1 }>;

struct Inner {
    slots: [ProcessSlot; MAX_PROCESSES],
    ready: ReadyQueue,
    current: Option<usize>,
    next_pid: u32,
}

impl Inner {
    fn find_index(&self, pid: Pid) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.pid() == pid && !matches!(s.state(), ProcState::Unused)
        })
    }
}

/// The process table, guarded by a single lock.
pub struct Table {
    inner: SpinLock<Inner>,
}

impl Table {
    /// Creates an empty process table with every slot `Unused`.
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(Inner {
                slots: [const { ProcessSlot::unused() }; MAX_PROCESSES],
                ready: ReadyQueue::new(),
                current: None,
                next_pid: 1,
            }),
        }
    }

    /// `Unused -> Ready`. Picks the lowest free (or lazily reclaimable
    /// `Terminated`) slot, resets its context, assigns a never-reused pid,
    /// and places it on the ready queue (spec 4.3, lifecycle step 1).
    pub fn allocate(
        &self,
        page_table_root: PhysAddr,
        user_ip: VirtAddr,
        user_sp: VirtAddr,
        kernel_stack_base: VirtAddr,
        kernel_stack_top: VirtAddr,
    ) -> Result<Pid, ProcError> {
        let mut inner = self.inner.lock();
        let index = inner
            .slots
            .iter()
            .position(|s| matches!(s.state(), ProcState::Unused | ProcState::Terminated))
            .ok_or(ProcError::TableFull)?;

        let pid = Pid::new(inner.next_pid);
        inner.next_pid = match inner.next_pid.wrapping_add(1) {
            0 => 1,
            n => n,
        };

        let slot = &mut inner.slots[index];
        *slot = ProcessSlot::unused();
        slot.pid = pid;
        slot.state = ProcState::Ready;
        slot.page_table_root = page_table_root;
        slot.user_ip = user_ip;
        slot.user_sp = user_sp;
        slot.kernel_stack_base = kernel_stack_base;
        slot.kernel_stack_top = kernel_stack_top;

        let pushed = inner.ready.push(pid);
        debug_assert!(pushed, "ready queue sized for MAX_PROCESSES entries");
        Ok(pid)
    }

    /// `Ready -> Running`. Dequeues the next ready pid and sets it as the
    /// current process (spec 4.3, lifecycle step 2). Returns `None` if the
    /// ready queue is empty.
    pub fn pick_next(&self) -> Option<Pid> {
        let mut inner = self.inner.lock();
        let pid = inner.ready.pop()?;
        let index = inner.find_index(pid)?;
        inner.slots[index].state = ProcState::Running;
        inner.current = Some(index);
        Some(pid)
    }

    /// The currently running process, if any.
    pub fn current_pid(&self) -> Option<Pid> {
        let inner = self.inner.lock();
        inner.current.map(|i| inner.slots[i].pid())
    }

    /// `Running -> Blocked`. The caller must be the current process. Stores
    /// `waiting_on` (spec 4.3, lifecycle step 3).
    pub fn block(&self, pid: Pid, waiting_on: usize) -> Result<(), ProcError> {
        let mut inner = self.inner.lock();
        let index = inner.find_index(pid).ok_or(ProcError::NoSuchProcess)?;
        inner.slots[index].state = ProcState::Blocked;
        inner.slots[index].waiting_on = Some(waiting_on);
        if inner.current == Some(index) {
            inner.current = None;
        }
        Ok(())
    }

    /// `Blocked -> Ready`. Clears `waiting_on` and re-enqueues. The wake
    /// source is responsible for writing the syscall return value into the
    /// slot's frame (via [`Table::with_slot_mut`]) before calling this
    /// (spec 4.3, lifecycle step 4).
    pub fn enqueue(&self, pid: Pid) -> Result<(), ProcError> {
        let mut inner = self.inner.lock();
        let index = inner.find_index(pid).ok_or(ProcError::NoSuchProcess)?;
        if inner.slots[index].state() != ProcState::Blocked {
            return Err(ProcError::NotBlocked);
        }
        inner.slots[index].state = ProcState::Ready;
        inner.slots[index].waiting_on = None;
        let pushed = inner.ready.push(pid);
        debug_assert!(pushed, "ready queue sized for MAX_PROCESSES entries");
        Ok(())
    }

    /// `Running -> Ready`, requeued at the back (spec 4.3's `Yield`
    /// syscall and scenario S6: "caller remains Ready").
    pub fn yield_now(&self, pid: Pid) -> Result<(), ProcError> {
        let mut inner = self.inner.lock();
        let index = inner.find_index(pid).ok_or(ProcError::NoSuchProcess)?;
        inner.slots[index].state = ProcState::Ready;
        if inner.current == Some(index) {
            inner.current = None;
        }
        let pushed = inner.ready.push(pid);
        debug_assert!(pushed, "ready queue sized for MAX_PROCESSES entries");
        Ok(())
    }

    /// `Running -> Terminated`. The caller (`nyx-kernel`) is responsible
    /// for releasing code/stack regions and descriptors before or after
    /// this call; the slot itself is only reclaimed lazily by a future
    /// [`Table::allocate`] scan (spec 4.3, lifecycle step 5).
    pub fn exit(&self, pid: Pid) -> Result<(), ProcError> {
        let mut inner = self.inner.lock();
        let index = inner.find_index(pid).ok_or(ProcError::NoSuchProcess)?;
        inner.slots[index].state = ProcState::Terminated;
        if inner.current == Some(index) {
            inner.current = None;
        }
        Ok(())
    }

    /// Runs `f` with mutable access to `pid`'s slot. Used by wake paths to
    /// write a return value into `rax` before calling [`Table::enqueue`],
    /// and by the dispatcher to save/restore context on syscall entry/exit.
    pub fn with_slot_mut<R>(&self, pid: Pid, f: impl FnOnce(&mut ProcessSlot) -> R) -> Result<R, ProcError> {
        let mut inner = self.inner.lock();
        let index = inner.find_index(pid).ok_or(ProcError::NoSuchProcess)?;
        Ok(f(&mut inner.slots[index]))
    }

    /// Runs `f` with read-only access to `pid`'s slot.
    pub fn with_slot<R>(&self, pid: Pid, f: impl FnOnce(&ProcessSlot) -> R) -> Result<R, ProcError> {
        let inner = self.inner.lock();
        let index = inner.find_index(pid).ok_or(ProcError::NoSuchProcess)?;
        Ok(f(&inner.slots[index]))
    }

    /// `true` if the ready queue has nobody waiting.
    pub fn ready_queue_is_empty(&self) -> bool {
        self.inner.lock().ready.is_empty()
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::new()
    }

    #[test]
    fn allocate_assigns_increasing_pids_and_ready_state() {
        let t = table();
        let p1 = t.allocate(PhysAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero()).unwrap();
        let p2 = t.allocate(PhysAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero()).unwrap();
        assert_ne!(p1, p2);
        t.with_slot(p1, |s| assert_eq!(s.state(), ProcState::Ready)).unwrap();
    }

    #[test]
    fn table_full_when_all_slots_occupied() {
        let t = table();
        for _ in 0..MAX_PROCESSES {
            t.allocate(PhysAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero()).unwrap();
        }
        assert_eq!(
            t.allocate(PhysAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero()),
            Err(ProcError::TableFull)
        );
    }

    #[test]
    fn terminated_slot_is_lazily_reclaimed() {
        let t = table();
        for _ in 0..MAX_PROCESSES {
            t.allocate(PhysAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero()).unwrap();
        }
        let victim = t.pick_next().unwrap();
        t.exit(victim).unwrap();
        let reused = t.allocate(PhysAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero()).unwrap();
        assert_ne!(reused, victim);
    }

    #[test]
    fn ready_to_running_to_blocked_to_ready_cycle() {
        let t = table();
        let p = t.allocate(PhysAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero()).unwrap();
        assert_eq!(t.pick_next(), Some(p));
        t.with_slot(p, |s| assert_eq!(s.state(), ProcState::Running)).unwrap();

        t.block(p, 42).unwrap();
        t.with_slot(p, |s| {
            assert_eq!(s.state(), ProcState::Blocked);
            assert_eq!(s.waiting_on, Some(42));
        })
        .unwrap();
        assert_eq!(t.current_pid(), None);

        t.enqueue(p).unwrap();
        t.with_slot(p, |s| {
            assert_eq!(s.state(), ProcState::Ready);
            assert_eq!(s.waiting_on, None);
        })
        .unwrap();
    }

    #[test]
    fn enqueue_requires_blocked_state() {
        let t = table();
        let p = t.allocate(PhysAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero()).unwrap();
        assert_eq!(t.enqueue(p), Err(ProcError::NotBlocked));
    }

    #[test]
    fn yield_requeues_at_back_in_fifo_order() {
        let t = table();
        let p = t.allocate(PhysAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero()).unwrap();
        let q = t.allocate(PhysAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero()).unwrap();

        assert_eq!(t.pick_next(), Some(p));
        t.yield_now(p).unwrap();

        assert_eq!(t.pick_next(), Some(q));
        t.yield_now(q).unwrap();

        assert_eq!(t.pick_next(), Some(p));
    }

    #[test]
    fn operations_on_unknown_pid_fail() {
        let t = table();
        let ghost = Pid::new(999);
        assert_eq!(t.block(ghost, 0), Err(ProcError::NoSuchProcess));
        assert_eq!(t.enqueue(ghost), Err(ProcError::NoSuchProcess));
        assert_eq!(t.exit(ghost), Err(ProcError::NoSuchProcess));
    }

    #[test]
    fn exit_clears_current_pointer() {
        let t = table();
        let p = t.allocate(PhysAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero(), VirtAddr::zero()).unwrap();
        t.pick_next();
        t.exit(p).unwrap();
        assert_eq!(t.current_pid(), None);
        t.with_slot(p, |s| assert_eq!(s.state(), ProcState::Terminated)).unwrap();
    }
}
