//! A single process-table slot.

use nyx_core::addr::{PhysAddr, VirtAddr};
use nyx_core::id::Pid;

use crate::context::Context;
use crate::MAX_CWD_LEN;

/// The state of a process slot (spec 4.3 lifecycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// The slot holds no process and is available to [`crate::Table::allocate`].
    Unused,
    /// On the ready queue, waiting to be dequeued and run.
    Ready,
    /// Currently the slot pointed to by the scheduler's current-process pointer.
    Running,
    /// Waiting on the object named by `waiting_on`; not eligible to run.
    Blocked,
    /// Exited; resources released, awaiting lazy reclamation on the next
    /// allocate-scan (spec 4.3: "Running -> Terminated").
    Terminated,
}

/// One process-table slot.
///
/// Everything here is plain data manipulated by [`crate::Table`] under a
/// single coarse lock (spec 5: per-process tables are single-writer, no
/// cross-process access). The per-slot descriptor table named in spec
/// section 3 deliberately does not live here: it would pull the L3
/// descriptor-subsystem types (owned by `nyx-kernel`, a layer above this
/// crate) into the scheduler. `nyx-kernel` instead keeps its own
/// descriptor-table array indexed in parallel by slot index.
pub struct ProcessSlot {
    pub(crate) pid: Pid,
    pub(crate) state: ProcState,
    /// Physical address of this process's top-level page table.
    pub page_table_root: PhysAddr,
    /// User instruction pointer, used to synthesize a frame for a slot with
    /// no saved context yet.
    pub user_ip: VirtAddr,
    /// User stack pointer, used the same way as `user_ip`.
    pub user_sp: VirtAddr,
    /// Base (lowest address) of this slot's dedicated kernel stack.
    pub kernel_stack_base: VirtAddr,
    /// Top (highest address, initial rsp) of this slot's kernel stack.
    pub kernel_stack_top: VirtAddr,
    /// Opaque current-working-directory bytes (spec 3). Never interpreted here.
    cwd: [u8; MAX_CWD_LEN],
    cwd_len: usize,
    /// VTY id this process is attached to, if any.
    pub attached_vty: Option<u32>,
    /// Saved general-register frame.
    pub context: Context,
    /// `true` once a syscall entry has populated `context` for real; `false`
    /// for a freshly allocated slot that has never yet trapped into the
    /// kernel (spec 4.3: `has_context`).
    pub has_context: bool,
    /// Opaque token identifying what this slot is Blocked on (e.g. a pipe
    /// id). Meaningless in any other state. This crate never dereferences
    /// it; the subsystem that set it is the one that calls `enqueue` back.
    pub waiting_on: Option<usize>,
}

impl ProcessSlot {
    pub(crate) const fn unused() -> Self {
        Self {
            pid: Pid::new(0),
            state: ProcState::Unused,
            page_table_root: PhysAddr::zero(),
            user_ip: VirtAddr::zero(),
            user_sp: VirtAddr::zero(),
            kernel_stack_base: VirtAddr::zero(),
            kernel_stack_top: VirtAddr::zero(),
            cwd: [0; MAX_CWD_LEN],
            cwd_len: 0,
            attached_vty: None,
            context: Context::zeroed(),
            has_context: false,
            waiting_on: None,
        }
    }

    /// This slot's process id. Meaningless while `Unused`.
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// This slot's current state.
    pub const fn state(&self) -> ProcState {
        self.state
    }

    /// The opaque current-working-directory bytes currently stored.
    pub fn cwd(&self) -> &[u8] {
        &self.cwd[..self.cwd_len]
    }

    /// Overwrites the stored current-working-directory bytes, truncating to
    /// [`MAX_CWD_LEN`] if `bytes` is longer.
    pub fn set_cwd(&mut self, bytes: &[u8]) {
        let len = bytes.len().min(MAX_CWD_LEN);
        self.cwd[..len].copy_from_slice(&bytes[..len]);
        self.cwd_len = len;
    }

    /// Returns the frame to resume this slot with: the saved `context` if
    /// one has ever been captured, or a synthesized frame from `user_ip`/
    /// `user_sp` otherwise (spec 4.3).
    pub fn resume_frame(&self) -> Context {
        if self.has_context {
            self.context
        } else {
            Context::synthesize(self.user_ip.as_u64(), self.user_sp.as_u64())
        }
    }
}
