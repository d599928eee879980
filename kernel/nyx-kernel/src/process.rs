//! L5: the kernel object that ties every subsystem together (spec section
//! 9, "Global state... constructed in a fixed init order by the boot entry
//! point"): the process table, per-process address spaces and descriptor
//! tables, the shared IPC tables, the VTY grid, console ownership, and the
//! external driver collaborators.
//!
//! Generic over the page-mapper implementation the same way
//! `nyx_mm::vmm::AddressSpace<M>` already is — this crate set carries no
//! concrete arch-specific `PageMapper` of its own, so `Kernel<M>` simply
//! forwards the bound along.

use nyx_core::addr::{PhysAddr, VirtAddr};
use nyx_core::id::Pid;
use nyx_core::paging::Size4KiB;
use nyx_core::sync::SpinLock;
use nyx_driver_api::block::BlockDevice;
use nyx_driver_api::console::ConsolePort;
use nyx_driver_api::framebuffer::Framebuffer;
use nyx_driver_api::input::{InputQueue, KeyEvent, MouseEvent};
use nyx_driver_api::serial::SerialPort;
use nyx_ipc::pipe::{PipeTable, UserCopy};
use nyx_ipc::shm::{SegmentMapper, ShmError, ShmTable};
use nyx_ipc::MAX_SEGMENT_PAGES;
use nyx_mm::mapper::{PageMapper, PageTranslator};
use nyx_mm::pmm::Pool;
use nyx_mm::vmm::{AddressSpace, UserRegion};
use nyx_mm::PAGE_SIZE;
use nyx_sched::Table as ProcTable;
use nyx_tty::VtyTable;

use crate::descriptor::console::ConsoleOwner;
use crate::descriptor::{DescError, DescFlags, DescriptorTable, Resource, TypeRegistry};
use crate::handle::Handle;

/// Maximum number of block devices this core exposes at once. Not a spec
/// quantity — the original's registry sizes this the same way
/// ([`original_source`]'s `kMaxBlockDescriptors`), but what's addressable
/// by `open(index)` and what's *simultaneously registered hardware* are
/// different numbers; this core only needs the latter, kept small.
pub const MAX_BLOCK_DEVICES: usize = 4;

/// The external, already-initialized drivers this core wraps with
/// descriptor types, set once at boot (spec section 1: driver
/// implementations themselves are out of scope; this core only consumes
/// them through `nyx-driver-api`'s traits).
pub struct DriverRegistry<'a> {
    pub console: Option<&'a dyn ConsolePort>,
    pub framebuffer: Option<&'a dyn Framebuffer>,
    pub keyboard: Option<&'a dyn InputQueue<Event = KeyEvent>>,
    pub mouse: Option<&'a dyn InputQueue<Event = MouseEvent>>,
    pub serial: Option<&'a dyn SerialPort>,
    pub block_devices: [Option<&'a dyn BlockDevice>; MAX_BLOCK_DEVICES],
}

impl<'a> DriverRegistry<'a> {
    /// A registry with nothing attached yet.
    pub const fn empty() -> Self {
        Self {
            console: None,
            framebuffer: None,
            keyboard: None,
            mouse: None,
            serial: None,
            block_devices: [None; MAX_BLOCK_DEVICES],
        }
    }
}

impl Default for DriverRegistry<'_> {
    fn default() -> Self {
        Self::empty()
    }
}

/// One process's address space and descriptor table, kept together so a
/// single pid-keyed lookup reaches both (spec 3: a process owns exactly
/// one of each).
struct ProcessContext<M: PageMapper<Size4KiB> + PageTranslator> {
    pid: Pid,
    space: AddressSpace<M>,
    descriptors: DescriptorTable,
    /// The region `nyx_mm::vmm::AddressSpace::map_user_code` handed back
    /// when this process's loader mapped its code, if this context was
    /// given one (spec 4.3 "Exit ... releases code/stack regions"). ELF
    /// loading itself is out of scope (spec section 1); the loader only
    /// needs to report the resulting region back through
    /// [`Kernel::set_process_regions`] so exit can release it.
    code_region: Option<UserRegion>,
    /// The region `nyx_mm::vmm::AddressSpace::allocate_user_stack` handed
    /// back for this process's stack, if reported.
    stack_region: Option<UserRegion>,
}

/// Errors from process-context bookkeeping, distinct from
/// [`nyx_sched::ProcError`] because they describe `nyx-kernel`'s own
/// pid-keyed array, not the scheduler's slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessContextError {
    /// Every context slot is occupied.
    TableFull,
    /// No context is registered for this pid.
    NotFound,
}

/// Ties the process table, per-process contexts, IPC tables, VTY grid,
/// console ownership, and driver registry into one object (spec section 9
/// "Global state"). `nyx_sched::process::ProcessSlot`'s own doc comment
/// suggests keeping "its own descriptor-table array indexed in parallel by
/// slot index" — `nyx_sched::Table` exposes no slot indices through its
/// public API, only pid-keyed accessors, so this keeps a small pid-keyed
/// linear-scan array instead (bounded by [`nyx_sched::MAX_PROCESSES`], so
/// the scan cost is the same either way).
pub struct Kernel<'a, M: PageMapper<Size4KiB> + PageTranslator> {
    pub sched: ProcTable,
    pub pipes: PipeTable,
    pub shm: ShmTable,
    pub vtys: VtyTable,
    pub types: SpinLock<TypeRegistry>,
    pub console: ConsoleOwner,
    user_pool: &'a Pool,
    drivers: DriverRegistry<'a>,
    contexts: SpinLock<[Option<ProcessContext<M>>; nyx_sched::MAX_PROCESSES]>,
    /// The kernel's own parallel descriptor table (SPEC_FULL.md
    /// "Supplemented features: Kernel-owned descriptor table"; spec 4.4:
    /// "the kernel process owns a parallel table for descriptors it opens
    /// on its own behalf (e.g., block devices it locks for exclusive use);
    /// `close_kernel` targets that table"), addressed internally with the
    /// reserved pid `0` no real process is ever assigned
    /// (`nyx_sched::Table::allocate` starts numbering at 1).
    kernel_descriptors: SpinLock<DescriptorTable>,
}

/// The pid under which kernel-owned descriptors are addressed (spec 4.4).
/// Never assigned to a real process.
pub const KERNEL_PID: Pid = Pid::new(0);

impl<'a, M: PageMapper<Size4KiB> + PageTranslator> Kernel<'a, M> {
    /// Builds a fresh kernel object. Called exactly once, from the boot
    /// entry point, after the physical pools and every driver have been
    /// initialized (spec section 9's fixed init order).
    pub fn new(user_pool: &'a Pool, drivers: DriverRegistry<'a>) -> Self {
        let mut types = TypeRegistry::new();
        types.register_builtins();
        Self {
            sched: ProcTable::new(),
            pipes: PipeTable::new(),
            shm: ShmTable::new(),
            vtys: VtyTable::new(),
            types: SpinLock::new(types),
            console: ConsoleOwner::new(),
            user_pool,
            drivers,
            contexts: SpinLock::new([const { None }; nyx_sched::MAX_PROCESSES]),
            kernel_descriptors: SpinLock::new(DescriptorTable::new()),
        }
    }

    pub fn drivers(&self) -> &DriverRegistry<'a> {
        &self.drivers
    }

    /// Registers `space` and a fresh, empty descriptor table under `pid`
    /// (spec 4.2/4.3: a process gains its address space and descriptor
    /// table together, at creation).
    pub fn register_process(&self, pid: Pid, space: AddressSpace<M>) -> Result<(), ProcessContextError> {
        let mut contexts = self.contexts.lock();
        let slot = contexts.iter_mut().find(|c| c.is_none()).ok_or(ProcessContextError::TableFull)?;
        *slot = Some(ProcessContext { pid, space, descriptors: DescriptorTable::new(), code_region: None, stack_region: None });
        Ok(())
    }

    /// Records the code/stack regions a loader carved out of `pid`'s
    /// address space, so [`Self::exit_process`] can release them later.
    /// Optional: a context with no regions reported here simply has
    /// nothing of that kind to release on exit (e.g. the kernel's own
    /// pseudo-process, or a process whose loader tracks regions itself).
    pub fn set_process_regions(&self, pid: Pid, code_region: Option<UserRegion>, stack_region: Option<UserRegion>) -> Result<(), ProcessContextError> {
        let mut contexts = self.contexts.lock();
        let ctx = contexts.iter_mut().flatten().find(|c| c.pid == pid).ok_or(ProcessContextError::NotFound)?;
        ctx.code_region = code_region;
        ctx.stack_region = stack_region;
        Ok(())
    }

    /// Removes and drops `pid`'s address space and descriptor table
    /// without running any resource-specific teardown or region release
    /// first. Only reclaims the bookkeeping slot — prefer
    /// [`Self::exit_process`] for a real process exit; this is the bare
    /// primitive it builds on.
    pub fn remove_process(&self, pid: Pid) -> Result<(), ProcessContextError> {
        let mut contexts = self.contexts.lock();
        let slot = contexts.iter_mut().find(|c| matches!(c, Some(ctx) if ctx.pid == pid)).ok_or(ProcessContextError::NotFound)?;
        *slot = None;
        Ok(())
    }

    /// Full exit cleanup (spec 4.3: "`exit` marks Terminated, releases
    /// code/stack regions and descriptors"). Closes every descriptor `pid`
    /// still holds — running the same per-resource teardown an explicit
    /// `DescriptorClose` syscall would (`crate::syscall::close_resource`) —
    /// then releases its code and stack regions if any were reported via
    /// [`Self::set_process_regions`], then reclaims the process-context
    /// slot. Descriptors are drained from the table and teardown is run
    /// only after the table's lock is released (see
    /// [`DescriptorTable::close_all`]'s doc comment for why: shared-memory
    /// teardown re-enters this same per-process lookup to unmap the
    /// segment from `pid`'s address space, which would deadlock against a
    /// lock still held here).
    pub fn exit_process(&self, pid: Pid) {
        let mut closed: [Option<crate::descriptor::DescEntry>; crate::descriptor::MAX_DESCRIPTORS] =
            [const { None }; crate::descriptor::MAX_DESCRIPTORS];
        let n = self.with_descriptors_mut(pid, |table| table.close_all(&mut closed)).unwrap_or(0);
        for slot in closed.iter_mut().take(n) {
            if let Some(entry) = slot.take() {
                crate::syscall::close_resource(self, pid, entry.resource);
            }
        }

        let mut contexts = self.contexts.lock();
        if let Some(slot) = contexts.iter_mut().find(|c| matches!(c, Some(ctx) if ctx.pid == pid)) {
            if let Some(ctx) = slot.as_mut() {
                if let Some(region) = ctx.code_region.take() {
                    let _ = ctx.space.release_user_region(self.user_pool, region);
                }
                if let Some(region) = ctx.stack_region.take() {
                    let _ = ctx.space.release_user_region(self.user_pool, region);
                }
            }
            *slot = None;
        }
    }

    /// Runs `f` with shared access to `pid`'s address space.
    pub fn with_space<R>(&self, pid: Pid, f: impl FnOnce(&AddressSpace<M>) -> R) -> Result<R, ProcessContextError> {
        let contexts = self.contexts.lock();
        let ctx = contexts.iter().flatten().find(|c| c.pid == pid).ok_or(ProcessContextError::NotFound)?;
        Ok(f(&ctx.space))
    }

    /// Runs `f` with mutable access to `pid`'s address space.
    pub fn with_space_mut<R>(&self, pid: Pid, f: impl FnOnce(&mut AddressSpace<M>) -> R) -> Result<R, ProcessContextError> {
        let mut contexts = self.contexts.lock();
        let ctx = contexts.iter_mut().flatten().find(|c| c.pid == pid).ok_or(ProcessContextError::NotFound)?;
        Ok(f(&mut ctx.space))
    }

    /// Runs `f` with shared access to `pid`'s descriptor table.
    pub fn with_descriptors<R>(&self, pid: Pid, f: impl FnOnce(&DescriptorTable) -> R) -> Result<R, ProcessContextError> {
        let contexts = self.contexts.lock();
        let ctx = contexts.iter().flatten().find(|c| c.pid == pid).ok_or(ProcessContextError::NotFound)?;
        Ok(f(&ctx.descriptors))
    }

    /// Runs `f` with mutable access to `pid`'s descriptor table.
    pub fn with_descriptors_mut<R>(&self, pid: Pid, f: impl FnOnce(&mut DescriptorTable) -> R) -> Result<R, ProcessContextError> {
        let mut contexts = self.contexts.lock();
        let ctx = contexts.iter_mut().flatten().find(|c| c.pid == pid).ok_or(ProcessContextError::NotFound)?;
        Ok(f(&mut ctx.descriptors))
    }

    /// Installs `resource` directly into the kernel's own descriptor table
    /// (SPEC_FULL.md "Kernel-owned descriptor table"), for resources the
    /// kernel opens on its own behalf rather than on any process's —
    /// e.g. locking a block device for exclusive kernel-only use before any
    /// user process can see it.
    pub fn open_kernel(&self, type_id: u16, flags: DescFlags, name: &[u8], resource: Resource) -> Result<Handle, DescError> {
        self.kernel_descriptors.lock().install(type_id, flags, name, resource)
    }

    /// Runs `f` with shared access to the kernel's own descriptor table.
    pub fn with_kernel_descriptors<R>(&self, f: impl FnOnce(&DescriptorTable) -> R) -> R {
        f(&self.kernel_descriptors.lock())
    }

    /// Closes a kernel-owned descriptor, running the same per-resource
    /// teardown a process's own `DescriptorClose` syscall would (spec 4.4:
    /// "`close_kernel` targets that table").
    pub fn close_kernel(&self, handle: Handle) -> Result<(), DescError> {
        let entry = self.kernel_descriptors.lock().close(handle)?;
        crate::syscall::close_resource(self, KERNEL_PID, entry.resource);
        Ok(())
    }
}

impl<M: PageMapper<Size4KiB> + PageTranslator> UserCopy for Kernel<'_, M> {
    fn copy_to_user(&self, pid: Pid, dest: VirtAddr, src: &[u8]) -> Result<(), ()> {
        self.with_space(pid, |space| space.copy_to_user(dest, src)).map_err(|_| ())?.map_err(|_| ())
    }

    fn copy_from_user(&self, pid: Pid, src: VirtAddr, dest: &mut [u8]) -> Result<(), ()> {
        self.with_space(pid, |space| space.copy_from_user(src, dest)).map_err(|_| ())?.map_err(|_| ())
    }
}

impl<M: PageMapper<Size4KiB> + PageTranslator> SegmentMapper for Kernel<'_, M> {
    fn alloc_frames(&self, page_count: usize) -> Result<PhysAddr, ShmError> {
        self.user_pool.alloc_pages(page_count).map_err(|_| ShmError::OutOfMemory)
    }

    /// A whole segment's backing run is always freed through the single
    /// base address `alloc_frames` returned for it — `Pool::free` tracks
    /// each block's order internally, so `page_count` need not be walked
    /// frame by frame here.
    fn free_frames(&self, base: PhysAddr, _page_count: usize) {
        let _ = self.user_pool.free(base);
    }

    /// `nyx_mm::vmm::AddressSpace::map_shared_frames` wants the frame list
    /// spelled out explicitly rather than a `(base, count)` pair, since it
    /// also serves non-contiguous callers; every frame a segment ever
    /// hands out here came from one contiguous [`Self::alloc_frames`] call,
    /// so the list is reconstructed from `base` and a stride of
    /// [`PAGE_SIZE`]. `page_count` is bounded by
    /// [`nyx_ipc::MAX_SEGMENT_PAGES`] by `ShmTable` before this is ever
    /// called, so a fixed-size stack buffer sized to that bound is enough.
    fn map_into(&self, pid: Pid, base: PhysAddr, page_count: usize) -> Result<VirtAddr, ShmError> {
        if page_count > MAX_SEGMENT_PAGES {
            return Err(ShmError::TooLarge);
        }
        let mut frames = [PhysAddr::zero(); MAX_SEGMENT_PAGES];
        for (i, slot) in frames.iter_mut().take(page_count).enumerate() {
            *slot = PhysAddr::new(base.as_u64() + i as u64 * PAGE_SIZE);
        }
        self.with_space_mut(pid, |space| space.map_shared_frames(self.user_pool, &frames[..page_count]))
            .map_err(|_| ShmError::NotFound)?
            .map(|region| region.base)
            .map_err(|_| ShmError::OutOfMemory)
    }

    fn unmap_from(&self, pid: Pid, virt: VirtAddr, page_count: usize) {
        let _ = self.with_space_mut(pid, |space| space.unmap_shared_frames(virt, page_count as u64));
    }
}
