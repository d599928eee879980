//! L3 descriptor subsystem: type registry, per-process handle tables, and
//! the tagged [`Resource`] union that stands in for the original's
//! `(object, close_fn, ops_vtable)` triple (spec 4.4, design note "tagged-
//! variant descriptor ownership", section 9).
//!
//! A C-style registry of `(open_fn, ops_vtable)` function pointers needs a
//! place to store per-type state and a way to guarantee every registered
//! type gets a matching close. In Rust, an enum with one variant per
//! concrete resource kind gives both for free: the variant constructor
//! *is* the per-type allocation record, and `Resource`'s own destructor
//! (driven from [`DescriptorTable::close`]) is the close callback, run
//! exactly once by construction rather than by convention. What remains
//! of the original "registry" is the part an enum can't replace: the set
//! of type ids that are allowed to appear at all, tracked by
//! [`TypeRegistry`] so `register_type` twice still fails the way spec 4.4
//! says it must.

pub mod block;
pub mod console;
pub mod framebuffer;
pub mod keyboard;
pub mod mouse;
pub mod pipe;
pub mod serial;
pub mod shm;
pub mod vty;

use nyx_core::id::Generation;

use crate::handle::Handle;

/// Maximum number of descriptor-table entries per process (spec 4.4:
/// "Array of `kMaxDescriptors` (≈32) entries").
pub const MAX_DESCRIPTORS: usize = 32;

/// Maximum length, in bytes, of a descriptor's human-readable name (spec
/// 3: "optional human-readable name").
pub const MAX_NAME_LEN: usize = 32;

/// Stable 16-bit descriptor type ids (spec 6 "Descriptor type ids (stable)").
pub mod type_id {
    pub const CONSOLE: u16 = 0x001;
    pub const SERIAL: u16 = 0x002;
    pub const KEYBOARD: u16 = 0x003;
    pub const MOUSE: u16 = 0x004;
    pub const FRAMEBUFFER: u16 = 0x010;
    pub const BLOCK_DEVICE: u16 = 0x020;
    pub const PIPE: u16 = 0x030;
    pub const SHARED_MEMORY: u16 = 0x040;
    /// Unassigned upstream; this core resolves the gap to `0x050` (spec
    /// section 9, "VTY type id").
    pub const VTY: u16 = 0x050;
}

/// Stable property ids (spec 6 "Property ids (stable)"), in the order
/// listed there, starting from `CommonName = 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Property {
    CommonName = 1,
    FramebufferInfo = 2,
    FramebufferPresent = 3,
    BlockGeometry = 4,
    SharedMemoryInfo = 5,
    PipeInfo = 6,
    VtyInfo = 7,
    VtyCells = 8,
    VtyInjectInput = 9,
}

impl Property {
    /// Decodes a raw property id as passed through a syscall argument
    /// register, if it names one of the stable ids above.
    pub const fn from_raw(raw: u64) -> Option<Self> {
        Some(match raw {
            1 => Self::CommonName,
            2 => Self::FramebufferInfo,
            3 => Self::FramebufferPresent,
            4 => Self::BlockGeometry,
            5 => Self::SharedMemoryInfo,
            6 => Self::PipeInfo,
            7 => Self::VtyInfo,
            8 => Self::VtyCells,
            9 => Self::VtyInjectInput,
            _ => return None,
        })
    }
}

bitflags::bitflags! {
    /// Per-descriptor capability/shape flags (spec 6: "Readable=1,
    /// Writable=2, Seekable=4, Mappable=8, Device, Block, Async").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescFlags: u64 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const SEEKABLE = 1 << 2;
        const MAPPABLE = 1 << 3;
        const DEVICE   = 1 << 4;
        const BLOCK    = 1 << 5;
        const ASYNC    = 1 << 6;
    }
}

/// Functional error kinds raised by the descriptor subsystem (spec 7),
/// scoped to this layer. The dispatcher (`nyx_kernel::syscall`) is the
/// only place these collapse to the flat `-1` `rax` convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescError {
    /// Generation/index mismatch, or the slot is not in use.
    BadHandle,
    /// The operation is not permitted by the descriptor's flag mask.
    BadCapability,
    /// A null user pointer, misaligned offset, oversize length, or unknown
    /// property id.
    BadArgument,
    /// The physical allocator refused a request this operation needed.
    OutOfMemory,
    /// Every descriptor-table slot is occupied.
    TooManyDescriptors,
    /// The underlying block device reported a failure.
    DeviceError,
    /// A named resource of this name already exists where uniqueness was
    /// required.
    AlreadyExists,
    /// No resource matches the request.
    NotFound,
}

/// The concrete resource a descriptor entry wraps (design note, section
/// 9). Each variant carries exactly the per-open state the original kept
/// in `Allocation::object`/`subsystem_data`; the shared state each
/// subsystem owns (the pipe ring, the segment table, the VTY grid, a
/// driver singleton) lives in [`crate::process::Kernel`], not here. Every
/// variant is a small, cheaply-copyable id or handle rather than an owning
/// pointer, so the type is `Copy`: reading a descriptor's resource out of
/// the table (to dispatch on it, or to hand to `close_resource` after the
/// table lock is released) never needs to borrow the slot for longer than
/// the copy.
#[derive(Debug, Clone, Copy)]
pub enum Resource {
    /// The console device. Exclusive per spec's ownership model unless the
    /// holder also has a VTY attached (see [`console`]).
    Console,
    /// The COM1 serial line. Always readable and writable; no exclusivity.
    Serial,
    /// The keyboard event source.
    Keyboard,
    /// The mouse event source.
    Mouse,
    /// The primary framebuffer.
    Framebuffer,
    /// A block device, addressed by its slot in the driver registry.
    BlockDevice { index: usize },
    /// One endpoint of a pipe.
    Pipe { endpoint: nyx_ipc::pipe::Endpoint },
    /// One process's mapping of a named shared-memory segment.
    SharedMemory { mapping: nyx_ipc::shm::Mapping },
    /// A virtual terminal, addressed by its slot in the VTY table.
    Vty { index: usize },
}

/// One occupied or free descriptor-table slot's payload (spec 3
/// "Descriptor entry"). The slot's generation lives alongside it in
/// [`DescriptorTable`], not here, so a freed slot's last generation
/// survives the entry itself being dropped.
pub struct DescEntry {
    pub type_id: u16,
    pub flags: DescFlags,
    name: [u8; MAX_NAME_LEN],
    name_len: usize,
    pub resource: Resource,
}

impl DescEntry {
    fn new(type_id: u16, flags: DescFlags, name: &[u8], resource: Resource) -> Self {
        let mut buf = [0u8; MAX_NAME_LEN];
        let len = name.len().min(MAX_NAME_LEN);
        buf[..len].copy_from_slice(&name[..len]);
        Self { type_id, flags, name: buf, name_len: len, resource }
    }

    /// The descriptor's human-readable name (spec 3, `get_property(CommonName)`).
    pub fn name(&self) -> &[u8] {
        &self.name[..self.name_len]
    }
}

/// Tracks which 16-bit type ids have been registered at boot (spec 4.4
/// "Registry"). Dispatch itself happens through [`Resource`]'s match arms;
/// this only guards the "registering a type twice fails" invariant and
/// gives a human-readable name for diagnostics.
pub struct TypeRegistry {
    ids: [Option<(u16, &'static str)>; 16],
}

impl TypeRegistry {
    pub const fn new() -> Self {
        Self { ids: [None; 16] }
    }

    /// Registers `type_id` under `name`. Fails if it is already registered
    /// or the table is full.
    pub fn register(&mut self, type_id: u16, name: &'static str) -> Result<(), DescError> {
        if self.ids.iter().flatten().any(|(id, _)| *id == type_id) {
            return Err(DescError::AlreadyExists);
        }
        let slot = self.ids.iter_mut().find(|s| s.is_none()).ok_or(DescError::TooManyDescriptors)?;
        *slot = Some((type_id, name));
        Ok(())
    }

    /// `true` if `type_id` has been registered.
    pub fn is_registered(&self, type_id: u16) -> bool {
        self.ids.iter().flatten().any(|(id, _)| *id == type_id)
    }

    /// Registers every built-in descriptor type (spec 4.4: "done once at
    /// boot"), mirroring `descriptor::register_builtin_types` in
    /// `original_source/src/kernel/descriptor/registry.cpp`.
    pub fn register_builtins(&mut self) {
        let _ = self.register(type_id::CONSOLE, "console");
        let _ = self.register(type_id::SERIAL, "serial");
        let _ = self.register(type_id::KEYBOARD, "keyboard");
        let _ = self.register(type_id::MOUSE, "mouse");
        let _ = self.register(type_id::FRAMEBUFFER, "framebuffer");
        let _ = self.register(type_id::BLOCK_DEVICE, "block_device");
        let _ = self.register(type_id::PIPE, "pipe");
        let _ = self.register(type_id::SHARED_MEMORY, "shared_memory");
        let _ = self.register(type_id::VTY, "vty");
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A process's (or the kernel's) descriptor table (spec 4.4 "Per-process
/// table"). Not internally locked — callers hold whatever coarser lock
/// guards the owning process slot (spec 5: "per-process tables are
/// single-writer").
pub struct DescriptorTable {
    entries: [Option<DescEntry>; MAX_DESCRIPTORS],
    /// Current generation of each slot (spec 4.4: "Generations start at 1
    /// and increment on every reset, skipping 0"). A never-yet-used slot
    /// sits at [`Generation::FIRST`] until its first [`Self::close`].
    generations: [Generation; MAX_DESCRIPTORS],
}

impl DescriptorTable {
    pub const fn new() -> Self {
        Self {
            entries: [const { None }; MAX_DESCRIPTORS],
            generations: [Generation::FIRST; MAX_DESCRIPTORS],
        }
    }

    /// Finds a free slot, stores `entry` under the slot's current
    /// generation, and returns the fresh handle (spec 4.4 "Open" /
    /// "install").
    pub fn install(&mut self, type_id: u16, flags: DescFlags, name: &[u8], resource: Resource) -> Result<Handle, DescError> {
        let index = self.entries.iter().position(Option::is_none).ok_or(DescError::TooManyDescriptors)?;
        let gen = self.generations[index];
        self.entries[index] = Some(DescEntry::new(type_id, flags, name, resource));
        Ok(Handle::pack(index as u16, gen))
    }

    fn lookup(&self, handle: Handle) -> Result<usize, DescError> {
        let (index, generation) = handle.unpack().ok_or(DescError::BadHandle)?;
        let index = index as usize;
        if index >= MAX_DESCRIPTORS || self.generations[index].as_u16() != generation {
            return Err(DescError::BadHandle);
        }
        if self.entries[index].is_none() {
            return Err(DescError::BadHandle);
        }
        Ok(index)
    }

    /// Borrows the entry named by `handle`, validating index and
    /// generation (spec 4.4 invariant: "a mismatched generation always
    /// fails the lookup").
    pub fn get(&self, handle: Handle) -> Result<&DescEntry, DescError> {
        let index = self.lookup(handle)?;
        Ok(self.entries[index].as_ref().expect("validated occupied"))
    }

    /// Mutably borrows the entry named by `handle`.
    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut DescEntry, DescError> {
        let index = self.lookup(handle)?;
        Ok(self.entries[index].as_mut().expect("validated occupied"))
    }

    /// Raw flag bits for `DescriptorQuery` (spec 4.7, syscall 5).
    pub fn query(&self, handle: Handle) -> Result<u64, DescError> {
        Ok(self.get(handle)?.flags.bits())
    }

    /// Removes and returns the entry named by `handle`, bumping its
    /// generation so the just-closed handle can never be looked up again
    /// (spec 4.4 "Close"). The caller is responsible for running any
    /// resource-specific teardown against the returned [`DescEntry`]
    /// before it is dropped.
    pub fn close(&mut self, handle: Handle) -> Result<DescEntry, DescError> {
        let index = self.lookup(handle)?;
        self.generations[index] = self.generations[index].next();
        Ok(self.entries[index].take().expect("validated occupied"))
    }

    /// Closes every occupied slot at once (spec 4.3 "Exit ... releases ...
    /// descriptors"), bumping each slot's generation exactly as
    /// [`Self::close`] does, and writes the removed entries into `out` in
    /// slot order. Returns the count written.
    ///
    /// Deliberately does not run per-resource teardown itself: a caller
    /// holding whatever lock guards this table (e.g. `nyx_kernel::process::
    /// Kernel`'s per-process context lock) must finish this call and drop
    /// that lock *before* invoking teardown, since some resources' close
    /// paths (shared-memory unmapping) re-enter the same per-process lookup
    /// to touch the address space.
    pub fn close_all(&mut self, out: &mut [Option<DescEntry>; MAX_DESCRIPTORS]) -> usize {
        let mut n = 0;
        for (entry, gen) in self.entries.iter_mut().zip(self.generations.iter_mut()) {
            if let Some(e) = entry.take() {
                *gen = gen.next();
                out[n] = Some(e);
                n += 1;
            }
        }
        n
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_then_get_roundtrips() {
        let mut table = DescriptorTable::new();
        let handle = table.install(type_id::CONSOLE, DescFlags::WRITABLE, b"console", Resource::Console).unwrap();
        let entry = table.get(handle).unwrap();
        assert_eq!(entry.type_id, type_id::CONSOLE);
        assert_eq!(entry.name(), b"console");
    }

    #[test]
    fn close_bumps_generation_and_rejects_stale_handle() {
        let mut table = DescriptorTable::new();
        let handle = table.install(type_id::SERIAL, DescFlags::READABLE, b"serial", Resource::Serial).unwrap();
        table.close(handle).unwrap();
        assert_eq!(table.get(handle).unwrap_err(), DescError::BadHandle);
    }

    #[test]
    fn reused_slot_gets_a_new_generation() {
        let mut table = DescriptorTable::new();
        let first = table.install(type_id::SERIAL, DescFlags::READABLE, b"a", Resource::Serial).unwrap();
        table.close(first).unwrap();
        let second = table.install(type_id::SERIAL, DescFlags::READABLE, b"b", Resource::Serial).unwrap();
        assert_ne!(first, second);
        assert!(table.get(first).is_err());
        assert!(table.get(second).is_ok());
    }

    #[test]
    fn invalid_handle_is_rejected() {
        let table = DescriptorTable::new();
        assert_eq!(table.get(Handle::INVALID).unwrap_err(), DescError::BadHandle);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let table = DescriptorTable::new();
        let bogus = Handle::pack(MAX_DESCRIPTORS as u16 + 5, Generation::FIRST);
        assert_eq!(table.get(bogus).unwrap_err(), DescError::BadHandle);
    }

    #[test]
    fn type_registry_rejects_double_registration() {
        let mut registry = TypeRegistry::new();
        registry.register(type_id::CONSOLE, "console").unwrap();
        assert_eq!(registry.register(type_id::CONSOLE, "console").unwrap_err(), DescError::AlreadyExists);
    }

    #[test]
    fn builtins_are_all_registered() {
        let mut registry = TypeRegistry::new();
        registry.register_builtins();
        assert!(registry.is_registered(type_id::VTY));
        assert!(registry.is_registered(type_id::PIPE));
        assert!(registry.is_registered(type_id::SHARED_MEMORY));
    }

    #[test]
    fn close_all_drains_every_occupied_slot_and_bumps_generations() {
        let mut table = DescriptorTable::new();
        let a = table.install(type_id::SERIAL, DescFlags::READABLE, b"a", Resource::Serial).unwrap();
        let b = table.install(type_id::CONSOLE, DescFlags::WRITABLE, b"b", Resource::Console).unwrap();

        let mut out: [Option<DescEntry>; MAX_DESCRIPTORS] = [const { None }; MAX_DESCRIPTORS];
        let n = table.close_all(&mut out);
        assert_eq!(n, 2);
        assert!(table.get(a).is_err());
        assert!(table.get(b).is_err());
        assert_eq!(out.iter().filter(|e| e.is_some()).count(), 2);
    }

    #[test]
    fn query_returns_raw_flag_bits() {
        let mut table = DescriptorTable::new();
        let handle = table
            .install(type_id::FRAMEBUFFER, DescFlags::READABLE | DescFlags::MAPPABLE, b"fb", Resource::Framebuffer)
            .unwrap();
        assert_eq!(table.query(handle).unwrap(), (DescFlags::READABLE | DescFlags::MAPPABLE).bits());
    }
}
