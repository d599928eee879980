//! Named shared-memory segments (spec 4.6).
//!
//! A segment is a refcounted, named block of physical pages. Any number of
//! processes may map it; each gets its own virtual address for the same
//! backing frames (spec 3: "for each mapping with `map_refcount > 0`, every
//! page of the region is mapped ... in that process's page tables"). The
//! segment table itself owns the frames; [`SegmentMapper`] is the seam
//! `nyx-kernel` implements so this crate never needs to know what an
//! address space or a physical-page pool concretely are.

use nyx_core::addr::{PhysAddr, VirtAddr};
use nyx_core::id::Pid;
use nyx_core::sync::SpinLock;

use crate::{MAX_SEGMENT_MAPPINGS, MAX_SEGMENT_NAME_LEN, MAX_SEGMENT_PAGES, MAX_SEGMENTS};

/// Lets the segment table allocate/free physical pages and map/unmap them
/// into a specific process's address space, without depending on `nyx-mm`
/// or `nyx-kernel`'s process table directly.
pub trait SegmentMapper {
    /// Allocates `page_count` physical pages from the user pool. Returns
    /// the base address of a caller-contiguous run (the same shape
    /// `nyx_mm::pmm::Pool::alloc_pages` already returns).
    fn alloc_frames(&self, page_count: usize) -> Result<PhysAddr, ShmError>;

    /// Returns a previously allocated run of `page_count` frames starting
    /// at `base` to the user pool.
    fn free_frames(&self, base: PhysAddr, page_count: usize);

    /// Maps `page_count` frames starting at `base` into `pid`'s address
    /// space (spec 4.6: "the first open from a given process maps every
    /// page into that process's page tables as writable+user"). Returns
    /// the virtual base chosen in that process's own cursor.
    fn map_into(&self, pid: Pid, base: PhysAddr, page_count: usize) -> Result<VirtAddr, ShmError>;

    /// Unmaps `page_count` pages at `virt` from `pid`'s tables. Does not
    /// free the backing frames — the segment table retains ownership
    /// until its own refcount reaches zero.
    fn unmap_from(&self, pid: Pid, virt: VirtAddr, page_count: usize);
}

/// Errors from shared-memory operations (spec 7: `AlreadyExists`/
/// `NotFound`/`BadArgument`, scoped to this subsystem).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmError {
    /// `length` exceeded [`MAX_SEGMENT_PAGES`] worth of bytes.
    TooLarge,
    /// `name` exceeded [`MAX_SEGMENT_NAME_LEN`].
    NameTooLong,
    /// Every segment-table slot is occupied.
    TooManySegments,
    /// Every per-segment mapping-record slot is occupied.
    TooManyMappings,
    /// An attach requested a `length` strictly greater than the segment's
    /// existing length (spec 4.6: "if the caller requests a length
    /// strictly greater than the existing length the call fails").
    LengthMismatch,
    /// No segment is named this.
    NotFound,
    /// The underlying allocator or mapper reported failure.
    OutOfMemory,
}

/// A `(base, length)` pair a caller uses to address its mapping of a
/// segment (spec 4.6: `get_property(SharedMemoryInfo)` returns this).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    pub base: VirtAddr,
    pub length: u64,
}

/// A per-open record identifying which segment and process a descriptor's
/// mapping belongs to (spec 3, GLOSSARY "Endpoint" — the shared-memory
/// analogue of a pipe endpoint).
#[derive(Debug, Clone, Copy)]
pub struct Mapping {
    index: usize,
    pub owner: Pid,
    pub info: SegmentInfo,
}

struct ProcessMapping {
    pid: Pid,
    map_refcount: u32,
    base: VirtAddr,
}

struct Segment {
    name: [u8; MAX_SEGMENT_NAME_LEN],
    name_len: usize,
    phys_base: PhysAddr,
    page_count: usize,
    length: u64,
    refcount: u32,
    mappings: [Option<ProcessMapping>; MAX_SEGMENT_MAPPINGS],
}

/// Page size assumed by this subsystem (4 KiB, matching `nyx-mm::PAGE_SIZE`).
/// Kept as a local constant rather than a dependency on `nyx-mm` — this
/// crate only ever talks to physical memory through [`SegmentMapper`].
const PAGE_SIZE: u64 = 4096;

fn page_count_for(length: u64) -> usize {
    (length.div_ceil(PAGE_SIZE)) as usize
}

impl Segment {
    fn name(&self) -> &[u8] {
        &self.name[..self.name_len]
    }

    fn find_mapping(&self, pid: Pid) -> Option<usize> {
        self.mappings.iter().position(|m| matches!(m, Some(m) if m.pid == pid))
    }
}

struct Inner {
    segments: [Option<Segment>; MAX_SEGMENTS],
}

/// The shared-memory segment table (spec 4.6). A single coarse lock guards
/// both segment lookup/creation and every process's mapping records (spec
/// 4.6 "Concurrency": "a single global lock protects allocation of
/// segments and mapping tables").
pub struct ShmTable {
    inner: SpinLock<Inner>,
}

impl ShmTable {
    /// Creates an empty segment table.
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(Inner { segments: [const { None }; MAX_SEGMENTS] }),
        }
    }

    /// `open(type=SharedMemory, name, length, 0)` (spec 4.6). On *creation*
    /// (no segment of this name yet), `length == 0` is not a zero-byte
    /// segment — it defaults to one page, matching the original's
    /// `kDefaultSegmentSize`. On *attach* (a segment of this name already
    /// exists), `length == 0` means "accept whatever size the segment
    /// already is", skipping the oversize check entirely (spec section 9's
    /// resolved open question).
    pub fn open(&self, mapper: &dyn SegmentMapper, pid: Pid, name: &[u8], length: u64) -> Result<Mapping, ShmError> {
        if name.len() > MAX_SEGMENT_NAME_LEN {
            return Err(ShmError::NameTooLong);
        }
        let mut inner = self.inner.lock();

        if let Some(index) = inner.segments.iter().position(|s| matches!(s, Some(s) if s.name() == name)) {
            return self.attach_existing(&mut inner, mapper, index, pid, length);
        }

        let length = if length == 0 { PAGE_SIZE } else { length };
        self.create(&mut inner, mapper, name, pid, length)
    }

    fn create(
        &self,
        inner: &mut Inner,
        mapper: &dyn SegmentMapper,
        name: &[u8],
        pid: Pid,
        length: u64,
    ) -> Result<Mapping, ShmError> {
        let page_count = page_count_for(length);
        if page_count > MAX_SEGMENT_PAGES {
            return Err(ShmError::TooLarge);
        }
        let index = inner.segments.iter().position(|s| s.is_none()).ok_or(ShmError::TooManySegments)?;

        let phys_base = mapper.alloc_frames(page_count).map_err(|_| ShmError::OutOfMemory)?;
        let base = match mapper.map_into(pid, phys_base, page_count) {
            Ok(base) => base,
            Err(e) => {
                mapper.free_frames(phys_base, page_count);
                return Err(e);
            }
        };

        let mut name_buf = [0u8; MAX_SEGMENT_NAME_LEN];
        name_buf[..name.len()].copy_from_slice(name);

        let mut mappings: [Option<ProcessMapping>; MAX_SEGMENT_MAPPINGS] = [const { None }; MAX_SEGMENT_MAPPINGS];
        mappings[0] = Some(ProcessMapping { pid, map_refcount: 1, base });

        inner.segments[index] = Some(Segment {
            name: name_buf,
            name_len: name.len(),
            phys_base,
            page_count,
            length,
            refcount: 1,
            mappings,
        });

        Ok(Mapping { index, owner: pid, info: SegmentInfo { base, length } })
    }

    fn attach_existing(
        &self,
        inner: &mut Inner,
        mapper: &dyn SegmentMapper,
        index: usize,
        pid: Pid,
        length: u64,
    ) -> Result<Mapping, ShmError> {
        let segment = inner.segments[index].as_mut().unwrap();
        if length > segment.length {
            return Err(ShmError::LengthMismatch);
        }

        if let Some(slot) = segment.find_mapping(pid) {
            segment.mappings[slot].as_mut().unwrap().map_refcount += 1;
            segment.refcount += 1;
            let base = segment.mappings[slot].as_ref().unwrap().base;
            return Ok(Mapping { index, owner: pid, info: SegmentInfo { base, length: segment.length } });
        }

        let slot = segment.mappings.iter().position(|m| m.is_none()).ok_or(ShmError::TooManyMappings)?;
        let base = mapper
            .map_into(pid, segment.phys_base, segment.page_count)
            .map_err(|_| ShmError::OutOfMemory)?;
        segment.mappings[slot] = Some(ProcessMapping { pid, map_refcount: 1, base });
        segment.refcount += 1;
        Ok(Mapping { index, owner: pid, info: SegmentInfo { base, length: segment.length } })
    }

    /// `get_property(SharedMemoryInfo)` (spec 4.4/4.6).
    pub fn info(&self, mapping: &Mapping) -> SegmentInfo {
        mapping.info
    }

    /// Closes one mapping (spec 4.6 "Close"). Decrements the owning
    /// process's `map_refcount`, unmapping from that process's tables when
    /// it reaches zero; decrements the segment's overall refcount,
    /// returning every physical page to the pool when it reaches zero.
    pub fn close(&self, mapper: &dyn SegmentMapper, mapping: Mapping) {
        let mut inner = self.inner.lock();
        let Some(segment) = inner.segments[mapping.index].as_mut() else { return };

        if let Some(slot) = segment.find_mapping(mapping.owner) {
            let entry = segment.mappings[slot].as_mut().unwrap();
            entry.map_refcount -= 1;
            if entry.map_refcount == 0 {
                let base = entry.base;
                let page_count = segment.page_count;
                mapper.unmap_from(mapping.owner, base, page_count);
                segment.mappings[slot] = None;
            }
        }

        segment.refcount -= 1;
        if segment.refcount == 0 {
            let (phys_base, page_count) = (segment.phys_base, segment.page_count);
            inner.segments[mapping.index] = None;
            mapper.free_frames(phys_base, page_count);
        }
    }
}

impl Default for ShmTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// A host test double: "physical" pages are just a bump allocator over
    /// a `u64` counter; "mapping" a process means recording which frames
    /// that process currently sees, keyed by a synthetic virtual base.
    struct FakeMapper {
        next_frame: RefCell<u64>,
        next_virt: RefCell<u64>,
        mapped: RefCell<HashMap<(u64, u64), Vec<PhysAddr>>>,
    }

    impl FakeMapper {
        fn new() -> Self {
            Self { next_frame: RefCell::new(0x1000), next_virt: RefCell::new(0x4000_0000), mapped: RefCell::new(HashMap::new()) }
        }
    }

    impl SegmentMapper for FakeMapper {
        fn alloc_frames(&self, page_count: usize) -> Result<PhysAddr, ShmError> {
            let mut next = self.next_frame.borrow_mut();
            let base = *next;
            *next += page_count as u64 * 4096;
            Ok(PhysAddr::new(base))
        }

        fn free_frames(&self, _base: PhysAddr, _page_count: usize) {}

        fn map_into(&self, pid: Pid, base: PhysAddr, page_count: usize) -> Result<VirtAddr, ShmError> {
            let mut next = self.next_virt.borrow_mut();
            let virt = *next;
            *next += page_count as u64 * 4096;
            let frames = (0..page_count).map(|i| PhysAddr::new(base.as_u64() + i as u64 * 4096)).collect();
            self.mapped.borrow_mut().insert((pid.as_u32() as u64, virt), frames);
            Ok(VirtAddr::new(virt))
        }

        fn unmap_from(&self, pid: Pid, virt: VirtAddr, _page_count: usize) {
            self.mapped.borrow_mut().remove(&(pid.as_u32() as u64, virt.as_u64()));
        }
    }

    #[test]
    fn s4_two_processes_see_the_same_backing_pages() {
        let table = ShmTable::new();
        let mapper = FakeMapper::new();
        let p1 = Pid::new(1);
        let p2 = Pid::new(2);

        let m1 = table.open(&mapper, p1, b"buf", 8192).unwrap();
        let m2 = table.open(&mapper, p2, b"buf", 0).unwrap();

        assert_ne!(m1.info.base, m2.info.base);
        let frames1 = &mapper.mapped.borrow()[&(1, m1.info.base.as_u64())];
        let frames2 = &mapper.mapped.borrow()[&(2, m2.info.base.as_u64())];
        assert_eq!(frames1, frames2);
    }

    #[test]
    fn attach_with_greater_length_fails_without_modifying_segment() {
        let table = ShmTable::new();
        let mapper = FakeMapper::new();
        let p1 = Pid::new(1);
        let p2 = Pid::new(2);

        let m1 = table.open(&mapper, p1, b"buf", 4096).unwrap();
        let err = table.open(&mapper, p2, b"buf", 8192).unwrap_err();
        assert_eq!(err, ShmError::LengthMismatch);
        assert_eq!(table.info(&m1).length, 4096);
    }

    #[test]
    fn closing_every_mapping_frees_every_page() {
        let table = ShmTable::new();
        let mapper = FakeMapper::new();
        let p1 = Pid::new(1);
        let p2 = Pid::new(2);

        let m1 = table.open(&mapper, p1, b"buf", 4096).unwrap();
        let m2 = table.open(&mapper, p2, b"buf", 0).unwrap();
        table.close(&mapper, m1);
        table.close(&mapper, m2);

        // the name is free again: a fresh create succeeds and gets its own frames.
        let m3 = table.open(&mapper, p1, b"buf", 4096).unwrap();
        assert!(mapper.mapped.borrow().contains_key(&(1, m3.info.base.as_u64())));
    }

    #[test]
    fn repeated_open_from_same_process_bumps_refcount_without_remapping() {
        let table = ShmTable::new();
        let mapper = FakeMapper::new();
        let p1 = Pid::new(1);

        let m1 = table.open(&mapper, p1, b"buf", 4096).unwrap();
        let m1b = table.open(&mapper, p1, b"buf", 0).unwrap();
        assert_eq!(m1.info.base, m1b.info.base);
        assert_eq!(mapper.mapped.borrow().len(), 1);
    }

    #[test]
    fn creating_with_zero_length_defaults_to_one_page() {
        let table = ShmTable::new();
        let mapper = FakeMapper::new();
        let m = table.open(&mapper, Pid::new(1), b"fresh", 0).unwrap();
        assert_eq!(m.info.length, 4096);
    }
}
