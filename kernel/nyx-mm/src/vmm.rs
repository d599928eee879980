//! L1: per-address-space virtual memory manager.
//!
//! Each [`AddressSpace`] owns a page-table root and a monotone cursor triple
//! `(next_code, next_stack, next_shared)` within the user half
//! `[USER_BASE, USER_TOP)` (spec 3, spec 4.2). No region tree is kept: the
//! cursors only ever move, so a `(base, length)` pair returned to a caller
//! is sufficient bookkeeping until `release_user_region` unwinds it.

use nyx_core::addr::{PhysAddr, VirtAddr};
use nyx_core::paging::{Page, PhysFrame, Size4KiB};

use crate::mapper::{MapFlags, PageMapper, PageTranslator, UnmapError as MapperUnmapError};
use crate::pmm::{AllocError, Pool};
use crate::{PAGE_SIZE, SHARED_GUARD_GAP, USER_BASE, USER_TOP, page_count};

/// Number of PML4 entries in the upper half (indices 256-511), shared
/// verbatim by every address space.
const KERNEL_PML4_ENTRIES: usize = 256;

/// A `(base, length)` pair naming a contiguous user virtual range. Spec 4.2:
/// "Regions are tracked only by `(base, length)` pairs returned to callers".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRegion {
    pub base: VirtAddr,
    pub length: u64,
}

impl UserRegion {
    fn page_count(&self) -> u64 {
        page_count(self.length)
    }
}

/// Errors from mapping operations (allocation, or the pool being out of
/// pages partway through a multi-page region).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    OutOfMemory,
    /// The virtual range requested does not fit within the user half, or
    /// would collide with an already-advanced cursor.
    OutOfRange,
}

impl From<AllocError> for MapError {
    fn from(_: AllocError) -> Self {
        MapError::OutOfMemory
    }
}

/// Errors from unmap operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmapError {
    NotMapped,
    SizeMismatch,
}

impl From<MapperUnmapError> for UnmapError {
    fn from(e: MapperUnmapError) -> Self {
        match e {
            MapperUnmapError::NotMapped => UnmapError::NotMapped,
            MapperUnmapError::SizeMismatch => UnmapError::SizeMismatch,
        }
    }
}

/// Errors from the user-boundary copy primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyError {
    /// `[addr, addr+len)` is not entirely within `[USER_BASE, USER_TOP)`.
    OutOfRange,
    /// A page in the requested range is not mapped.
    NotMapped,
}

/// Callback for deallocating a single physical frame back to the pool it
/// came from (stored so `Drop` can free the PML4 frame without threading
/// a pool reference through).
pub type FrameDeallocFn = fn(PhysFrame<Size4KiB>);

/// A user-mode address space: its own PML4, a page mapper, and the region
/// cursor triple of spec 3/4.2.
///
/// The upper half (PML4 entries 256-511) is shared with the kernel; the
/// lower half (entries 0-255) is process-private. On drop, the PML4 frame
/// is returned to `dealloc_fn`.
pub struct AddressSpace<M: PageMapper<Size4KiB> + PageTranslator> {
    root_phys: PhysAddr,
    mapper: M,
    hhdm_offset: u64,
    dealloc_fn: FrameDeallocFn,
    next_code: VirtAddr,
    next_stack: VirtAddr,
    next_shared: VirtAddr,
}

impl<M: PageMapper<Size4KiB> + PageTranslator> AddressSpace<M> {
    /// Creates a new user address space, allocating a fresh PML4 from
    /// `pool` and copying the kernel upper half from `kernel_root`.
    ///
    /// # Safety
    ///
    /// `kernel_root` must point to a valid PML4 used by the kernel, and
    /// `hhdm_offset` must map all physical memory this call touches.
    pub unsafe fn new_user(
        kernel_root: PhysAddr,
        mapper: M,
        hhdm_offset: u64,
        pool: &Pool,
        dealloc_fn: FrameDeallocFn,
    ) -> Result<Self, MapError> {
        let new_pml4_phys = pool.alloc_pages(1)?;

        // SAFETY: both PML4s are reachable through the HHDM window; the new
        // frame was just allocated and is exclusively owned here.
        unsafe {
            let new_pml4 = (hhdm_offset + new_pml4_phys.as_u64()) as *mut u64;
            let kernel_pml4 = (hhdm_offset + kernel_root.as_u64()) as *const u64;
            core::ptr::write_bytes(new_pml4, 0, KERNEL_PML4_ENTRIES);
            core::ptr::copy_nonoverlapping(
                kernel_pml4.add(KERNEL_PML4_ENTRIES),
                new_pml4.add(KERNEL_PML4_ENTRIES),
                KERNEL_PML4_ENTRIES,
            );
        }

        Ok(Self {
            root_phys: new_pml4_phys,
            mapper,
            hhdm_offset,
            dealloc_fn,
            next_code: USER_BASE,
            next_stack: USER_TOP,
            next_shared: USER_TOP,
        })
    }

    /// Physical address of this address space's PML4, for loading into CR3
    /// on context switch.
    pub fn root_phys(&self) -> PhysAddr {
        self.root_phys
    }

    fn phys_to_virt(&self, phys: PhysAddr) -> *mut u8 {
        (self.hhdm_offset + phys.as_u64()) as *mut u8
    }

    fn map_one(
        &self,
        page: Page<Size4KiB>,
        frame: PhysFrame<Size4KiB>,
        flags: MapFlags,
        pool: &Pool,
    ) -> Result<(), MapError> {
        let mut alloc_failed = false;
        // SAFETY: `self.root_phys` is this address space's own PML4; the
        // allocator callback returns freshly zeroed kernel-pool frames.
        let flush = unsafe {
            self.mapper.map(
                self.root_phys,
                page,
                frame,
                flags | MapFlags::USER,
                &mut || match pool.alloc_pages(1) {
                    Ok(phys) => PhysFrame::containing_address(phys),
                    Err(_) => {
                        alloc_failed = true;
                        PhysFrame::containing_address(PhysAddr::new(0))
                    }
                },
            )
        };
        if alloc_failed {
            return Err(MapError::OutOfMemory);
        }
        flush.flush();
        Ok(())
    }

    fn unmap_one(&self, page: Page<Size4KiB>) -> Result<PhysFrame<Size4KiB>, UnmapError> {
        // SAFETY: `self.root_phys` is this address space's own PML4.
        let (frame, flush) = unsafe { self.mapper.unmap(self.root_phys, page)? };
        flush.flush();
        Ok(frame)
    }

    /// Allocates `ceil(bytes/page)` zero-filled user pages at `next_code`,
    /// copies `bytes` into them page-by-page (tail zero-padded), advances
    /// `next_code`, and reports the entry-point virtual address
    /// (`next_code_before + entry_offset`).
    pub fn map_user_code(
        &mut self,
        pool: &Pool,
        bytes: &[u8],
        entry_offset: u64,
    ) -> Result<(UserRegion, VirtAddr), MapError> {
        let length = bytes.len() as u64;
        let base = self.next_code;
        let pages = page_count(length).max(1);
        if base.as_u64() + pages * PAGE_SIZE > self.next_shared.as_u64() - SHARED_GUARD_GAP {
            return Err(MapError::OutOfRange);
        }

        let mut mapped = 0u64;
        for i in 0..pages {
            let phys = match pool.alloc_pages(1) {
                Ok(p) => p,
                Err(_) => {
                    self.unwind_mapped(pool, base, mapped);
                    return Err(MapError::OutOfMemory);
                }
            };
            let page = Page::containing_address(VirtAddr::new(base.as_u64() + i * PAGE_SIZE));
            let frame = PhysFrame::containing_address(phys);
            if self
                .map_one(page, frame, MapFlags::WRITABLE | MapFlags::EXECUTABLE, pool)
                .is_err()
            {
                let _ = pool.free(phys);
                self.unwind_mapped(pool, base, mapped);
                return Err(MapError::OutOfMemory);
            }

            let chunk_start = (i * PAGE_SIZE) as usize;
            let chunk_end = (chunk_start + PAGE_SIZE as usize).min(bytes.len());
            let chunk_len = chunk_end.saturating_sub(chunk_start);
            // SAFETY: `phys` was just mapped and is reachable via the HHDM.
            unsafe {
                let dst = self.phys_to_virt(phys);
                core::ptr::write_bytes(dst, 0, PAGE_SIZE as usize);
                if chunk_len > 0 {
                    core::ptr::copy_nonoverlapping(
                        bytes.as_ptr().add(chunk_start),
                        dst,
                        chunk_len,
                    );
                }
            }
            mapped += 1;
        }

        self.next_code = VirtAddr::new(base.as_u64() + pages * PAGE_SIZE);
        let region = UserRegion { base, length };
        let entry_va = VirtAddr::new(base.as_u64() + entry_offset);
        Ok((region, entry_va))
    }

    /// Allocates `ceil(length/page)` zero-filled user pages above
    /// `next_code`, the same way `map_user_code` does minus the content
    /// copy.
    pub fn allocate_user_region(&mut self, pool: &Pool, length: u64) -> Result<UserRegion, MapError> {
        let base = self.next_code;
        let pages = page_count(length).max(1);
        if base.as_u64() + pages * PAGE_SIZE > self.next_shared.as_u64() - SHARED_GUARD_GAP {
            return Err(MapError::OutOfRange);
        }
        let mut mapped = 0u64;
        for i in 0..pages {
            let phys = match pool.alloc_pages(1) {
                Ok(p) => p,
                Err(_) => {
                    self.unwind_mapped(pool, base, mapped);
                    return Err(MapError::OutOfMemory);
                }
            };
            let page = Page::containing_address(VirtAddr::new(base.as_u64() + i * PAGE_SIZE));
            let frame = PhysFrame::containing_address(phys);
            if self.map_one(page, frame, MapFlags::WRITABLE, pool).is_err() {
                let _ = pool.free(phys);
                self.unwind_mapped(pool, base, mapped);
                return Err(MapError::OutOfMemory);
            }
            mapped += 1;
        }
        self.next_code = VirtAddr::new(base.as_u64() + pages * PAGE_SIZE);
        Ok(UserRegion { base, length })
    }

    /// Places a region below `next_shared`, reserving the guard gap below
    /// it and pushing `next_stack` down first if the region would
    /// otherwise encroach on it.
    pub fn allocate_user_shared_region(
        &mut self,
        pool: &Pool,
        length: u64,
    ) -> Result<UserRegion, MapError> {
        let pages = page_count(length).max(1);
        let size = pages * PAGE_SIZE;
        let new_shared = self
            .next_shared
            .as_u64()
            .checked_sub(size)
            .ok_or(MapError::OutOfRange)?;
        if new_shared < self.next_code.as_u64() + SHARED_GUARD_GAP {
            return Err(MapError::OutOfRange);
        }
        if self.next_stack.as_u64() > new_shared - SHARED_GUARD_GAP {
            self.next_stack = VirtAddr::new(new_shared - SHARED_GUARD_GAP);
        }

        let base = VirtAddr::new(new_shared);
        let mut mapped = 0u64;
        for i in 0..pages {
            let phys = match pool.alloc_pages(1) {
                Ok(p) => p,
                Err(_) => {
                    self.unwind_mapped(pool, base, mapped);
                    return Err(MapError::OutOfMemory);
                }
            };
            let page = Page::containing_address(VirtAddr::new(base.as_u64() + i * PAGE_SIZE));
            let frame = PhysFrame::containing_address(phys);
            if self.map_one(page, frame, MapFlags::WRITABLE, pool).is_err() {
                let _ = pool.free(phys);
                self.unwind_mapped(pool, base, mapped);
                return Err(MapError::OutOfMemory);
            }
            mapped += 1;
        }
        self.next_shared = base;
        Ok(UserRegion { base, length })
    }

    /// Places a region below `next_shared` exactly as
    /// [`Self::allocate_user_shared_region`] does, but maps the caller's own
    /// `frames` (already-allocated, already-owned elsewhere) instead of
    /// allocating fresh ones.
    ///
    /// Used by a named shared-memory segment (`nyx-ipc::shm`) to map its one
    /// set of backing physical frames into every attaching process's own
    /// address space at whatever virtual address that process's cursor
    /// happens to land on (spec 4.6: each process keeps its own mapping of
    /// the same underlying pages).
    pub fn map_shared_frames(&mut self, pool: &Pool, frames: &[PhysAddr]) -> Result<UserRegion, MapError> {
        let pages = frames.len() as u64;
        let size = pages * PAGE_SIZE;
        let new_shared = self
            .next_shared
            .as_u64()
            .checked_sub(size)
            .ok_or(MapError::OutOfRange)?;
        if new_shared < self.next_code.as_u64() + SHARED_GUARD_GAP {
            return Err(MapError::OutOfRange);
        }
        if self.next_stack.as_u64() > new_shared - SHARED_GUARD_GAP {
            self.next_stack = VirtAddr::new(new_shared - SHARED_GUARD_GAP);
        }

        let base = VirtAddr::new(new_shared);
        let mut mapped = 0u64;
        for (i, phys) in frames.iter().enumerate() {
            let page = Page::containing_address(VirtAddr::new(base.as_u64() + i as u64 * PAGE_SIZE));
            let frame = PhysFrame::containing_address(*phys);
            if self.map_one(page, frame, MapFlags::WRITABLE, pool).is_err() {
                self.unmap_shared_frames(base, mapped);
                return Err(MapError::OutOfMemory);
            }
            mapped += 1;
        }
        self.next_shared = base;
        Ok(UserRegion { base, length: size })
    }

    /// Unmaps `count` pages starting at `base` without returning their
    /// frames to any pool — the segment table retains ownership of shared
    /// backing pages until its own refcount reaches zero (spec 4.6
    /// "Close").
    pub fn unmap_shared_frames(&mut self, base: VirtAddr, count: u64) {
        for i in 0..count {
            let page = Page::containing_address(VirtAddr::new(base.as_u64() + i * PAGE_SIZE));
            let _ = self.unmap_one(page);
        }
    }

    /// Grows a stack downward from `next_stack`.
    pub fn allocate_user_stack(
        &mut self,
        pool: &Pool,
        length: u64,
    ) -> Result<(VirtAddr, VirtAddr, u64), MapError> {
        let pages = page_count(length).max(1);
        let size = pages * PAGE_SIZE;
        let top = self.next_stack;
        let base = top.as_u64().checked_sub(size).ok_or(MapError::OutOfRange)?;
        if base < self.next_shared.as_u64() {
            return Err(MapError::OutOfRange);
        }
        let base = VirtAddr::new(base);

        let mut mapped = 0u64;
        for i in 0..pages {
            let phys = match pool.alloc_pages(1) {
                Ok(p) => p,
                Err(_) => {
                    self.unwind_mapped(pool, base, mapped);
                    return Err(MapError::OutOfMemory);
                }
            };
            let page = Page::containing_address(VirtAddr::new(base.as_u64() + i * PAGE_SIZE));
            let frame = PhysFrame::containing_address(phys);
            if self.map_one(page, frame, MapFlags::WRITABLE, pool).is_err() {
                let _ = pool.free(phys);
                self.unwind_mapped(pool, base, mapped);
                return Err(MapError::OutOfMemory);
            }
            mapped += 1;
        }
        self.next_stack = base;
        Ok((base, top, size))
    }

    /// Unmaps and frees every page of `region` back to `pool`.
    pub fn release_user_region(&mut self, pool: &Pool, region: UserRegion) -> Result<(), UnmapError> {
        let pages = region.page_count();
        for i in 0..pages {
            let page = Page::containing_address(VirtAddr::new(region.base.as_u64() + i * PAGE_SIZE));
            let frame = self.unmap_one(page)?;
            let _ = pool.free(frame.start_address());
        }
        Ok(())
    }

    /// Unmaps exactly `count` already-mapped pages starting at `base` and
    /// returns their frames to `pool`. Used to unwind a partially
    /// established multi-page mapping when a later page in the same
    /// region fails (spec 4.2: "unwinds whatever partial mappings were
    /// established").
    fn unwind_mapped(&mut self, pool: &Pool, base: VirtAddr, count: u64) {
        for i in 0..count {
            let page = Page::containing_address(VirtAddr::new(base.as_u64() + i * PAGE_SIZE));
            // SAFETY: these pages were mapped moments ago by this same call.
            if let Ok((frame, flush)) = unsafe { self.mapper.unmap(self.root_phys, page) } {
                flush.flush();
                let _ = pool.free(frame.start_address());
            }
        }
    }

    /// `true` iff `[addr, addr+len) ⊆ [USER_BASE, USER_TOP)`, rejecting
    /// wraparound.
    pub fn is_user_range(addr: VirtAddr, len: u64) -> bool {
        let start = addr.as_u64();
        let end = match start.checked_add(len) {
            Some(e) => e,
            None => return false,
        };
        start >= USER_BASE.as_u64() && end <= USER_TOP.as_u64()
    }

    /// Translates `addr` and returns the physical byte address, or
    /// `CopyError::NotMapped` if unmapped.
    fn translate_one(&self, addr: VirtAddr) -> Result<PhysAddr, CopyError> {
        // SAFETY: `self.root_phys` is a valid, currently-alive PML4.
        unsafe { self.mapper.translate_addr(self.root_phys, addr) }.ok_or(CopyError::NotMapped)
    }

    /// Copies `src` into the user address `dest`, chunk-wise across page
    /// boundaries, through the physical window rather than switching
    /// address spaces (spec 4.2).
    pub fn copy_to_user(&self, dest: VirtAddr, src: &[u8]) -> Result<(), CopyError> {
        if !Self::is_user_range(dest, src.len() as u64) {
            return Err(CopyError::OutOfRange);
        }
        let mut done = 0usize;
        while done < src.len() {
            let cur = VirtAddr::new(dest.as_u64() + done as u64);
            let page_off = cur.page_offset() as usize;
            let chunk = (PAGE_SIZE as usize - page_off).min(src.len() - done);
            let phys = self.translate_one(cur)?;
            // SAFETY: `phys` was just translated from a checked user
            // address and is reachable through the HHDM.
            unsafe {
                core::ptr::copy_nonoverlapping(src.as_ptr().add(done), self.phys_to_virt(phys), chunk);
            }
            done += chunk;
        }
        Ok(())
    }

    /// Copies from the user address `src` into `dest`, the mirror of
    /// [`copy_to_user`].
    pub fn copy_from_user(&self, src: VirtAddr, dest: &mut [u8]) -> Result<(), CopyError> {
        if !Self::is_user_range(src, dest.len() as u64) {
            return Err(CopyError::OutOfRange);
        }
        let mut done = 0usize;
        while done < dest.len() {
            let cur = VirtAddr::new(src.as_u64() + done as u64);
            let page_off = cur.page_offset() as usize;
            let chunk = (PAGE_SIZE as usize - page_off).min(dest.len() - done);
            let phys = self.translate_one(cur)?;
            // SAFETY: see `copy_to_user`.
            unsafe {
                core::ptr::copy_nonoverlapping(self.phys_to_virt(phys), dest.as_mut_ptr().add(done), chunk);
            }
            done += chunk;
        }
        Ok(())
    }

    /// Fills `len` bytes at the user address `dest` with `value`.
    pub fn fill_user(&self, dest: VirtAddr, value: u8, len: u64) -> Result<(), CopyError> {
        if !Self::is_user_range(dest, len) {
            return Err(CopyError::OutOfRange);
        }
        let mut done = 0u64;
        while done < len {
            let cur = VirtAddr::new(dest.as_u64() + done);
            let page_off = cur.page_offset();
            let chunk = (PAGE_SIZE - page_off).min(len - done);
            let phys = self.translate_one(cur)?;
            // SAFETY: see `copy_to_user`.
            unsafe {
                core::ptr::write_bytes(self.phys_to_virt(phys), value, chunk as usize);
            }
            done += chunk;
        }
        Ok(())
    }

    /// Copies a NUL-terminated string from `user_ptr` into `dest`, stopping
    /// at the first NUL byte or when `dest` is full. Every byte access is
    /// individually range-checked (spec 4.2).
    pub fn copy_user_string(&self, user_ptr: VirtAddr, dest: &mut [u8]) -> Result<usize, CopyError> {
        for (i, slot) in dest.iter_mut().enumerate() {
            let addr = VirtAddr::new(user_ptr.as_u64() + i as u64);
            if !Self::is_user_range(addr, 1) {
                return Err(CopyError::OutOfRange);
            }
            let phys = self.translate_one(addr)?;
            // SAFETY: `phys` is a single checked, mapped user byte.
            let byte = unsafe { self.phys_to_virt(phys).read() };
            if byte == 0 {
                return Ok(i);
            }
            *slot = byte;
        }
        Ok(dest.len())
    }
}

impl<M: PageMapper<Size4KiB> + PageTranslator> Drop for AddressSpace<M> {
    fn drop(&mut self) {
        let frame = PhysFrame::containing_address(self.root_phys);
        (self.dealloc_fn)(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::MapFlush;
    use std::alloc::{Layout, alloc_zeroed, dealloc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A host-simulated physical arena, as in `pmm`'s test module: a real
    /// heap allocation standing in for a physical range, with
    /// `hhdm_offset = 0` so the arena's own address doubles as both the
    /// "physical" and virtual address.
    struct FakeArena {
        ptr: *mut u8,
        layout: Layout,
    }

    impl FakeArena {
        fn new(frames: usize) -> Self {
            let size = frames * PAGE_SIZE as usize;
            let layout = Layout::from_size_align(size, PAGE_SIZE as usize).unwrap();
            // SAFETY: layout is non-zero and page-aligned.
            let ptr = unsafe { alloc_zeroed(layout) };
            assert!(!ptr.is_null());
            Self { ptr, layout }
        }

        fn base(&self) -> PhysAddr {
            PhysAddr::new(self.ptr as u64)
        }
    }

    impl Drop for FakeArena {
        fn drop(&mut self) {
            // SAFETY: `ptr`/`layout` match the original allocation.
            unsafe { dealloc(self.ptr, self.layout) };
        }
    }

    fn order_map(frames: usize) -> &'static mut [i8] {
        Box::leak(vec![0i8; frames].into_boxed_slice())
    }

    fn seeded_pool(frames: usize) -> (FakeArena, Pool) {
        let arena = FakeArena::new(frames);
        let pool = Pool::new(0, true);
        // SAFETY: `arena` owns real, exclusively-held host memory for the
        // duration of the test.
        unsafe { pool.add_range(arena.base(), frames, order_map(frames)).unwrap() };
        (arena, pool)
    }

    /// A [`PageMapper`]/[`PageTranslator`] pair backed by a host hash map
    /// instead of real page tables, so `AddressSpace` logic (cursor math,
    /// unwind-on-failure, user-copy primitives) is exercisable off-target.
    /// Ignores `root` entirely: one `FakeMapper` instance is one address
    /// space's worth of mappings.
    struct FakeMapper {
        entries: Mutex<HashMap<u64, (u64, MapFlags)>>,
    }

    impl FakeMapper {
        fn new() -> Self {
            Self { entries: Mutex::new(HashMap::new()) }
        }
    }

    // SAFETY: test-only mapper; correctness is whatever the hash map says.
    unsafe impl PageMapper<Size4KiB> for FakeMapper {
        unsafe fn map(
            &self,
            _root: PhysAddr,
            page: Page<Size4KiB>,
            frame: PhysFrame<Size4KiB>,
            flags: MapFlags,
            _alloc: &mut dyn FnMut() -> PhysFrame<Size4KiB>,
        ) -> MapFlush {
            self.entries
                .lock()
                .unwrap()
                .insert(page.start_address().as_u64(), (frame.start_address().as_u64(), flags));
            MapFlush::new(page.start_address())
        }

        unsafe fn unmap(
            &self,
            _root: PhysAddr,
            page: Page<Size4KiB>,
        ) -> Result<(PhysFrame<Size4KiB>, MapFlush), MapperUnmapError> {
            match self.entries.lock().unwrap().remove(&page.start_address().as_u64()) {
                Some((phys, _)) => Ok((
                    PhysFrame::containing_address(PhysAddr::new(phys)),
                    MapFlush::new(page.start_address()),
                )),
                None => Err(MapperUnmapError::NotMapped),
            }
        }

        unsafe fn update_flags(
            &self,
            _root: PhysAddr,
            page: Page<Size4KiB>,
            flags: MapFlags,
        ) -> Result<MapFlush, MapperUnmapError> {
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(&page.start_address().as_u64()) {
                Some(entry) => {
                    entry.1 = flags;
                    Ok(MapFlush::new(page.start_address()))
                }
                None => Err(MapperUnmapError::NotMapped),
            }
        }
    }

    // SAFETY: test-only translator paired with the `FakeMapper` above.
    unsafe impl PageTranslator for FakeMapper {
        unsafe fn translate_addr(&self, _root: PhysAddr, virt: VirtAddr) -> Option<PhysAddr> {
            let entries = self.entries.lock().unwrap();
            let page_base = virt.align_down(PAGE_SIZE);
            let (phys, _) = *entries.get(&page_base.as_u64())?;
            Some(PhysAddr::new(phys + virt.page_offset()))
        }
    }

    fn noop_dealloc(_frame: PhysFrame<Size4KiB>) {}

    fn fake_space(pool: &Pool) -> AddressSpace<FakeMapper> {
        let kernel_root = pool.alloc_pages(1).unwrap();
        // SAFETY: `kernel_root` is a freshly allocated, zeroed frame from
        // `pool`, and `hhdm_offset = 0` matches the pool's own setup.
        unsafe { AddressSpace::new_user(kernel_root, FakeMapper::new(), 0, pool, noop_dealloc).unwrap() }
    }

    #[test]
    fn is_user_range_accepts_interior_and_rejects_outside() {
        assert!(AddressSpace::<FakeMapper>::is_user_range(USER_BASE, 4096));
        assert!(!AddressSpace::<FakeMapper>::is_user_range(
            VirtAddr::new(USER_BASE.as_u64() - 1),
            4096
        ));
        assert!(!AddressSpace::<FakeMapper>::is_user_range(
            VirtAddr::new(USER_TOP.as_u64() - 1),
            4096
        ));
    }

    #[test]
    fn is_user_range_rejects_length_overflow() {
        assert!(!AddressSpace::<FakeMapper>::is_user_range(VirtAddr::new(u64::MAX - 10), 100));
    }

    #[test]
    fn map_user_code_advances_next_code_and_reports_entry() {
        let (_arena, pool) = seeded_pool(64);
        let mut space = fake_space(&pool);
        let code = [0x90u8; 10];
        let (region, entry) = space.map_user_code(&pool, &code, 4).unwrap();
        assert_eq!(region.base, USER_BASE);
        assert_eq!(region.length, 10);
        assert_eq!(entry, VirtAddr::new(USER_BASE.as_u64() + 4));
        assert_eq!(space.next_code, VirtAddr::new(USER_BASE.as_u64() + PAGE_SIZE));
    }

    #[test]
    fn copy_to_and_from_user_round_trip_through_mapped_region() {
        let (_arena, pool) = seeded_pool(64);
        let mut space = fake_space(&pool);
        let region = space.allocate_user_region(&pool, 16).unwrap();

        let payload = [1u8, 2, 3, 4, 5, 6, 7, 8];
        space.copy_to_user(region.base, &payload).unwrap();

        let mut out = [0u8; 8];
        space.copy_from_user(region.base, &mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn fill_user_writes_constant_byte() {
        let (_arena, pool) = seeded_pool(64);
        let mut space = fake_space(&pool);
        let region = space.allocate_user_region(&pool, 32).unwrap();

        space.fill_user(region.base, 0xAB, 32).unwrap();
        let mut out = [0u8; 32];
        space.copy_from_user(region.base, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn copy_user_string_stops_at_nul() {
        let (_arena, pool) = seeded_pool(64);
        let mut space = fake_space(&pool);
        let region = space.allocate_user_region(&pool, 16).unwrap();

        let mut src = [0u8; 16];
        src[..5].copy_from_slice(b"hello");
        space.copy_to_user(region.base, &src).unwrap();

        let mut dest = [0u8; 16];
        let len = space.copy_user_string(region.base, &mut dest).unwrap();
        assert_eq!(len, 5);
        assert_eq!(&dest[..5], b"hello");
    }

    #[test]
    fn copy_to_user_rejects_unmapped_destination() {
        let (_arena, pool) = seeded_pool(64);
        let space = fake_space(&pool);
        let err = space.copy_to_user(USER_BASE, &[1, 2, 3]).unwrap_err();
        assert_eq!(err, CopyError::NotMapped);
    }

    #[test]
    fn copy_to_user_rejects_out_of_range_destination() {
        let (_arena, pool) = seeded_pool(64);
        let space = fake_space(&pool);
        let err = space
            .copy_to_user(VirtAddr::new(USER_TOP.as_u64() - 1), &[1, 2, 3])
            .unwrap_err();
        assert_eq!(err, CopyError::OutOfRange);
    }

    #[test]
    fn allocate_user_stack_grows_downward_from_next_stack() {
        let (_arena, pool) = seeded_pool(64);
        let mut space = fake_space(&pool);
        let (base, top, size) = space.allocate_user_stack(&pool, 8192).unwrap();
        assert_eq!(top, USER_TOP);
        assert_eq!(size, 8192);
        assert_eq!(base, VirtAddr::new(USER_TOP.as_u64() - 8192));
        assert_eq!(space.next_stack, base);
    }

    #[test]
    fn allocate_user_shared_region_pushes_stack_cursor_down_to_preserve_guard() {
        let (_arena, pool) = seeded_pool(64);
        let mut space = fake_space(&pool);
        let region = space.allocate_user_shared_region(&pool, 4096).unwrap();
        assert_eq!(space.next_shared, region.base);
        assert!(space.next_stack.as_u64() <= region.base.as_u64() - SHARED_GUARD_GAP);
    }

    #[test]
    fn map_shared_frames_maps_caller_owned_pages_without_touching_pool() {
        let (_arena, pool) = seeded_pool(64);
        let mut space = fake_space(&pool);
        let before = pool.free_page_count();

        let backing = pool.alloc_pages(2).unwrap();
        let frames = [backing, PhysAddr::new(backing.as_u64() + PAGE_SIZE)];
        let after_backing_alloc = pool.free_page_count();

        let region = space.map_shared_frames(&pool, &frames).unwrap();
        // mapping itself consumes no additional user-pool pages.
        assert_eq!(pool.free_page_count(), after_backing_alloc);
        assert_eq!(region.length, 2 * PAGE_SIZE);

        let payload = [7u8; 8];
        space.copy_to_user(region.base, &payload).unwrap();
        let mut out = [0u8; 8];
        space.copy_from_user(region.base, &mut out).unwrap();
        assert_eq!(out, payload);

        space.unmap_shared_frames(region.base, 2);
        // unmapping doesn't return the frames either; the caller does.
        assert_eq!(pool.free_page_count(), after_backing_alloc);
        let _ = pool.free(backing);
        assert_eq!(pool.free_page_count(), before);
    }

    #[test]
    fn release_user_region_unmaps_and_frees_every_page() {
        let (_arena, pool) = seeded_pool(64);
        let mut space = fake_space(&pool);
        let before = pool.free_page_count();
        let region = space.allocate_user_region(&pool, 3 * 4096).unwrap();
        assert_ne!(pool.free_page_count(), before);
        space.release_user_region(&pool, region).unwrap();
        assert_eq!(pool.free_page_count(), before);
    }

    #[test]
    fn release_user_region_twice_reports_not_mapped() {
        let (_arena, pool) = seeded_pool(64);
        let mut space = fake_space(&pool);
        let region = space.allocate_user_region(&pool, 4096).unwrap();
        space.release_user_region(&pool, region).unwrap();
        let err = space.release_user_region(&pool, region).unwrap_err();
        assert_eq!(err, UnmapError::NotMapped);
    }

    #[test]
    fn out_of_memory_partway_through_region_leaks_no_frames() {
        let (_arena, pool) = seeded_pool(4);
        let mut space = fake_space(&pool);
        let before = pool.free_page_count();
        // 8 pages requested but only `before` remain: must fail cleanly and
        // return every page it grabbed before the shortfall.
        let err = space.allocate_user_region(&pool, (before as u64 + 8) * PAGE_SIZE).unwrap_err();
        assert_eq!(err, MapError::OutOfMemory);
        assert_eq!(pool.free_page_count(), before);
    }
}
