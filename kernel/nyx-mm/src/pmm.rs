//! L0: physical buddy allocator.
//!
//! Two independent [`BuddyAllocator`] instances back the kernel pool and the
//! user pool (spec 4.1) — the type is the same, only the *owner* differs.
//! Each owned physical range carries a contiguous array of signed per-page
//! order entries: `NonHead` (-1), `FreeOrder(k)` (`k`, `k <= MAX_ORDER`), or
//! `AllocatedOrder(k)` (`-2 - k`). All three encodings are disjoint, so
//! `free` recovers a block's order from the map without any side table.
//! The `MaxOrder + 1` free lists are singly linked through the free head
//! pages themselves, via the direct-map (HHDM) window.

use nyx_core::addr::PhysAddr;
use nyx_core::sync::SpinLock;

/// Largest block order this allocator will track: `2^18` pages == 1 GiB.
pub const MAX_ORDER: usize = 18;

/// Maximum number of disjoint physical ranges a single pool can own.
///
/// Sized to the handful of entries a typical bootloader memory map yields
/// after carving out the kernel image and the staging arena (spec 4.1
/// policy notes); a real memory map with more usable holes than this is not
/// expected on the commodity PC hardware this core targets.
const MAX_RANGES: usize = 16;

const NON_HEAD: i8 = -1;

#[inline]
const fn encode_allocated(order: usize) -> i8 {
    -2 - order as i8
}

#[inline]
const fn decode_allocated(v: i8) -> Option<usize> {
    if v <= -2 { Some((-2 - v) as usize) } else { None }
}

#[inline]
const fn is_free_order(v: i8, order: usize) -> bool {
    v >= 0 && v as usize == order
}

/// Errors raised by the physical allocator (spec 7: `OutOfMemory`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The pool has not been seeded with any ranges yet (spec 4.1: "the VM
    /// layer refuses to allocate pages if the allocator reports 'not
    /// ready'").
    NotReady,
    /// No block of the requested (or larger) order was available, or the
    /// request exceeds `MAX_ORDER` pages.
    OutOfMemory,
}

/// One contiguous physical range owned by a [`BuddyAllocator`].
struct OwnedRange {
    base: PhysAddr,
    frames: usize,
    /// One signed order entry per 4 KiB frame in this range.
    order_map: &'static mut [i8],
}

impl OwnedRange {
    fn contains(&self, phys: PhysAddr) -> bool {
        let start = self.base.as_u64();
        let end = start + self.frames as u64 * 4096;
        let addr = phys.as_u64();
        addr >= start && addr < end
    }

    fn index_of(&self, phys: PhysAddr) -> usize {
        ((phys.as_u64() - self.base.as_u64()) / 4096) as usize
    }
}

/// A buddy-managed physical page pool.
///
/// Two instances of this type exist process-wide: the kernel pool and the
/// user pool (spec 4.1). Seeded once during boot via [`add_range`], then
/// mutated only through [`alloc_pages`]/[`free`] under a single coarse
/// lock — interrupts must never call into this allocator (spec 4.1,
/// section 5).
///
/// [`add_range`]: BuddyAllocator::add_range
/// [`alloc_pages`]: BuddyAllocator::alloc_pages
/// [`free`]: BuddyAllocator::free
pub struct BuddyAllocator {
    hhdm_offset: u64,
    ranges: [Option<OwnedRange>; MAX_RANGES],
    range_count: usize,
    free_heads: [Option<PhysAddr>; MAX_ORDER + 1],
    free_pages: usize,
    total_pages: usize,
    /// Kernel-pool variant zero-fills every returned range (spec 4.1).
    zero_on_alloc: bool,
}

// SAFETY: all mutation happens through `&mut self`; the allocator is always
// wrapped in a `SpinLock` by its owner.
unsafe impl Send for BuddyAllocator {}

impl BuddyAllocator {
    /// Creates a new, empty allocator. `zero_on_alloc` should be `true` for
    /// the kernel pool and `false` for the user pool (spec 4.1).
    pub const fn new(hhdm_offset: u64, zero_on_alloc: bool) -> Self {
        Self {
            hhdm_offset,
            ranges: [const { None }; MAX_RANGES],
            range_count: 0,
            free_heads: [None; MAX_ORDER + 1],
            free_pages: 0,
            total_pages: 0,
            zero_on_alloc,
        }
    }

    fn phys_to_virt(&self, phys: PhysAddr) -> *mut u8 {
        (self.hhdm_offset + phys.as_u64()) as *mut u8
    }

    fn read_next(&self, phys: PhysAddr) -> Option<PhysAddr> {
        // SAFETY: `phys` is the address of a free block head; free blocks
        // are never accessed concurrently from outside the pool's lock.
        let raw = unsafe { (self.phys_to_virt(phys) as *const u64).read() };
        if raw == u64::MAX { None } else { Some(PhysAddr::new(raw)) }
    }

    fn write_next(&self, phys: PhysAddr, next: Option<PhysAddr>) {
        let raw = next.map_or(u64::MAX, PhysAddr::as_u64);
        // SAFETY: see `read_next`.
        unsafe { (self.phys_to_virt(phys) as *mut u64).write(raw) };
    }

    fn push_free(&mut self, order: usize, addr: PhysAddr) {
        let head = self.free_heads[order];
        self.write_next(addr, head);
        self.free_heads[order] = Some(addr);
        self.set_order(addr, order as i8);
    }

    /// Pops the given address out of the order-`order` free list. The
    /// address must currently be the head of some block in that list.
    fn remove_free(&mut self, order: usize, addr: PhysAddr) -> bool {
        let mut cursor = self.free_heads[order];
        let mut prev: Option<PhysAddr> = None;
        while let Some(cur) = cursor {
            let next = self.read_next(cur);
            if cur.as_u64() == addr.as_u64() {
                match prev {
                    Some(p) => self.write_next(p, next),
                    None => self.free_heads[order] = next,
                }
                return true;
            }
            prev = Some(cur);
            cursor = next;
        }
        false
    }

    fn pop_free(&mut self, order: usize) -> Option<PhysAddr> {
        let head = self.free_heads[order]?;
        let next = self.read_next(head);
        self.free_heads[order] = next;
        Some(head)
    }

    fn range_for(&self, phys: PhysAddr) -> Option<usize> {
        self.ranges
            .iter()
            .take(self.range_count)
            .position(|r| r.as_ref().is_some_and(|r| r.contains(phys)))
    }

    fn set_order(&mut self, phys: PhysAddr, value: i8) {
        let idx = self.range_for(phys).expect("address not owned");
        let range = self.ranges[idx].as_mut().unwrap();
        let page_idx = range.index_of(phys);
        range.order_map[page_idx] = value;
    }

    fn mark_non_head(&mut self, phys: PhysAddr, count: usize) {
        let idx = self.range_for(phys).expect("address not owned");
        let range = self.ranges[idx].as_mut().unwrap();
        let start = range.index_of(phys);
        for entry in &mut range.order_map[start..start + count] {
            *entry = NON_HEAD;
        }
    }

    fn order_at(&self, phys: PhysAddr) -> Option<i8> {
        let idx = self.range_for(phys)?;
        let range = self.ranges[idx].as_ref().unwrap();
        Some(range.order_map[range.index_of(phys)])
    }

    /// Registers a new owned physical range, seeding its order map and
    /// free lists with the largest power-of-two blocks that fit.
    ///
    /// `order_map` must have exactly `frames` entries and must live for
    /// the remainder of the kernel's lifetime (it is carved out of the
    /// kernel pool by boot code per spec 4.1's policy notes).
    ///
    /// # Safety
    ///
    /// `base..base + frames * 4096` must be valid, exclusively owned
    /// physical memory, and `hhdm_offset + base` must be a valid mapped
    /// virtual window over it.
    pub unsafe fn add_range(
        &mut self,
        base: PhysAddr,
        frames: usize,
        order_map: &'static mut [i8],
    ) -> Result<(), AllocError> {
        if self.range_count >= MAX_RANGES || order_map.len() != frames || frames == 0 {
            return Err(AllocError::OutOfMemory);
        }
        order_map.fill(NON_HEAD);
        let slot = self.range_count;
        self.ranges[slot] = Some(OwnedRange { base, frames, order_map });
        self.range_count += 1;
        self.total_pages += frames;

        // Seed free lists: walk the range splitting off the largest
        // power-of-two, base-aligned block that still fits at each step.
        let mut offset = 0usize;
        while offset < frames {
            let remaining = frames - offset;
            let mut order = remaining.ilog2() as usize;
            loop {
                let block_pages = 1usize << order;
                let addr = PhysAddr::new(base.as_u64() + offset as u64 * 4096);
                let aligned = addr.is_aligned(block_pages as u64 * 4096);
                if order <= MAX_ORDER && block_pages <= remaining && aligned {
                    break;
                }
                order -= 1;
            }
            let block_pages = 1usize << order;
            let addr = PhysAddr::new(base.as_u64() + offset as u64 * 4096);
            self.push_free(order, addr);
            self.free_pages += block_pages;
            offset += block_pages;
        }
        Ok(())
    }

    /// Returns `true` if any range has been registered (spec 4.1: "the VM
    /// layer refuses to allocate pages if the allocator reports 'not
    /// ready'").
    pub fn is_ready(&self) -> bool {
        self.range_count > 0
    }

    /// Number of free 4 KiB pages across every owned range.
    pub fn free_page_count(&self) -> usize {
        self.free_pages
    }

    /// Total number of 4 KiB pages ever registered with this pool.
    pub fn total_page_count(&self) -> usize {
        self.total_pages
    }

    /// Allocates `n` pages, rounded up to the next power of two. Returns the
    /// physical base of a `2^k`-page block, zero-filled if this pool is the
    /// kernel pool.
    pub fn alloc_pages(&mut self, n: usize) -> Result<PhysAddr, AllocError> {
        if !self.is_ready() {
            return Err(AllocError::NotReady);
        }
        if n == 0 {
            return Err(AllocError::OutOfMemory);
        }
        let k = n.next_power_of_two().trailing_zeros() as usize;
        if k > MAX_ORDER {
            return Err(AllocError::OutOfMemory);
        }

        // Find the smallest non-empty free list at order >= k.
        let found_order = (k..=MAX_ORDER).find(|&o| self.free_heads[o].is_some());
        let Some(mut order) = found_order else {
            return Err(AllocError::OutOfMemory);
        };
        let mut addr = self.pop_free(order).expect("checked non-empty");

        // Split down to order k, pushing each buddy onto its own free list.
        while order > k {
            order -= 1;
            let block_bytes = (1u64 << order) * 4096;
            let buddy = PhysAddr::new(addr.as_u64() + block_bytes);
            self.push_free(order, buddy);
        }

        self.set_order(addr, encode_allocated(k));
        self.mark_non_head(PhysAddr::new(addr.as_u64() + 4096), (1usize << k) - 1);
        self.free_pages -= 1usize << k;

        if self.zero_on_alloc {
            let bytes = (1u64 << k) * 4096;
            // SAFETY: the block was just removed from every free list and
            // is exclusively owned by the caller from this point on.
            unsafe {
                core::ptr::write_bytes(self.phys_to_virt(addr), 0, bytes as usize);
            }
        }
        Ok(addr)
    }

    /// Frees a block previously returned by [`alloc_pages`], merging with
    /// its buddy as long as the buddy is itself free at the same order.
    ///
    /// [`alloc_pages`]: BuddyAllocator::alloc_pages
    ///
    /// `phys` must be the exact base address returned by a prior
    /// `alloc_pages` call that has not yet been freed; this is an internal
    /// kernel invariant, not a user-triggerable condition, so violations
    /// panic rather than returning an error.
    pub fn free(&mut self, phys: PhysAddr) -> Result<(), AllocError> {
        let range_idx = self.range_for(phys).expect("free of address not owned by this pool");
        let mut order = decode_allocated(self.order_at(phys).expect("free of unallocated page"))
            .expect("free of a non-head or already-free page");
        let mut addr = phys;
        self.free_pages += 1usize << order;

        loop {
            if order >= MAX_ORDER {
                break;
            }
            let range = self.ranges[range_idx].as_ref().unwrap();
            let block_bytes = 1u64 << order << 12;
            let rel_offset = addr.as_u64() - range.base.as_u64();
            let buddy_rel = rel_offset ^ block_bytes;
            let buddy_end = buddy_rel + block_bytes;
            if buddy_end > range.frames as u64 * 4096 {
                break;
            }
            let buddy = PhysAddr::new(range.base.as_u64() + buddy_rel);
            let is_buddy_free = self.order_at(buddy).is_some_and(|v| is_free_order(v, order));
            if !is_buddy_free {
                break;
            }
            self.remove_free(order, buddy);
            addr = PhysAddr::new(addr.as_u64().min(buddy.as_u64()));
            order += 1;
        }

        self.push_free(order, addr);
        Ok(())
    }

    /// Linear scan over owned ranges (spec 4.1: "`owns(phys)` is a linear
    /// scan of owned ranges").
    pub fn owns(&self, phys: PhysAddr) -> bool {
        self.range_for(phys).is_some()
    }
}

/// A `BuddyAllocator` behind the single coarse lock spec 4.1 mandates.
pub struct Pool {
    inner: SpinLock<BuddyAllocator>,
}

impl Pool {
    /// Creates a new, empty pool.
    pub const fn new(hhdm_offset: u64, zero_on_alloc: bool) -> Self {
        Self { inner: SpinLock::new(BuddyAllocator::new(hhdm_offset, zero_on_alloc)) }
    }

    /// Registers a physical range with this pool. See
    /// [`BuddyAllocator::add_range`].
    ///
    /// # Safety
    /// Same contract as `BuddyAllocator::add_range`.
    pub unsafe fn add_range(
        &self,
        base: PhysAddr,
        frames: usize,
        order_map: &'static mut [i8],
    ) -> Result<(), AllocError> {
        unsafe { self.inner.lock().add_range(base, frames, order_map) }
    }

    /// See [`BuddyAllocator::alloc_pages`].
    pub fn alloc_pages(&self, n: usize) -> Result<PhysAddr, AllocError> {
        self.inner.lock().alloc_pages(n)
    }

    /// See [`BuddyAllocator::free`].
    pub fn free(&self, phys: PhysAddr) -> Result<(), AllocError> {
        self.inner.lock().free(phys)
    }

    /// See [`BuddyAllocator::owns`].
    pub fn owns(&self, phys: PhysAddr) -> bool {
        self.inner.lock().owns(phys)
    }

    /// See [`BuddyAllocator::free_page_count`].
    pub fn free_page_count(&self) -> usize {
        self.inner.lock().free_page_count()
    }

    /// See [`BuddyAllocator::is_ready`].
    pub fn is_ready(&self) -> bool {
        self.inner.lock().is_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{Layout, alloc_zeroed, dealloc};

    /// A host-simulated physical arena: a real heap allocation whose
    /// address is treated as both the "physical" and (with `hhdm_offset =
    /// 0`) the virtual address, following the teacher workspace's own
    /// off-target PMM test pattern.
    struct FakeArena {
        ptr: *mut u8,
        layout: Layout,
        frames: usize,
    }

    impl FakeArena {
        fn new(frames: usize) -> Self {
            let size = frames * 4096;
            let layout = Layout::from_size_align(size, 4096).unwrap();
            // SAFETY: layout is non-zero and page-aligned.
            let ptr = unsafe { alloc_zeroed(layout) };
            assert!(!ptr.is_null());
            Self { ptr, layout, frames }
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

    fn seeded(frames: usize) -> (FakeArena, BuddyAllocator) {
        let arena = FakeArena::new(frames);
        let mut pmm = BuddyAllocator::new(0, false);
        // SAFETY: `arena` owns real, exclusively-held host memory for the
        // duration of the test.
        unsafe { pmm.add_range(arena.base(), frames, order_map(frames)).unwrap() };
        (arena, pmm)
    }

    #[test]
    fn not_ready_before_seeding() {
        let pmm = BuddyAllocator::new(0, false);
        assert!(!pmm.is_ready());
    }

    #[test]
    fn alloc_free_roundtrip_restores_free_count() {
        let (_arena, mut pmm) = seeded(64);
        let before = pmm.free_page_count();
        let phys = pmm.alloc_pages(4).unwrap();
        assert_ne!(pmm.free_page_count(), before);
        pmm.free(phys).unwrap();
        assert_eq!(pmm.free_page_count(), before);
    }

    #[test]
    fn alloc_rounds_up_to_power_of_two() {
        let (_arena, mut pmm) = seeded(64);
        let before = pmm.free_page_count();
        let _phys = pmm.alloc_pages(3).unwrap();
        // 3 pages rounds up to 4.
        assert_eq!(pmm.free_page_count(), before - 4);
    }

    #[test]
    fn distinct_allocations_do_not_overlap() {
        let (_arena, mut pmm) = seeded(64);
        let a = pmm.alloc_pages(8).unwrap();
        let b = pmm.alloc_pages(8).unwrap();
        assert_ne!(a.as_u64(), b.as_u64());
        let a_end = a.as_u64() + 8 * 4096;
        assert!(b.as_u64() >= a_end || a.as_u64() >= b.as_u64() + 8 * 4096);
    }

    #[test]
    fn free_merges_buddies_back_to_original_block() {
        let (_arena, mut pmm) = seeded(16);
        let before = pmm.free_page_count();
        let a = pmm.alloc_pages(8).unwrap();
        let b = pmm.alloc_pages(8).unwrap();
        pmm.free(a).unwrap();
        pmm.free(b).unwrap();
        assert_eq!(pmm.free_page_count(), before);
        // After both buddies are freed they should have re-merged into one
        // order-(log2 16) block, allocatable again in one shot.
        let whole = pmm.alloc_pages(16).unwrap();
        assert!(whole.as_u64() == a.as_u64() || whole.as_u64() == b.as_u64());
    }

    #[test]
    fn owns_reports_owned_and_foreign_addresses() {
        let (arena, pmm) = seeded(16);
        assert!(pmm.owns(arena.base()));
        assert!(!pmm.owns(PhysAddr::new(0xFFFF_0000)));
    }

    #[test]
    fn out_of_memory_when_exhausted() {
        let (_arena, mut pmm) = seeded(4);
        let _all = pmm.alloc_pages(4).unwrap();
        assert_eq!(pmm.alloc_pages(1), Err(AllocError::OutOfMemory));
    }

    #[test]
    fn too_large_rejected_without_touching_state() {
        let (_arena, mut pmm) = seeded(4);
        let before = pmm.free_page_count();
        assert_eq!(pmm.alloc_pages(1 << (MAX_ORDER + 1)), Err(AllocError::OutOfMemory));
        assert_eq!(pmm.free_page_count(), before);
    }

    #[test]
    fn kernel_pool_zero_fills() {
        let arena = FakeArena::new(8);
        let mut pmm = BuddyAllocator::new(0, true);
        unsafe { pmm.add_range(arena.base(), 8, order_map(8)).unwrap() };
        // SAFETY: scribble over the arena before allocating, to prove the
        // allocator zeroes it.
        unsafe { core::ptr::write_bytes(arena.ptr, 0xAA, 4096) };
        let phys = pmm.alloc_pages(1).unwrap();
        let slice = unsafe { core::slice::from_raw_parts(phys.as_u64() as *const u8, 4096) };
        assert!(slice.iter().all(|&b| b == 0));
    }

    #[test]
    fn pool_wrapper_serializes_through_lock() {
        let arena = FakeArena::new(8);
        let pool = Pool::new(0, false);
        unsafe { pool.add_range(arena.base(), 8, order_map(8)).unwrap() };
        let phys = pool.alloc_pages(2).unwrap();
        assert!(pool.owns(phys));
        pool.free(phys).unwrap();
    }
}
