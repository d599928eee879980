//! The `SharedMemory` descriptor type (spec 4.6).
//!
//! The segment table, physical pages, and per-process mapping refcounts
//! live in `nyx_ipc::shm::ShmTable`, owned by [`crate::process::Kernel`].
//! This module only translates `open(type=SharedMemory, name_ptr, length,
//! 0)` into a [`nyx_ipc::shm::ShmTable::open`] call, grounded in
//! `original_source/src/kernel/descriptor/shared_memory.cpp`'s
//! `open_shared_memory`.

use nyx_core::id::Pid;
use nyx_ipc::shm::{Mapping, SegmentMapper, ShmError, ShmTable};

use super::DescError;

impl From<ShmError> for DescError {
    fn from(e: ShmError) -> Self {
        match e {
            ShmError::TooLarge | ShmError::NameTooLong | ShmError::LengthMismatch => DescError::BadArgument,
            ShmError::TooManySegments | ShmError::TooManyMappings => DescError::TooManyDescriptors,
            ShmError::NotFound => DescError::NotFound,
            ShmError::OutOfMemory => DescError::OutOfMemory,
        }
    }
}

/// `open(type=SharedMemory, a0=name_ptr (already copied into `name`),
/// a1=length, a2=_)` (spec 4.6).
pub fn open(table: &ShmTable, mapper: &dyn SegmentMapper, pid: Pid, name: &[u8], length: u64) -> Result<Mapping, DescError> {
    Ok(table.open(mapper, pid, name, length)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU64, Ordering};
    use nyx_core::addr::{PhysAddr, VirtAddr};

    struct FakeMapper {
        next_phys: AtomicU64,
        next_virt: AtomicU64,
    }

    impl SegmentMapper for FakeMapper {
        fn alloc_frames(&self, page_count: usize) -> Result<PhysAddr, ShmError> {
            let base = self.next_phys.fetch_add((page_count as u64) * 4096, Ordering::SeqCst);
            Ok(PhysAddr::new(base))
        }
        fn free_frames(&self, _base: PhysAddr, _page_count: usize) {}
        fn map_into(&self, _pid: Pid, _base: PhysAddr, page_count: usize) -> Result<VirtAddr, ShmError> {
            let base = self.next_virt.fetch_add((page_count as u64) * 4096, Ordering::SeqCst);
            Ok(VirtAddr::new(base))
        }
        fn unmap_from(&self, _pid: Pid, _virt: VirtAddr, _page_count: usize) {}
    }

    #[test]
    fn open_creates_a_named_segment() {
        let table = ShmTable::new();
        let mapper = FakeMapper { next_phys: AtomicU64::new(0x10_0000), next_virt: AtomicU64::new(0x4000_0000) };
        let mapping = open(&table, &mapper, Pid::new(1), b"wm.registry", 0).unwrap();
        assert_eq!(mapping.info.length, 4096);
    }
}
