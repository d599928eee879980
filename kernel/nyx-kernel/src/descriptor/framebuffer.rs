//! The `Framebuffer` descriptor type (spec 4.4; property ids
//! `FramebufferInfo = 2`, `FramebufferPresent = 3`).
//!
//! `original_source/src/kernel/descriptor/framebuffer.cpp` gives every
//! opener its own shadow buffer and composites it to hardware on
//! present. [`nyx_driver_api::framebuffer::Framebuffer`] models one
//! physical framebuffer with no per-process shadow copy, so this core
//! takes the simpler route the `Mappable` flag already describes (spec
//! 6): a process gets pixel access by mapping the framebuffer's backing
//! pages into its own address space (`FramebufferPresent`, handled in
//! [`crate::process::Kernel`] where an `AddressSpace` is reachable), not
//! through `read`/`write`. Both are rejected here accordingly.

use nyx_driver_api::framebuffer::{Framebuffer, FramebufferInfo};

use super::DescError;

/// `get_property(FramebufferInfo)`.
pub fn info(fb: &dyn Framebuffer) -> FramebufferInfo {
    fb.info()
}

/// `read`/`write` are not supported: pixel access goes through
/// `FramebufferPresent`'s memory mapping instead (spec 6, `Mappable` flag).
pub fn read(_offset: u64, _buf: &mut [u8]) -> Result<usize, DescError> {
    Err(DescError::BadCapability)
}

/// See [`read`].
pub fn write(_offset: u64, _buf: &[u8]) -> Result<usize, DescError> {
    Err(DescError::BadCapability)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nyx_core::addr::VirtAddr;
    use nyx_driver_api::framebuffer::PixelFormat;

    struct FakeFb;

    impl Framebuffer for FakeFb {
        fn info(&self) -> FramebufferInfo {
            FramebufferInfo { width: 1024, height: 768, pitch: 4096, bpp: 32, pixel_format: PixelFormat::Rgb32 }
        }
        fn base_address(&self) -> VirtAddr {
            VirtAddr::new(0xffff_8000_0000_0000)
        }
        fn put_pixel(&self, _x: u32, _y: u32, _color: u32) {}
        unsafe fn copy_within(&self, _src_offset: u64, _dst_offset: u64, _count: usize) {}
        unsafe fn fill_zero(&self, _offset: u64, _count: usize) {}
    }

    #[test]
    fn info_reports_geometry() {
        let fb = FakeFb;
        assert_eq!(info(&fb).width, 1024);
    }

    #[test]
    fn read_and_write_are_unsupported() {
        let mut buf = [0u8; 4];
        assert_eq!(read(0, &mut buf).unwrap_err(), DescError::BadCapability);
        assert_eq!(write(0, &buf).unwrap_err(), DescError::BadCapability);
    }
}
