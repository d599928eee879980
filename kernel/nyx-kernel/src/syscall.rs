//! L5 system-call dispatcher (spec 4.7).
//!
//! One entry point, reached from the architecture-specific syscall-entry
//! stub after it has saved the caller's general registers into its
//! [`Context`] and switched onto the caller's kernel stack. `rax` is the
//! syscall number on entry; `rdi, rsi, rdx, r10, r8, r9` are the six
//! argument registers (`r10` standing in for `rcx`, clobbered by the
//! `syscall` instruction itself, exactly as spec 4.7 describes). On return
//! `ctx.rax` holds the signed 64-bit result, unless the outcome is
//! [`DispatchOutcome::Unschedule`] — the dispatcher never writes `rax`
//! itself when a descriptor operation has already suspended the caller
//! (spec 4.7: "a `WouldBlock`... implies Unschedule without writing
//! `rax`").

use nyx_core::addr::VirtAddr;
use nyx_core::id::Pid;
use nyx_core::paging::Size4KiB;
use nyx_ipc::pipe::UserCopy;
use nyx_mm::mapper::{PageMapper, PageTranslator};
use nyx_sched::{Context, Outcome};
use nyx_tty::cell::Cell;

use crate::descriptor::{self, type_id, DescEntry, DescError, DescFlags, Property, Resource};
use crate::handle::Handle;
use crate::process::Kernel;

/// This core's own kernel ABI version, returned by `AbiMajor`/`AbiMinor`.
/// Not named by the distilled spec; fixed here as the crate's own
/// versioning convention.
const ABI_MAJOR: i64 = 1;
const ABI_MINOR: i64 = 0;

/// Generic failure return value (spec 7: "`-1` is the generic failure
/// code").
const FAIL: i64 = -1;

/// Largest single read/write this dispatcher will stage through an
/// on-stack buffer per call. Not a spec quantity: real block-device
/// transfers larger than this are serviced by the caller issuing several
/// syscalls, the same way a userspace read loop already has to handle
/// short reads.
const MAX_IO_CHUNK: usize = 4096;

/// What the dispatcher tells its caller to do next (spec 4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Write `rax` and resume the caller.
    Continue,
    /// Same as `Continue`, but also ask the scheduler to pick the next
    /// ready process before resuming anyone (`Yield`/timer-driven).
    Reschedule,
    /// The caller is no longer runnable; `rax` must not be touched (either
    /// it already exited, or a descriptor op suspended it and the eventual
    /// waker owns writing its result).
    Unschedule,
}

/// Dispatches one syscall for `pid`, whose saved frame is `ctx`. Args are
/// read from `ctx` before any field is overwritten, so `ctx` can double as
/// both the argument source and the return-value sink.
pub fn dispatch<M: PageMapper<Size4KiB> + PageTranslator>(kernel: &Kernel<M>, pid: Pid, ctx: &mut Context) -> DispatchOutcome {
    let number = ctx.rax;
    let a0 = ctx.rdi;
    let a1 = ctx.rsi;
    let a2 = ctx.rdx;
    let a3 = ctx.r10;

    match number {
        0 => {
            ctx.rax = ABI_MAJOR as u64;
            DispatchOutcome::Continue
        }
        1 => {
            ctx.rax = ABI_MINOR as u64;
            DispatchOutcome::Continue
        }
        2 => {
            let _ = kernel.sched.exit(pid);
            kernel.exit_process(pid);
            DispatchOutcome::Unschedule
        }
        3 => {
            let _ = kernel.sched.yield_now(pid);
            DispatchOutcome::Reschedule
        }
        4 => {
            ctx.rax = descriptor_open(kernel, pid, a0, a1, a2, a3) as u64;
            DispatchOutcome::Continue
        }
        5 => {
            ctx.rax = descriptor_query(kernel, pid, a0) as u64;
            DispatchOutcome::Continue
        }
        6 => match descriptor_read(kernel, pid, a0, a1, a2) {
            Outcome::Returned(v) => {
                ctx.rax = v as u64;
                DispatchOutcome::Continue
            }
            Outcome::Suspended => DispatchOutcome::Unschedule,
        },
        7 => match descriptor_write(kernel, pid, a0, a1, a2) {
            Outcome::Returned(v) => {
                ctx.rax = v as u64;
                DispatchOutcome::Continue
            }
            Outcome::Suspended => DispatchOutcome::Unschedule,
        },
        8 => {
            ctx.rax = descriptor_close(kernel, pid, a0) as u64;
            DispatchOutcome::Continue
        }
        9 => {
            ctx.rax = descriptor_get_property(kernel, pid, a0, a1, a2, a3) as u64;
            DispatchOutcome::Continue
        }
        10 => {
            ctx.rax = descriptor_set_property(kernel, pid, a0, a1, a2, a3) as u64;
            DispatchOutcome::Continue
        }
        _ => {
            ctx.rax = FAIL as u64;
            DispatchOutcome::Continue
        }
    }
}

fn handle_result(result: Result<Handle, DescError>) -> i64 {
    match result {
        Ok(handle) => handle.as_raw() as i64,
        Err(_) => FAIL,
    }
}

/// `DescriptorOpen`: `a0` names the type id, `a1..a3` are type-specific
/// (spec 4.7 row 4, spec 4.4's per-type `open` argument conventions).
fn descriptor_open<M: PageMapper<Size4KiB> + PageTranslator>(
    kernel: &Kernel<M>,
    pid: Pid,
    a0: u64,
    a1: u64,
    a2: u64,
    a3: u64,
) -> i64 {
    let type_id = a0 as u16;
    let opened: Result<(DescFlags, Resource, &'static [u8]), DescError> = match type_id {
        type_id::CONSOLE => {
            let has_vty = kernel.sched.with_slot(pid, |s| s.attached_vty.is_some()).unwrap_or(false);
            kernel.console.open(pid, has_vty).map(|()| (DescFlags::WRITABLE, Resource::Console, b"console" as &[u8]))
        }
        type_id::SERIAL => match kernel.drivers().serial {
            Some(port) => {
                descriptor::serial::open(port);
                Ok((DescFlags::READABLE | DescFlags::WRITABLE, Resource::Serial, b"serial"))
            }
            None => Err(DescError::NotFound),
        },
        type_id::KEYBOARD => match kernel.drivers().keyboard {
            Some(_) => Ok((DescFlags::READABLE, Resource::Keyboard, b"keyboard")),
            None => Err(DescError::NotFound),
        },
        type_id::MOUSE => match kernel.drivers().mouse {
            Some(_) => Ok((DescFlags::READABLE, Resource::Mouse, b"mouse")),
            None => Err(DescError::NotFound),
        },
        type_id::FRAMEBUFFER => match kernel.drivers().framebuffer {
            Some(_) => Ok((DescFlags::MAPPABLE | DescFlags::DEVICE, Resource::Framebuffer, b"framebuffer")),
            None => Err(DescError::NotFound),
        },
        type_id::BLOCK_DEVICE => {
            let index = a1 as usize;
            match kernel.drivers().block_devices.get(index).copied().flatten() {
                Some(_) => Ok((
                    DescFlags::READABLE | DescFlags::WRITABLE | DescFlags::SEEKABLE | DescFlags::BLOCK | DescFlags::DEVICE,
                    Resource::BlockDevice { index },
                    b"block_device",
                )),
                None => Err(DescError::NotFound),
            }
        }
        type_id::PIPE => descriptor::pipe::open(&kernel.pipes, a1, a2)
            .map(|(endpoint, flags)| (flags, Resource::Pipe { endpoint }, b"pipe" as &[u8])),
        type_id::SHARED_MEMORY => {
            let mut name_buf = [0u8; 48];
            let name_len = (a2 as usize).min(name_buf.len());
            if kernel.copy_from_user(pid, VirtAddr::new(a1), &mut name_buf[..name_len]).is_err() {
                Err(DescError::BadArgument)
            } else {
                descriptor::shm::open(&kernel.shm, kernel, pid, &name_buf[..name_len], a3)
                    .map(|mapping| (DescFlags::READABLE | DescFlags::WRITABLE | DescFlags::MAPPABLE, Resource::SharedMemory { mapping }, b"shm" as &[u8]))
            }
        }
        type_id::VTY => descriptor::vty::open(&kernel.vtys, a1).map(|index| (DescFlags::READABLE | DescFlags::WRITABLE, Resource::Vty { index }, b"vty" as &[u8])),
        _ => Err(DescError::BadArgument),
    };

    let result = opened.and_then(|(flags, resource, name)| {
        kernel
            .with_descriptors_mut(pid, |table| table.install(type_id, flags, name, resource))
            .map_err(|_| DescError::BadHandle)?
    });
    handle_result(result)
}

/// `DescriptorQuery`: raw flag bits for handle `a0` (spec 4.7 row 5).
fn descriptor_query<M: PageMapper<Size4KiB> + PageTranslator>(kernel: &Kernel<M>, pid: Pid, a0: u64) -> i64 {
    let handle = Handle::from_raw(a0);
    match kernel.with_descriptors(pid, |table| table.query(handle)) {
        Ok(Ok(bits)) => bits as i64,
        _ => FAIL,
    }
}

fn copy_entry<M: PageMapper<Size4KiB> + PageTranslator>(
    kernel: &Kernel<M>,
    pid: Pid,
    handle: Handle,
) -> Result<(u16, DescFlags, Resource), DescError> {
    kernel
        .with_descriptors(pid, |table| table.get(handle).map(|e: &DescEntry| (e.type_id, e.flags, e.resource)))
        .map_err(|_| DescError::BadHandle)?
}

/// `DescriptorRead`: `a0` is the handle, `a1` the user buffer address,
/// `a2` the requested length (spec 4.7 row 6).
fn descriptor_read<M: PageMapper<Size4KiB> + PageTranslator>(kernel: &Kernel<M>, pid: Pid, a0: u64, a1: u64, a2: u64) -> Outcome<i64> {
    let handle = Handle::from_raw(a0);
    let (_, _, resource) = match copy_entry(kernel, pid, handle) {
        Ok(v) => v,
        Err(_) => return Outcome::Returned(FAIL),
    };
    let user_addr = VirtAddr::new(a1);
    let len = (a2 as usize).min(MAX_IO_CHUNK);

    match resource {
        Resource::Pipe { endpoint } => kernel.pipes.read(&kernel.sched, kernel, &endpoint, pid, user_addr, len, false),
        Resource::Vty { index } => {
            let mut buf = [0u8; MAX_IO_CHUNK];
            let Some(vty) = kernel.vtys.get(index) else { return Outcome::Returned(FAIL) };
            let n = vty.read(&mut buf[..len]);
            if kernel.copy_to_user(pid, user_addr, &buf[..n]).is_err() {
                Outcome::Returned(FAIL)
            } else {
                Outcome::Returned(n as i64)
            }
        }
        Resource::Serial => with_device_buffer(kernel, pid, user_addr, len, |_| Ok(0), |port, _offset, buf| {
            descriptor::serial::read(port, 0, buf)
        }, kernel.drivers().serial),
        Resource::Keyboard => with_queue_read(kernel, pid, user_addr, len, kernel.drivers().keyboard, descriptor::keyboard::read),
        Resource::Mouse => with_queue_read(kernel, pid, user_addr, len, kernel.drivers().mouse, descriptor::mouse::read),
        Resource::Console => stage_read(kernel, pid, user_addr, len, |buf| descriptor::console::read(0, buf)),
        Resource::Framebuffer => stage_read(kernel, pid, user_addr, len, |buf| descriptor::framebuffer::read(0, buf)),
        Resource::BlockDevice { index } => match kernel.drivers().block_devices.get(index).copied().flatten() {
            Some(device) => stage_read(kernel, pid, user_addr, len, |buf| descriptor::block::read(device, 0, buf)),
            None => Outcome::Returned(FAIL),
        },
        Resource::SharedMemory { .. } => Outcome::Returned(FAIL),
    }
}

/// `DescriptorWrite`: same argument shape as [`descriptor_read`] (spec 4.7
/// row 7).
fn descriptor_write<M: PageMapper<Size4KiB> + PageTranslator>(kernel: &Kernel<M>, pid: Pid, a0: u64, a1: u64, a2: u64) -> Outcome<i64> {
    let handle = Handle::from_raw(a0);
    let (_, _, resource) = match copy_entry(kernel, pid, handle) {
        Ok(v) => v,
        Err(_) => return Outcome::Returned(FAIL),
    };
    let user_addr = VirtAddr::new(a1);
    let len = (a2 as usize).min(MAX_IO_CHUNK);

    match resource {
        Resource::Pipe { endpoint } => kernel.pipes.write(&kernel.sched, kernel, &endpoint, pid, user_addr, len, false),
        Resource::Vty { index } => {
            let mut buf = [0u8; MAX_IO_CHUNK];
            if kernel.copy_from_user(pid, user_addr, &mut buf[..len]).is_err() {
                return Outcome::Returned(FAIL);
            }
            match kernel.vtys.get(index) {
                Some(vty) => {
                    vty.write(&buf[..len]);
                    Outcome::Returned(len as i64)
                }
                None => Outcome::Returned(FAIL),
            }
        }
        Resource::Console => {
            let attached_vty = kernel.sched.with_slot(pid, |s| s.attached_vty).unwrap_or(None);
            let mut buf = [0u8; MAX_IO_CHUNK];
            if kernel.copy_from_user(pid, user_addr, &mut buf[..len]).is_err() {
                return Outcome::Returned(FAIL);
            }
            if let Some(vty_index) = attached_vty {
                match kernel.vtys.get(vty_index as usize) {
                    Some(vty) => {
                        vty.write(&buf[..len]);
                        Outcome::Returned(len as i64)
                    }
                    None => Outcome::Returned(FAIL),
                }
            } else {
                match kernel.drivers().console {
                    Some(port) => match descriptor::console::write(port, 0, &buf[..len]) {
                        Ok(n) => Outcome::Returned(n as i64),
                        Err(_) => Outcome::Returned(FAIL),
                    },
                    None => Outcome::Returned(FAIL),
                }
            }
        }
        Resource::Serial => match kernel.drivers().serial {
            Some(port) => stage_write(kernel, pid, user_addr, len, |buf| descriptor::serial::write(port, 0, buf)),
            None => Outcome::Returned(FAIL),
        },
        Resource::BlockDevice { index } => match kernel.drivers().block_devices.get(index).copied().flatten() {
            Some(device) => stage_write(kernel, pid, user_addr, len, |buf| descriptor::block::write(device, 0, buf)),
            None => Outcome::Returned(FAIL),
        },
        Resource::Keyboard | Resource::Mouse | Resource::Framebuffer => Outcome::Returned(FAIL),
        Resource::SharedMemory { .. } => Outcome::Returned(FAIL),
    }
}

fn stage_read<M: PageMapper<Size4KiB> + PageTranslator>(
    kernel: &Kernel<M>,
    pid: Pid,
    user_addr: VirtAddr,
    len: usize,
    op: impl FnOnce(&mut [u8]) -> Result<usize, DescError>,
) -> Outcome<i64> {
    let mut buf = [0u8; MAX_IO_CHUNK];
    match op(&mut buf[..len]) {
        Ok(n) => {
            if kernel.copy_to_user(pid, user_addr, &buf[..n]).is_err() {
                Outcome::Returned(FAIL)
            } else {
                Outcome::Returned(n as i64)
            }
        }
        Err(_) => Outcome::Returned(FAIL),
    }
}

fn stage_write<M: PageMapper<Size4KiB> + PageTranslator>(
    kernel: &Kernel<M>,
    pid: Pid,
    user_addr: VirtAddr,
    len: usize,
    op: impl FnOnce(&[u8]) -> Result<usize, DescError>,
) -> Outcome<i64> {
    let mut buf = [0u8; MAX_IO_CHUNK];
    if kernel.copy_from_user(pid, user_addr, &mut buf[..len]).is_err() {
        return Outcome::Returned(FAIL);
    }
    match op(&buf[..len]) {
        Ok(n) => Outcome::Returned(n as i64),
        Err(_) => Outcome::Returned(FAIL),
    }
}

fn with_queue_read<M: PageMapper<Size4KiB> + PageTranslator, E: Copy>(
    kernel: &Kernel<M>,
    pid: Pid,
    user_addr: VirtAddr,
    len: usize,
    queue: Option<&dyn nyx_driver_api::input::InputQueue<Event = E>>,
    op: fn(&dyn nyx_driver_api::input::InputQueue<Event = E>, u64, &mut [u8]) -> Result<usize, DescError>,
) -> Outcome<i64> {
    match queue {
        Some(q) => stage_read(kernel, pid, user_addr, len, |buf| op(q, 0, buf)),
        None => Outcome::Returned(FAIL),
    }
}

fn with_device_buffer<M: PageMapper<Size4KiB> + PageTranslator, D: ?Sized>(
    kernel: &Kernel<M>,
    pid: Pid,
    user_addr: VirtAddr,
    len: usize,
    _unused: impl FnOnce(&D) -> Result<usize, DescError>,
    op: impl FnOnce(&D, u64, &mut [u8]) -> Result<usize, DescError>,
    device: Option<&D>,
) -> Outcome<i64> {
    match device {
        Some(dev) => stage_read(kernel, pid, user_addr, len, |buf| op(dev, 0, buf)),
        None => Outcome::Returned(FAIL),
    }
}

/// `DescriptorClose`: `a0` is the handle (spec 4.7 row 8).
fn descriptor_close<M: PageMapper<Size4KiB> + PageTranslator>(kernel: &Kernel<M>, pid: Pid, a0: u64) -> i64 {
    let handle = Handle::from_raw(a0);
    let entry = match kernel.with_descriptors_mut(pid, |table| table.close(handle)) {
        Ok(Ok(entry)) => entry,
        _ => return FAIL,
    };
    close_resource(kernel, pid, entry.resource);
    0
}

/// Runs the resource-specific teardown a closed descriptor's underlying
/// resource needs, shared between an explicit `DescriptorClose` syscall and
/// [`crate::process::Kernel::exit_process`]'s bulk cleanup on process exit
/// (spec 4.3: "`exit` ... releases ... descriptors"). Types with no
/// per-instance state to release (serial, keyboard, mouse, framebuffer,
/// block devices, VTYs) need nothing here.
pub(crate) fn close_resource<M: PageMapper<Size4KiB> + PageTranslator>(kernel: &Kernel<M>, pid: Pid, resource: Resource) {
    match resource {
        Resource::Console => kernel.console.close(pid),
        Resource::Pipe { endpoint } => kernel.pipes.close(&kernel.sched, kernel, endpoint, pid),
        Resource::SharedMemory { mapping } => kernel.shm.close(kernel, mapping),
        _ => {}
    }
}

/// Reads directly into a kernel-supplied buffer from a descriptor in the
/// kernel's own table (SPEC_FULL.md "Kernel-owned descriptor table"; spec
/// 4.4: "the kernel process owns a parallel table for descriptors it opens
/// on its own behalf"). Unlike [`descriptor_read`], which stages through a
/// user address, the caller here is kernel code that already has `buf` in
/// kernel memory — a block-device-backed filesystem reading a sector, say.
pub fn read_kernel<M: PageMapper<Size4KiB> + PageTranslator>(kernel: &Kernel<M>, handle: Handle, offset: u64, buf: &mut [u8]) -> Result<usize, DescError> {
    let resource = kernel.with_kernel_descriptors(|table| table.get(handle).map(|e| e.resource))?;
    match resource {
        Resource::BlockDevice { index } => match kernel.drivers().block_devices.get(index).copied().flatten() {
            Some(device) => descriptor::block::read(device, offset, buf),
            None => Err(DescError::NotFound),
        },
        Resource::Serial => match kernel.drivers().serial {
            Some(port) => descriptor::serial::read(port, offset, buf),
            None => Err(DescError::NotFound),
        },
        _ => Err(DescError::BadCapability),
    }
}

/// Writes directly from a kernel-supplied buffer to a kernel-owned
/// descriptor. See [`read_kernel`].
pub fn write_kernel<M: PageMapper<Size4KiB> + PageTranslator>(kernel: &Kernel<M>, handle: Handle, offset: u64, buf: &[u8]) -> Result<usize, DescError> {
    let resource = kernel.with_kernel_descriptors(|table| table.get(handle).map(|e| e.resource))?;
    match resource {
        Resource::BlockDevice { index } => match kernel.drivers().block_devices.get(index).copied().flatten() {
            Some(device) => descriptor::block::write(device, offset, buf),
            None => Err(DescError::NotFound),
        },
        Resource::Serial => match kernel.drivers().serial {
            Some(port) => descriptor::serial::write(port, offset, buf),
            None => Err(DescError::NotFound),
        },
        _ => Err(DescError::BadCapability),
    }
}

/// Reads a typed property from a kernel-owned descriptor. Supports the same
/// property ids as [`descriptor_get_property`] does for `BlockGeometry`;
/// kernel code holding a block-device handle rarely needs the rest (the
/// name/framebuffer/pipe/vty properties exist for user-facing descriptors).
pub fn get_property_kernel<M: PageMapper<Size4KiB> + PageTranslator>(kernel: &Kernel<M>, handle: Handle, property: Property, out: &mut [u8]) -> Result<usize, DescError> {
    let resource = kernel.with_kernel_descriptors(|table| table.get(handle).map(|e| e.resource))?;
    match (property, resource) {
        (Property::BlockGeometry, Resource::BlockDevice { index }) => match kernel.drivers().block_devices.get(index).copied().flatten() {
            Some(device) => {
                let geometry = descriptor::block::geometry(device);
                let mut buf = [0u8; 16];
                buf[0..8].copy_from_slice(&geometry.sector_size.to_le_bytes());
                buf[8..16].copy_from_slice(&geometry.sector_count.to_le_bytes());
                let n = buf.len().min(out.len());
                out[..n].copy_from_slice(&buf[..n]);
                Ok(n)
            }
            None => Err(DescError::NotFound),
        },
        _ => Err(DescError::BadArgument),
    }
}

/// `DescriptorGetProperty`: `a0` is the handle, `a1` the property id,
/// `a2`/`a3` a user `(ptr, len)` destination for the encoded payload (spec
/// 4.7 "…DescriptorGetProperty / SetProperty: typed property access").
fn descriptor_get_property<M: PageMapper<Size4KiB> + PageTranslator>(
    kernel: &Kernel<M>,
    pid: Pid,
    a0: u64,
    a1: u64,
    a2: u64,
    a3: u64,
) -> i64 {
    let handle = Handle::from_raw(a0);
    let Some(property) = Property::from_raw(a1) else { return FAIL };
    let dest = VirtAddr::new(a2);
    let dest_len = a3 as usize;

    let (_, _, resource) = match copy_entry(kernel, pid, handle) {
        Ok(v) => v,
        Err(_) => return FAIL,
    };

    match (property, resource) {
        (Property::CommonName, _) => {
            let name = kernel.with_descriptors(pid, |table| table.get(handle).map(|e| {
                let mut buf = [0u8; 32];
                let n = e.name().len().min(buf.len());
                buf[..n].copy_from_slice(&e.name()[..n]);
                (buf, n)
            }));
            match name {
                Ok(Ok((buf, n))) => write_user(kernel, pid, dest, dest_len, &buf[..n]),
                _ => FAIL,
            }
        }
        (Property::FramebufferInfo, Resource::Framebuffer) => match kernel.drivers().framebuffer {
            Some(fb) => {
                let info = descriptor::framebuffer::info(fb);
                let mut buf = [0u8; 20];
                buf[0..4].copy_from_slice(&info.width.to_le_bytes());
                buf[4..8].copy_from_slice(&info.height.to_le_bytes());
                buf[8..12].copy_from_slice(&info.pitch.to_le_bytes());
                buf[12..16].copy_from_slice(&(info.bpp as u32).to_le_bytes());
                buf[16..20].copy_from_slice(&(info.pixel_format as u32).to_le_bytes());
                write_user(kernel, pid, dest, dest_len, &buf)
            }
            None => FAIL,
        },
        // Mapping the framebuffer's backing pages into a process requires
        // a physical-frame handle `nyx_driver_api::Framebuffer` does not
        // expose (see `descriptor::framebuffer`'s module doc comment);
        // left unimplemented rather than faked.
        (Property::FramebufferPresent, Resource::Framebuffer) => FAIL,
        (Property::BlockGeometry, Resource::BlockDevice { index }) => match kernel.drivers().block_devices.get(index).copied().flatten() {
            Some(device) => {
                let geometry = descriptor::block::geometry(device);
                let mut buf = [0u8; 16];
                buf[0..8].copy_from_slice(&geometry.sector_size.to_le_bytes());
                buf[8..16].copy_from_slice(&geometry.sector_count.to_le_bytes());
                write_user(kernel, pid, dest, dest_len, &buf)
            }
            None => FAIL,
        },
        (Property::SharedMemoryInfo, Resource::SharedMemory { mapping }) => {
            let info = kernel.shm.info(&mapping);
            let mut buf = [0u8; 16];
            buf[0..8].copy_from_slice(&info.base.as_u64().to_le_bytes());
            buf[8..16].copy_from_slice(&info.length.to_le_bytes());
            write_user(kernel, pid, dest, dest_len, &buf)
        }
        (Property::PipeInfo, Resource::Pipe { endpoint }) => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&endpoint.pipe_id().0.to_le_bytes());
            write_user(kernel, pid, dest, dest_len, &buf)
        }
        (Property::VtyInfo, Resource::Vty { index }) => match kernel.vtys.get(index) {
            Some(vty) => {
                let info = vty.info();
                let mut buf = [0u8; 16];
                buf[0..4].copy_from_slice(&info.cols.to_le_bytes());
                buf[4..8].copy_from_slice(&info.rows.to_le_bytes());
                buf[8..12].copy_from_slice(&info.cursor_col.to_le_bytes());
                buf[12..16].copy_from_slice(&info.cursor_row.to_le_bytes());
                write_user(kernel, pid, dest, dest_len, &buf)
            }
            None => FAIL,
        },
        (Property::VtyCells, Resource::Vty { index }) => match kernel.vtys.get(index) {
            Some(vty) => {
                const MAX_CELLS: usize = MAX_IO_CHUNK / 4;
                let mut cells = [Cell::BLANK; MAX_CELLS];
                let requested = (dest_len / 4).min(MAX_CELLS);
                let n = vty.get_cells(&mut cells[..requested]);
                let mut buf = [0u8; MAX_IO_CHUNK];
                for (i, cell) in cells[..n].iter().enumerate() {
                    buf[i * 4] = cell.ch;
                    buf[i * 4 + 1] = cell.fg;
                    buf[i * 4 + 2] = cell.bg;
                    buf[i * 4 + 3] = cell.flags.bits();
                }
                write_user(kernel, pid, dest, n * 4, &buf[..n * 4])
            }
            None => FAIL,
        },
        _ => FAIL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{DriverRegistry, Kernel};
    use nyx_core::addr::PhysAddr;
    use nyx_core::paging::{Page, PhysFrame};
    use nyx_driver_api::block::{BlockDevice, IoError};
    use nyx_mm::mapper::{MapFlags, MapFlush, UnmapError as MapperUnmapError};
    use nyx_mm::pmm::Pool;
    use nyx_mm::vmm::AddressSpace;
    use nyx_mm::PAGE_SIZE;
    use nyx_sched::ProcState;
    use std::alloc::{alloc_zeroed, dealloc, Layout};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeMapper {
        entries: Mutex<HashMap<u64, u64>>,
    }

    impl FakeMapper {
        fn new() -> Self {
            Self { entries: Mutex::new(HashMap::new()) }
        }
    }

    unsafe impl PageMapper<Size4KiB> for FakeMapper {
        unsafe fn map(
            &self,
            _root: PhysAddr,
            page: Page<Size4KiB>,
            frame: PhysFrame<Size4KiB>,
            _flags: MapFlags,
            _alloc: &mut dyn FnMut() -> PhysFrame<Size4KiB>,
        ) -> MapFlush {
            self.entries.lock().unwrap().insert(page.start_address().as_u64(), frame.start_address().as_u64());
            MapFlush::new(page.start_address())
        }

        unsafe fn unmap(&self, _root: PhysAddr, page: Page<Size4KiB>) -> Result<(PhysFrame<Size4KiB>, MapFlush), MapperUnmapError> {
            match self.entries.lock().unwrap().remove(&page.start_address().as_u64()) {
                Some(phys) => Ok((PhysFrame::containing_address(PhysAddr::new(phys)), MapFlush::new(page.start_address()))),
                None => Err(MapperUnmapError::NotMapped),
            }
        }

        unsafe fn update_flags(&self, _root: PhysAddr, page: Page<Size4KiB>, _flags: MapFlags) -> Result<MapFlush, MapperUnmapError> {
            Ok(MapFlush::new(page.start_address()))
        }
    }

    unsafe impl PageTranslator for FakeMapper {
        unsafe fn translate_addr(&self, _root: PhysAddr, virt: VirtAddr) -> Option<PhysAddr> {
            let entries = self.entries.lock().unwrap();
            let page_base = virt.align_down(PAGE_SIZE);
            let phys = *entries.get(&page_base.as_u64())?;
            Some(PhysAddr::new(phys + virt.page_offset()))
        }
    }

    fn noop_dealloc(_frame: PhysFrame<Size4KiB>) {}

    fn seeded_pool(frames: usize) -> (*mut u8, Layout, Pool) {
        let size = frames * PAGE_SIZE as usize;
        let layout = Layout::from_size_align(size, PAGE_SIZE as usize).unwrap();
        let ptr = unsafe { alloc_zeroed(layout) };
        let pool = Pool::new(0, true);
        let order_map: &'static mut [i8] = Box::leak(vec![0i8; frames].into_boxed_slice());
        unsafe { pool.add_range(PhysAddr::new(ptr as u64), frames, order_map).unwrap() };
        (ptr, layout, pool)
    }

    fn fake_space(pool: &Pool) -> AddressSpace<FakeMapper> {
        let kernel_root = pool.alloc_pages(1).unwrap();
        unsafe { AddressSpace::new_user(kernel_root, FakeMapper::new(), 0, pool, noop_dealloc).unwrap() }
    }

    fn zero_ctx(number: u64, a0: u64, a1: u64, a2: u64, a3: u64) -> Context {
        let mut ctx = Context::zeroed();
        ctx.rax = number;
        ctx.rdi = a0;
        ctx.rsi = a1;
        ctx.rdx = a2;
        ctx.r10 = a3;
        ctx
    }

    struct FakeDisk {
        sectors: RefCell<[[u8; 512]; 4]>,
    }

    impl FakeDisk {
        fn new() -> Self {
            Self { sectors: RefCell::new([[0; 512]; 4]) }
        }
    }

    impl BlockDevice for FakeDisk {
        fn read_sector(&self, sector: u64, buf: &mut [u8]) -> Result<(), IoError> {
            buf.copy_from_slice(&self.sectors.borrow()[sector as usize]);
            Ok(())
        }
        fn write_sector(&self, sector: u64, buf: &[u8]) -> Result<(), IoError> {
            self.sectors.borrow_mut()[sector as usize].copy_from_slice(buf);
            Ok(())
        }
        fn sector_size(&self) -> usize {
            512
        }
        fn sector_count(&self) -> u64 {
            4
        }
    }

    #[test]
    fn abi_queries_return_the_fixed_version() {
        let (ptr, layout, pool) = seeded_pool(64);
        let kernel: Kernel<FakeMapper> = Kernel::new(&pool, DriverRegistry::empty());
        let pid = Pid::new(1);
        kernel.register_process(pid, fake_space(&pool)).unwrap();

        let mut ctx = zero_ctx(0, 0, 0, 0, 0);
        assert_eq!(dispatch(&kernel, pid, &mut ctx), DispatchOutcome::Continue);
        assert_eq!(ctx.rax as i64, ABI_MAJOR);

        let mut ctx = zero_ctx(1, 0, 0, 0, 0);
        assert_eq!(dispatch(&kernel, pid, &mut ctx), DispatchOutcome::Continue);
        assert_eq!(ctx.rax as i64, ABI_MINOR);

        unsafe { dealloc(ptr, layout) };
    }

    #[test]
    fn yield_reschedules_without_touching_rax() {
        let (ptr, layout, pool) = seeded_pool(64);
        let kernel: Kernel<FakeMapper> = Kernel::new(&pool, DriverRegistry::empty());
        let root = pool.alloc_pages(1).unwrap();
        let pid = kernel.sched.allocate(root, VirtAddr::new(0), VirtAddr::new(0), VirtAddr::new(0), VirtAddr::new(0x1000)).unwrap();
        kernel.sched.pick_next().unwrap();

        let mut ctx = zero_ctx(3, 0, 0, 0, 0);
        assert_eq!(dispatch(&kernel, pid, &mut ctx), DispatchOutcome::Reschedule);
        assert_eq!(kernel.sched.with_slot(pid, |s| s.state()).unwrap(), ProcState::Ready);

        unsafe { dealloc(ptr, layout) };
    }

    #[test]
    fn console_open_query_close_round_trips() {
        let (ptr, layout, pool) = seeded_pool(64);
        let kernel: Kernel<FakeMapper> = Kernel::new(&pool, DriverRegistry::empty());
        let root = pool.alloc_pages(1).unwrap();
        let pid = kernel.sched.allocate(root, VirtAddr::new(0), VirtAddr::new(0), VirtAddr::new(0), VirtAddr::new(0x1000)).unwrap();
        kernel.register_process(pid, fake_space(&pool)).unwrap();

        let mut ctx = zero_ctx(4, type_id::CONSOLE as u64, 0, 0, 0);
        assert_eq!(dispatch(&kernel, pid, &mut ctx), DispatchOutcome::Continue);
        let handle_raw = ctx.rax as i64;
        assert!(handle_raw > 0, "open should hand back a positive handle");

        let mut ctx = zero_ctx(5, handle_raw as u64, 0, 0, 0);
        assert_eq!(dispatch(&kernel, pid, &mut ctx), DispatchOutcome::Continue);
        assert_eq!(ctx.rax, DescFlags::WRITABLE.bits());

        let mut ctx = zero_ctx(8, handle_raw as u64, 0, 0, 0);
        assert_eq!(dispatch(&kernel, pid, &mut ctx), DispatchOutcome::Continue);
        assert_eq!(ctx.rax as i64, 0);
        assert!(!kernel.console.is_owner(pid));

        unsafe { dealloc(ptr, layout) };
    }

    #[test]
    fn exit_wakes_a_reader_blocked_on_the_writers_pipe() {
        let (ptr, layout, pool) = seeded_pool(64);
        let kernel: Kernel<FakeMapper> = Kernel::new(&pool, DriverRegistry::empty());

        let writer_root = pool.alloc_pages(1).unwrap();
        let writer = kernel.sched.allocate(writer_root, VirtAddr::new(0), VirtAddr::new(0), VirtAddr::new(0), VirtAddr::new(0x1000)).unwrap();
        kernel.register_process(writer, fake_space(&pool)).unwrap();

        let reader_root = pool.alloc_pages(1).unwrap();
        let reader = kernel.sched.allocate(reader_root, VirtAddr::new(0), VirtAddr::new(0), VirtAddr::new(0), VirtAddr::new(0x1000)).unwrap();
        let mut reader_space = fake_space(&pool);
        let reader_buf = reader_space.allocate_user_region(&pool, 16).unwrap();
        kernel.register_process(reader, reader_space).unwrap();

        // Writer creates the pipe write-only, reader attaches read-only.
        let mut ctx = zero_ctx(4, type_id::PIPE as u64, DescFlags::WRITABLE.bits(), 0, 0);
        assert_eq!(dispatch(&kernel, writer, &mut ctx), DispatchOutcome::Continue);
        let write_handle = ctx.rax;

        let pipe_id = kernel
            .with_descriptors(writer, |table| match table.get(Handle::from_raw(write_handle)).unwrap().resource {
                Resource::Pipe { endpoint } => endpoint.pipe_id().0,
                _ => panic!("expected a pipe resource"),
            })
            .unwrap();

        let mut ctx = zero_ctx(4, type_id::PIPE as u64, DescFlags::READABLE.bits(), pipe_id as u64, 0);
        assert_eq!(dispatch(&kernel, reader, &mut ctx), DispatchOutcome::Continue);
        let read_handle = ctx.rax;

        // The ring is empty and the writer is still open: the reader blocks.
        let mut ctx = zero_ctx(6, read_handle, reader_buf.base.as_u64(), 4, 0);
        assert_eq!(dispatch(&kernel, reader, &mut ctx), DispatchOutcome::Unschedule);
        assert_eq!(kernel.sched.with_slot(reader, |s| s.state()).unwrap(), ProcState::Blocked);

        // The writer exits without ever writing a byte: its pipe endpoint
        // closes, the last writer goes away, and the blocked reader wakes
        // up to a `0`-byte EOF read (spec 4.5 "Close").
        let mut ctx = zero_ctx(2, 0, 0, 0, 0);
        assert_eq!(dispatch(&kernel, writer, &mut ctx), DispatchOutcome::Unschedule);

        assert_eq!(kernel.sched.with_slot(reader, |s| s.state()).unwrap(), ProcState::Ready);
        assert_eq!(kernel.sched.with_slot(reader, |s| s.context.rax).unwrap() as i64, 0);

        unsafe { dealloc(ptr, layout) };
    }

    #[test]
    fn kernel_owned_block_device_round_trips_through_read_and_write() {
        let (ptr, layout, pool) = seeded_pool(64);
        let disk = FakeDisk::new();
        let mut drivers = DriverRegistry::empty();
        drivers.block_devices[0] = Some(&disk as &dyn BlockDevice);
        let kernel: Kernel<FakeMapper> = Kernel::new(&pool, drivers);

        let handle = kernel.open_kernel(type_id::BLOCK_DEVICE, DescFlags::READABLE | DescFlags::WRITABLE, b"disk0", Resource::BlockDevice { index: 0 }).unwrap();

        let data = [9u8; 512];
        assert_eq!(write_kernel(&kernel, handle, 512, &data).unwrap(), 512);
        let mut out = [0u8; 512];
        assert_eq!(read_kernel(&kernel, handle, 512, &mut out).unwrap(), 512);
        assert_eq!(out, data);

        kernel.close_kernel(handle).unwrap();
        assert_eq!(read_kernel(&kernel, handle, 0, &mut out).unwrap_err(), DescError::BadHandle);

        unsafe { dealloc(ptr, layout) };
    }
}

fn write_user<M: PageMapper<Size4KiB> + PageTranslator>(kernel: &Kernel<M>, pid: Pid, dest: VirtAddr, dest_len: usize, payload: &[u8]) -> i64 {
    let n = payload.len().min(dest_len);
    if kernel.copy_to_user(pid, dest, &payload[..n]).is_err() {
        FAIL
    } else {
        n as i64
    }
}

/// `DescriptorSetProperty`: the only writable property today is
/// `VtyInjectInput` (spec 4.4 "Properties", spec 9's resolved VTY input
/// filter note) — everything else is read-only.
fn descriptor_set_property<M: PageMapper<Size4KiB> + PageTranslator>(
    kernel: &Kernel<M>,
    pid: Pid,
    a0: u64,
    a1: u64,
    a2: u64,
    a3: u64,
) -> i64 {
    let handle = Handle::from_raw(a0);
    let Some(property) = Property::from_raw(a1) else { return FAIL };
    let src = VirtAddr::new(a2);
    let len = (a3 as usize).min(MAX_IO_CHUNK);

    let (_, _, resource) = match copy_entry(kernel, pid, handle) {
        Ok(v) => v,
        Err(_) => return FAIL,
    };

    match (property, resource) {
        (Property::VtyInjectInput, Resource::Vty { index }) => match kernel.vtys.get(index) {
            Some(vty) => {
                let mut buf = [0u8; MAX_IO_CHUNK];
                if kernel.copy_from_user(pid, src, &mut buf[..len]).is_err() {
                    FAIL
                } else {
                    vty.inject_input(&buf[..len]);
                    len as i64
                }
            }
            None => FAIL,
        },
        _ => FAIL,
    }
}
