//! The `Console` descriptor type and its ownership-transfer supplement
//! (SPEC_FULL.md "Supplemented features: Console ownership transfer"),
//! grounded in `original_source/src/kernel/descriptor/console.cpp`.
//!
//! The console is writable but not readable (console input goes through
//! the keyboard/VTY input path, not a console read). Ownership is
//! exclusive: at most one process may hold an open console descriptor
//! without a VTY attached at a time, *unless* the opener already has a
//! VTY attached, in which case its console writes are routed to that VTY
//! instead of competing for raw console ownership — `console.cpp`'s
//! `console_write` takes the same fork ("if `proc.vty_id != 0`, write to
//! the VTY; otherwise write to the raw console object").

use nyx_core::id::Pid;
use nyx_core::sync::SpinLock;
use nyx_driver_api::ConsolePort;

use super::DescError;

/// `read`: the console has no readable data of its own (`console.cpp::
/// console_read` always returns `-1`; input comes through the keyboard/VTY
/// path instead).
pub fn read(_offset: u64, _buf: &mut [u8]) -> Result<usize, DescError> {
    Err(DescError::BadCapability)
}

/// `write(offset, buf)` to the *raw* console object (`console.cpp::
/// console_write`'s fallback path once the VTY fork has already been
/// decided by the caller — see the module doc comment). Fails on a
/// nonzero offset; otherwise writes every byte and reports the count.
pub fn write(port: &dyn ConsolePort, offset: u64, buf: &[u8]) -> Result<usize, DescError> {
    if offset != 0 {
        return Err(DescError::BadArgument);
    }
    for &byte in buf {
        port.put_char(byte);
    }
    Ok(buf.len())
}

struct Inner {
    owner: Option<Pid>,
    refcount: u32,
}

/// Tracks which process, if any, exclusively owns the raw console (no VTY
/// attached). Owned by [`crate::process::Kernel`].
pub struct ConsoleOwner {
    inner: SpinLock<Inner>,
}

impl ConsoleOwner {
    pub const fn new() -> Self {
        Self { inner: SpinLock::new(Inner { owner: None, refcount: 0 }) }
    }

    /// `open(type=Console, ...)` (spec 4.4 "Open" dispatched to the
    /// console type's `open_fn`). Fails only when the console is already
    /// owned by a *different* process and the caller has no VTY attached
    /// (`console.cpp::open_console`).
    pub fn open(&self, pid: Pid, has_vty: bool) -> Result<(), DescError> {
        let mut inner = self.inner.lock();
        match inner.owner {
            Some(owner) if owner != pid && !has_vty => Err(DescError::BadCapability),
            Some(_) => {
                inner.refcount += 1;
                Ok(())
            }
            None => {
                inner.owner = Some(pid);
                inner.refcount = 1;
                Ok(())
            }
        }
    }

    /// `close` callback for a console descriptor: decrements the
    /// refcount, clearing ownership at zero.
    pub fn close(&self, pid: Pid) {
        let mut inner = self.inner.lock();
        if inner.owner == Some(pid) {
            inner.refcount = inner.refcount.saturating_sub(1);
            if inner.refcount == 0 {
                inner.owner = None;
            }
        }
    }

    /// `true` if `pid` currently owns the console.
    pub fn is_owner(&self, pid: Pid) -> bool {
        self.inner.lock().owner == Some(pid)
    }

    /// Hands console ownership to `new_owner` unconditionally, regardless
    /// of the current owner (supplemented feature: lets a foreground
    /// shell or window manager reassign the console to a child it spawns).
    pub fn transfer_owner(&self, new_owner: Pid) {
        let mut inner = self.inner.lock();
        inner.owner = Some(new_owner);
        inner.refcount = 1;
    }

    /// Restores `previous_owner` as the console's owner (supplemented
    /// feature: the counterpart to [`Self::transfer_owner`], used when a
    /// process that transferred ownership away wants it back, e.g. after
    /// a spawned child exits).
    pub fn restore_owner(&self, previous_owner: Pid) {
        let mut inner = self.inner.lock();
        inner.owner = Some(previous_owner);
        inner.refcount = 1;
    }
}

impl Default for ConsoleOwner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    struct FakeConsole {
        written: RefCell<([u8; 64], usize)>,
    }

    impl FakeConsole {
        fn new() -> Self {
            Self { written: RefCell::new(([0; 64], 0)) }
        }
    }

    impl ConsolePort for FakeConsole {
        fn put_char(&self, byte: u8) {
            let mut written = self.written.borrow_mut();
            let (buf, len) = &mut *written;
            buf[*len] = byte;
            *len += 1;
        }
    }

    #[test]
    fn read_is_unsupported() {
        let mut buf = [0u8; 4];
        assert_eq!(read(0, &mut buf).unwrap_err(), DescError::BadCapability);
    }

    #[test]
    fn write_with_nonzero_offset_fails() {
        let console = FakeConsole::new();
        assert_eq!(write(&console, 1, b"x").unwrap_err(), DescError::BadArgument);
    }

    #[test]
    fn write_forwards_every_byte() {
        let console = FakeConsole::new();
        assert_eq!(write(&console, 0, b"hi").unwrap(), 2);
        let (buf, len) = *console.written.borrow();
        assert_eq!(&buf[..len], b"hi");
    }

    #[test]
    fn first_open_claims_ownership() {
        let owner = ConsoleOwner::new();
        owner.open(Pid::new(1), false).unwrap();
        assert!(owner.is_owner(Pid::new(1)));
    }

    #[test]
    fn second_process_without_vty_is_rejected() {
        let owner = ConsoleOwner::new();
        owner.open(Pid::new(1), false).unwrap();
        assert_eq!(owner.open(Pid::new(2), false).unwrap_err(), DescError::BadCapability);
    }

    #[test]
    fn second_process_with_vty_bypasses_ownership_check() {
        let owner = ConsoleOwner::new();
        owner.open(Pid::new(1), false).unwrap();
        owner.open(Pid::new(2), true).unwrap();
        assert!(owner.is_owner(Pid::new(1)));
    }

    #[test]
    fn close_releases_ownership_at_zero_refcount() {
        let owner = ConsoleOwner::new();
        owner.open(Pid::new(1), false).unwrap();
        owner.close(Pid::new(1));
        assert!(!owner.is_owner(Pid::new(1)));
        owner.open(Pid::new(2), false).unwrap();
        assert!(owner.is_owner(Pid::new(2)));
    }

    #[test]
    fn transfer_and_restore_reassign_ownership() {
        let owner = ConsoleOwner::new();
        owner.open(Pid::new(1), false).unwrap();
        owner.transfer_owner(Pid::new(2));
        assert!(owner.is_owner(Pid::new(2)));
        owner.restore_owner(Pid::new(1));
        assert!(owner.is_owner(Pid::new(1)));
    }
}
