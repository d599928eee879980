//! The `Mouse` descriptor type (spec 4.4), grounded in
//! `original_source/src/kernel/descriptor/mouse.cpp`.
//!
//! The original routes mouse events through whichever virtual
//! framebuffer "slot" currently owns the pointer, since that codebase
//! supports several simultaneous virtual framebuffers. This core's
//! [`nyx_driver_api::framebuffer::Framebuffer`] models exactly one
//! framebuffer (see `nyx-driver-api`'s design), so there is only ever one
//! place a mouse event can go — the per-slot routing collapses to a
//! single global [`nyx_driver_api::input::InputQueue`], read-only and
//! not writable, same as [`super::keyboard`].

use nyx_driver_api::input::{InputQueue, MouseEvent};

use super::DescError;

/// Size in bytes of one encoded mouse event: `dx: i16`, `dy: i16`, button
/// bitmask (`left=1, right=2, middle=4`).
pub const EVENT_SIZE: usize = 5;

fn encode_event(event: MouseEvent) -> [u8; EVENT_SIZE] {
    let mut buttons = 0u8;
    if event.left {
        buttons |= 1 << 0;
    }
    if event.right {
        buttons |= 1 << 1;
    }
    if event.middle {
        buttons |= 1 << 2;
    }
    let dx = event.dx.to_le_bytes();
    let dy = event.dy.to_le_bytes();
    [dx[0], dx[1], dy[0], dy[1], buttons]
}

/// `read(offset, buf)`: fails if `offset != 0`; otherwise pops at most one
/// event and writes its encoded form, returning the number of bytes
/// written (0 if the queue was empty or `buf` is too small).
pub fn read(queue: &dyn InputQueue<Event = MouseEvent>, offset: u64, buf: &mut [u8]) -> Result<usize, DescError> {
    if offset != 0 {
        return Err(DescError::BadArgument);
    }
    if buf.len() < EVENT_SIZE {
        return Ok(0);
    }
    match queue.poll() {
        Some(event) => {
            buf[..EVENT_SIZE].copy_from_slice(&encode_event(event));
            Ok(EVENT_SIZE)
        }
        None => Ok(0),
    }
}

/// `write` always fails: the mouse is not writable.
pub fn write(_offset: u64, _buf: &[u8]) -> Result<usize, DescError> {
    Err(DescError::BadCapability)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    struct FakeQueue(RefCell<Option<MouseEvent>>);

    impl InputQueue for FakeQueue {
        type Event = MouseEvent;
        fn poll(&self) -> Option<MouseEvent> {
            self.0.borrow_mut().take()
        }
    }

    #[test]
    fn read_with_nonzero_offset_fails() {
        let queue = FakeQueue(RefCell::new(None));
        let mut buf = [0u8; EVENT_SIZE];
        assert_eq!(read(&queue, 1, &mut buf).unwrap_err(), DescError::BadArgument);
    }

    #[test]
    fn read_pops_and_encodes_one_event() {
        let queue = FakeQueue(RefCell::new(Some(MouseEvent { dx: -3, dy: 7, left: true, right: false, middle: false })));
        let mut buf = [0u8; EVENT_SIZE];
        assert_eq!(read(&queue, 0, &mut buf).unwrap(), EVENT_SIZE);
        assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), -3);
        assert_eq!(i16::from_le_bytes([buf[2], buf[3]]), 7);
        assert_eq!(buf[4], 1);
    }

    #[test]
    fn write_always_fails() {
        assert_eq!(write(0, b"x").unwrap_err(), DescError::BadCapability);
    }
}
