//! The `Keyboard` descriptor type (spec 4.4), grounded in
//! `original_source/src/kernel/descriptor/keyboard.cpp`: read-only
//! (`keyboard_write` always fails), `keyboard_read` rejects any nonzero
//! offset, and an empty queue is simply zero bytes read rather than an
//! error.
//!
//! The original drains a raw scancode byte stream; this core's
//! [`nyx_driver_api::input::InputQueue`] instead produces structured
//! [`KeyEvent`]s, so `read` here pops one event per call and encodes it
//! as a fixed two-byte record (`[code, pressed]`) instead of copying raw
//! bytes.

use nyx_driver_api::input::{InputQueue, KeyCode, KeyEvent};

use super::DescError;

/// Size in bytes of one encoded key event.
pub const EVENT_SIZE: usize = 2;

fn encode_key_code(code: KeyCode) -> u8 {
    use KeyCode::*;
    match code {
        A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6, H => 7, I => 8,
        J => 9, K => 10, L => 11, M => 12, N => 13, O => 14, P => 15, Q => 16,
        R => 17, S => 18, T => 19, U => 20, V => 21, W => 22, X => 23, Y => 24, Z => 25,
        Num0 => 26, Num1 => 27, Num2 => 28, Num3 => 29, Num4 => 30,
        Num5 => 31, Num6 => 32, Num7 => 33, Num8 => 34, Num9 => 35,
        F1 => 36, F2 => 37, F3 => 38, F4 => 39, F5 => 40, F6 => 41,
        F7 => 42, F8 => 43, F9 => 44, F10 => 45, F11 => 46, F12 => 47,
        LeftShift => 48, RightShift => 49, LeftCtrl => 50, RightCtrl => 51,
        LeftAlt => 52, RightAlt => 53, CapsLock => 54,
        ArrowUp => 55, ArrowDown => 56, ArrowLeft => 57, ArrowRight => 58,
        Home => 59, End => 60, PageUp => 61, PageDown => 62, Insert => 63, Delete => 64,
        Escape => 65, Enter => 66, Tab => 67, Backspace => 68, Space => 69,
        Minus => 70, Equals => 71, LeftBracket => 72, RightBracket => 73, Backslash => 74,
        Semicolon => 75, Apostrophe => 76, Grave => 77, Comma => 78, Period => 79, Slash => 80,
        Unknown(raw) => raw,
    }
}

fn encode_event(event: KeyEvent) -> [u8; EVENT_SIZE] {
    [encode_key_code(event.key), event.pressed as u8]
}

/// `read(offset, buf)`: fails if `offset != 0`; otherwise pops at most one
/// event and writes its encoded form, returning the number of bytes
/// written (0 if the queue was empty or `buf` is too small to hold a
/// whole event).
pub fn read(queue: &dyn InputQueue<Event = KeyEvent>, offset: u64, buf: &mut [u8]) -> Result<usize, DescError> {
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

/// `write` always fails: the keyboard is not writable
/// (`keyboard.cpp::keyboard_write` unconditionally returns `-1`).
pub fn write(_offset: u64, _buf: &[u8]) -> Result<usize, DescError> {
    Err(DescError::BadCapability)
}
