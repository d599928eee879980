//! Keyboard/mouse event source traits (descriptor type ids
//! `Keyboard = 0x003`, `Mouse = 0x004`).

/// Key codes for common keyboard keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    A, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,
    Num0, Num1, Num2, Num3, Num4, Num5, Num6, Num7, Num8, Num9,
    F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11, F12,
    LeftShift, RightShift, LeftCtrl, RightCtrl, LeftAlt, RightAlt, CapsLock,
    ArrowUp, ArrowDown, ArrowLeft, ArrowRight,
    Home, End, PageUp, PageDown, Insert, Delete,
    Escape, Enter, Tab, Backspace, Space,
    Minus, Equals, LeftBracket, RightBracket, Backslash,
    Semicolon, Apostrophe, Grave, Comma, Period, Slash,
    /// Unknown or unmapped scancode, carrying the raw byte.
    Unknown(u8),
}

/// A keyboard event (press or release).
#[derive(Debug, Clone, Copy)]
pub struct KeyEvent {
    pub key: KeyCode,
    pub pressed: bool,
}

/// A mouse event with relative movement and button state.
#[derive(Debug, Clone, Copy)]
pub struct MouseEvent {
    pub dx: i16,
    pub dy: i16,
    pub left: bool,
    pub right: bool,
    pub middle: bool,
}

/// A non-blocking event source, consumed by the `Keyboard`/`Mouse`
/// descriptor types. `poll` never suspends the caller — this core's
/// scheduler has no executor to register a waker with, so a descriptor
/// backed by an `InputQueue` that finds nothing available simply returns
/// the same "no data yet" result the VTY's input ring does (spec 4.4
/// "Read / write": dispatch to the ops function, which decides on its own
/// terms what "no data" means for its type).
pub trait InputQueue {
    /// The event type this queue produces (`KeyEvent` or `MouseEvent`).
    type Event;

    /// Returns the next queued event, if any, without blocking.
    fn poll(&self) -> Option<Self::Event>;
}
