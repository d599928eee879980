//! Raw console output sink (descriptor type id `Console = 0x001`).
//!
//! Mirrors `drivers/console/console.hpp`'s `Console::putc` — the one
//! operation the `Console` descriptor type forwards to once it has decided
//! a write is *not* going to a VTY instead. Console glyph rendering itself
//! stays out of scope (spec section 1); this only fixes the narrow
//! interface a driver implementation must expose.
pub trait ConsolePort {
    /// Writes one byte, interpreting any control characters the concrete
    /// renderer chooses to (`\n`, backspace, etc.) the way a terminal does.
    fn put_char(&self, byte: u8);
}
