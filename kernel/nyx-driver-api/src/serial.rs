//! Serial line interface trait (descriptor type id `Serial = 0x002`).
//!
//! Mirrors the COM1 UART driver this core's `Serial` descriptor type
//! wraps (`init`, `write`, `read`, `data_available` in the teacher
//! lineage's `drivers/serial/serial.hpp`).

/// Interface trait for a byte-oriented serial line.
///
/// Methods take `&self`: the UART registers are shared hardware state,
/// and a concrete driver is expected to hold whatever lock its own I/O
/// port access needs.
pub trait SerialPort {
    /// Initializes the UART (baud rate, line control, FIFO). Idempotent.
    fn init(&self);

    /// Writes `data`, blocking until the transmit holding register has
    /// room for each byte.
    fn write(&self, data: &[u8]);

    /// Reads up to `buf.len()` bytes without blocking, stopping at the
    /// first point no more data is available. Returns the number of
    /// bytes actually read.
    fn read(&self, buf: &mut [u8]) -> usize;

    /// `true` if at least one byte is available to read without blocking.
    fn data_available(&self) -> bool;
}
