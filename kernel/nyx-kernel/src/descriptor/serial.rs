//! The `Serial` descriptor type (spec 4.4), grounded in
//! `original_source/src/kernel/descriptor/serial.cpp`: both `read` and
//! `write` reject a nonzero offset (the line has no addressable
//! position), and `open` initializes the UART and marks the descriptor
//! readable and writable.

use nyx_driver_api::serial::SerialPort;

use super::DescError;

/// `open(type=Serial, ...)`: initializes the UART
/// (`serial.cpp::open_serial` calling `serial::init()`).
pub fn open(port: &dyn SerialPort) {
    port.init();
}

/// `read(offset, buf)`: fails if `offset != 0`
/// (`serial.cpp::serial_read`).
pub fn read(port: &dyn SerialPort, offset: u64, buf: &mut [u8]) -> Result<usize, DescError> {
    if offset != 0 {
        return Err(DescError::BadArgument);
    }
    Ok(port.read(buf))
}

/// `write(offset, buf)`: fails if `offset != 0`
/// (`serial.cpp::serial_write`).
pub fn write(port: &dyn SerialPort, offset: u64, buf: &[u8]) -> Result<usize, DescError> {
    if offset != 0 {
        return Err(DescError::BadArgument);
    }
    port.write(buf);
    Ok(buf.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    struct FakePort {
        initialized: RefCell<bool>,
        written: RefCell<([u8; 64], usize)>,
        to_read: RefCell<&'static [u8]>,
    }

    impl Default for FakePort {
        fn default() -> Self {
            Self { initialized: RefCell::new(false), written: RefCell::new(([0; 64], 0)), to_read: RefCell::new(&[]) }
        }
    }

    impl SerialPort for FakePort {
        fn init(&self) {
            *self.initialized.borrow_mut() = true;
        }
        fn write(&self, data: &[u8]) {
            let mut written = self.written.borrow_mut();
            let (buf, len) = &mut *written;
            buf[*len..*len + data.len()].copy_from_slice(data);
            *len += data.len();
        }
        fn read(&self, buf: &mut [u8]) -> usize {
            let src = *self.to_read.borrow();
            let n = src.len().min(buf.len());
            buf[..n].copy_from_slice(&src[..n]);
            n
        }
        fn data_available(&self) -> bool {
            !self.to_read.borrow().is_empty()
        }
    }

    #[test]
    fn open_initializes_the_port() {
        let port = FakePort::default();
        open(&port);
        assert!(*port.initialized.borrow());
    }

    #[test]
    fn read_with_nonzero_offset_fails() {
        let port = FakePort::default();
        let mut buf = [0u8; 4];
        assert_eq!(read(&port, 1, &mut buf).unwrap_err(), DescError::BadArgument);
    }

    #[test]
    fn write_with_nonzero_offset_fails() {
        let port = FakePort::default();
        assert_eq!(write(&port, 1, b"x").unwrap_err(), DescError::BadArgument);
    }

    #[test]
    fn write_at_offset_zero_forwards_to_the_port() {
        let port = FakePort::default();
        assert_eq!(write(&port, 0, b"hi").unwrap(), 2);
        let (buf, len) = *port.written.borrow();
        assert_eq!(&buf[..len], b"hi");
    }
}
