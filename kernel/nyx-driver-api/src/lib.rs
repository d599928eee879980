//! External driver-collaborator traits this core consumes.
//!
//! No driver *implementations* live here — block storage, framebuffer
//! rendering, keyboard/mouse scancode decoding are all out of scope for
//! the core itself (spec section 1). This crate only fixes the narrow
//! interface a `nyx-kernel` descriptor type needs to wrap one of those
//! external collaborators, the same layering role
//! `hadron-driver-api`/`hadron-kernel::driver_api` play for the teacher's
//! own device-registry subsystem.

#![cfg_attr(not(test), no_std)]

pub mod block;
pub mod console;
pub mod error;
pub mod framebuffer;
pub mod input;
pub mod serial;

pub use block::{BlockDevice, IoError};
pub use console::ConsolePort;
pub use error::DriverError;
pub use framebuffer::{Framebuffer, FramebufferInfo, PixelFormat};
pub use input::{InputQueue, KeyCode, KeyEvent, MouseEvent};
pub use serial::SerialPort;
