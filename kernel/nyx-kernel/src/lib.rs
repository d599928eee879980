//! L3/L4/L5: the descriptor subsystem, the concrete descriptor types, and
//! the system-call dispatcher that is the kernel's sole entry point from
//! user mode (spec 4.4-4.7).
//!
//! This crate is where every lower layer gets tied together:
//! [`process::Kernel`] owns the process table ([`nyx_sched`]), the pipe and
//! shared-memory tables ([`nyx_ipc`]), the VTY table ([`nyx_tty`]), the
//! per-process address spaces and descriptor tables, and the external
//! driver collaborators ([`nyx_driver_api`]) the concrete descriptor types
//! in [`descriptor`] wrap. [`syscall::dispatch`] is the only function an
//! architecture-specific syscall-entry stub needs to call.

#![cfg_attr(not(test), no_std)]

pub mod descriptor;
pub mod handle;
pub mod process;
pub mod syscall;

pub use descriptor::{DescError, DescFlags, DescriptorTable, Property, Resource, TypeRegistry};
pub use handle::Handle;
pub use process::{DriverRegistry, Kernel, KERNEL_PID, MAX_BLOCK_DEVICES};
pub use syscall::{dispatch, get_property_kernel, read_kernel, write_kernel, DispatchOutcome};
