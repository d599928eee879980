//! The `Pipe` descriptor type (spec 4.5).
//!
//! All of the interesting state — the ring, reader/writer counts, waiter
//! queues — lives in `nyx_ipc::pipe::PipeTable`, owned by
//! [`crate::process::Kernel`]. What belongs here is the thin translation
//! from `open(type=Pipe, a0=flags, a1=existing_id)` into a
//! [`nyx_ipc::pipe::PipeTable::create`]/`attach` call and a
//! [`super::Resource::Pipe`] entry, grounded in
//! `original_source/src/kernel/descriptor/pipe.cpp`'s `open_pipe`.

use nyx_ipc::pipe::{Endpoint, PipeError, PipeId, PipeTable};

use super::{DescError, DescFlags};

impl From<PipeError> for DescError {
    fn from(e: PipeError) -> Self {
        match e {
            PipeError::NotFound => DescError::NotFound,
            PipeError::BadArgument => DescError::BadArgument,
            PipeError::TooManyPipes | PipeError::TooManyWaiters => DescError::OutOfMemory,
        }
    }
}

/// `open(type=Pipe, a0=flags, a1=existing_id, a2=_)` (spec 4.5: "A pipe is
/// created by the first `open(type=Pipe, flags, existing_id=0)` call.
/// Subsequent `open` calls with the same `existing_id` attach").
pub fn open(table: &PipeTable, flags: u64, existing_id: u64) -> Result<(Endpoint, DescFlags), DescError> {
    let can_read = flags & DescFlags::READABLE.bits() != 0;
    let can_write = flags & DescFlags::WRITABLE.bits() != 0;

    let endpoint = if existing_id == 0 {
        table.create(can_read, can_write)?
    } else {
        table.attach(PipeId(existing_id as u32), can_read, can_write)?
    };

    let mut desc_flags = DescFlags::empty();
    if can_read {
        desc_flags |= DescFlags::READABLE;
    }
    if can_write {
        desc_flags |= DescFlags::WRITABLE;
    }
    Ok((endpoint, desc_flags))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_then_attaches() {
        let table = PipeTable::new();
        let (ep, flags) = open(&table, DescFlags::READABLE.bits(), 0).unwrap();
        assert!(flags.contains(DescFlags::READABLE));
        let (ep2, flags2) = open(&table, DescFlags::WRITABLE.bits(), ep.pipe_id().0 as u64).unwrap();
        assert!(flags2.contains(DescFlags::WRITABLE));
        assert_eq!(ep.pipe_id().0, ep2.pipe_id().0);
    }

    #[test]
    fn open_with_no_flags_fails() {
        let table = PipeTable::new();
        assert_eq!(open(&table, 0, 0).unwrap_err(), DescError::BadArgument);
    }
}
