//! Pipes with blocking readers/writers (spec 4.5).
//!
//! A pipe is a fixed-capacity byte ring shared by any number of reader and
//! writer endpoints. The pipe table itself is the only thing that ever
//! touches ring bytes or waiter lists; a descriptor's `subsystem_data` only
//! ever holds an [`Endpoint`] — a thin `(pipe index, pipe generation, can
//! read, can write)` record (spec 3: "a descriptor's `subsystem_data` points
//! to the endpoint, not the pipe").
//!
//! Reads and writes may need to address a process other than the one
//! currently running: a write that wakes a blocked reader must copy bytes
//! into *that reader's* user buffer, not the writer's. [`UserCopy`] is the
//! seam `nyx-kernel` implements against its own per-process address-space
//! table so this crate never has to know what an address space is.

use nyx_core::addr::VirtAddr;
use nyx_core::id::Pid;
use nyx_core::sync::SpinLock;
use nyx_sched::{Outcome, Table as ProcTable};

use crate::{MAX_PIPES, MAX_PIPE_WAITERS, PIPE_RING_CAPACITY};

/// Bytes copied per chunk while moving data across the user boundary with
/// the pipe lock held (spec 5: "the data is staged through a small
/// on-stack buffer").
const STAGE_SIZE: usize = 256;

/// Lets pipe operations address an arbitrary process's user memory, not
/// just the currently running one (spec 4.5's waiter-completion path).
pub trait UserCopy {
    /// Copies `src` into `pid`'s address space at `dest`. Fails only if the
    /// range is out of bounds or unmapped; never partially commits.
    fn copy_to_user(&self, pid: Pid, dest: VirtAddr, src: &[u8]) -> Result<(), ()>;
    /// Copies `dest.len()` bytes from `pid`'s address space at `src`.
    fn copy_from_user(&self, pid: Pid, src: VirtAddr, dest: &mut [u8]) -> Result<(), ()>;
}

/// Errors from pipe table operations (not from read/write themselves, which
/// resolve their pipe through an already-live [`Endpoint`] and cannot fail
/// this way).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeError {
    /// `existing_id` named no live pipe.
    NotFound,
    /// Neither `can_read` nor `can_write` was requested.
    BadArgument,
    /// Every pipe-table slot is occupied.
    TooManyPipes,
    /// The waiter pool is exhausted.
    TooManyWaiters,
}

/// The stable id a pipe is known by across `open(existing_id)` calls (spec
/// 3: "stable 32-bit id allocated on creation"). Exposed via
/// `Property::PipeInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeId(pub u32);

/// A per-open record sitting between a descriptor entry and the shared pipe
/// (spec 3, GLOSSARY "Endpoint"). Never cloned implicitly — an endpoint is
/// consumed exactly once by [`PipeTable::close`].
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    index: usize,
    generation: u16,
    pub can_read: bool,
    pub can_write: bool,
}

impl Endpoint {
    /// The stable id of the pipe this endpoint refers to.
    pub fn pipe_id(&self) -> PipeId {
        PipeId(self.index as u32)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WaitKind {
    Read,
    Write,
}

struct Waiter {
    pid: Pid,
    buf: VirtAddr,
    len: usize,
    kind: WaitKind,
    next: Option<usize>,
}

/// One queue of waiter-pool indices, FIFO (spec 4.5: "wake blocked
/// writers/readers in FIFO order").
#[derive(Default, Clone, Copy)]
struct WaitQueueList {
    head: Option<usize>,
    tail: Option<usize>,
}

struct Pipe {
    generation: u16,
    ring: [u8; PIPE_RING_CAPACITY],
    read_pos: usize,
    len: usize,
    reader_count: u32,
    writer_count: u32,
    refcount: u32,
    readers: WaitQueueList,
    writers: WaitQueueList,
}

impl Pipe {
    fn write_pos(&self) -> usize {
        (self.read_pos + self.len) % PIPE_RING_CAPACITY
    }

    fn free_space(&self) -> usize {
        PIPE_RING_CAPACITY - self.len
    }
}

struct Inner {
    pipes: [Option<Pipe>; MAX_PIPES],
    /// Survives across a slot being freed and reused, so a stale
    /// `(index, generation)` held by a dangling waiter or endpoint is always
    /// detectably stale (design note, spec section 9: "Cyclic resource
    /// graphs").
    generations: [u16; MAX_PIPES],
    waiters: [Option<Waiter>; MAX_PIPE_WAITERS],
}

impl Inner {
    fn alloc_waiter(&mut self, w: Waiter) -> Result<usize, PipeError> {
        let slot = self
            .waiters
            .iter()
            .position(|w| w.is_none())
            .ok_or(PipeError::TooManyWaiters)?;
        self.waiters[slot] = Some(w);
        Ok(slot)
    }

    fn push_waiter(&mut self, queue_pick: impl Fn(&mut Pipe) -> &mut WaitQueueList, pipe_index: usize, idx: usize) {
        let pipe = self.pipes[pipe_index].as_mut().expect("pipe live while queueing waiter");
        let q = queue_pick(pipe);
        match q.tail {
            Some(tail) => {
                self.waiters[tail].as_mut().unwrap().next = Some(idx);
            }
            None => q.head = Some(idx),
        }
        q.tail = Some(idx);
    }

    fn pop_waiter(&mut self, queue_pick: impl Fn(&mut Pipe) -> &mut WaitQueueList, pipe_index: usize) -> Option<usize> {
        let pipe = self.pipes[pipe_index].as_mut().expect("pipe live while popping waiter");
        let q = queue_pick(pipe);
        let head = q.head?;
        q.head = self.waiters[head].as_ref().unwrap().next;
        if q.head.is_none() {
            q.tail = None;
        }
        Some(head)
    }

    /// Removes every waiter owned by `pid` from both of `pipe_index`'s
    /// queues, without completing them (spec 9 open question: close must
    /// drop the closer's own waiters before any external wake).
    fn remove_waiters_owned_by(&mut self, pipe_index: usize, pid: Pid) {
        for pick in [
            (|p: &mut Pipe| &mut p.readers) as fn(&mut Pipe) -> &mut WaitQueueList,
            (|p: &mut Pipe| &mut p.writers) as fn(&mut Pipe) -> &mut WaitQueueList,
        ] {
            let mut kept: Option<usize> = None;
            let mut kept_tail: Option<usize> = None;
            let mut cur = {
                let pipe = self.pipes[pipe_index].as_mut().unwrap();
                let q = pick(pipe);
                let head = q.head;
                q.head = None;
                q.tail = None;
                head
            };
            while let Some(idx) = cur {
                let next = self.waiters[idx].as_ref().unwrap().next;
                if self.waiters[idx].as_ref().unwrap().pid == pid {
                    self.waiters[idx] = None;
                } else {
                    self.waiters[idx].as_mut().unwrap().next = None;
                    match kept_tail {
                        Some(tail) => self.waiters[tail].as_mut().unwrap().next = Some(idx),
                        None => kept = Some(idx),
                    }
                    kept_tail = Some(idx);
                }
                cur = next;
            }
            let pipe = self.pipes[pipe_index].as_mut().unwrap();
            let q = pick(pipe);
            q.head = kept;
            q.tail = kept_tail;
        }
    }
}

/// Stages up to [`STAGE_SIZE`] bytes at a time out of the ring into `dest`
/// in `pid`'s address space, wrapping at the ring boundary.
fn ring_to_user(pipe: &mut Pipe, copier: &dyn UserCopy, pid: Pid, mut dest: VirtAddr, max: usize) -> Result<usize, ()> {
    let n = max.min(pipe.len);
    let mut remaining = n;
    let mut stage = [0u8; STAGE_SIZE];
    while remaining > 0 {
        let chunk = remaining.min(STAGE_SIZE);
        for (i, b) in stage.iter_mut().take(chunk).enumerate() {
            *b = pipe.ring[(pipe.read_pos + i) % PIPE_RING_CAPACITY];
        }
        copier.copy_to_user(pid, dest, &stage[..chunk])?;
        pipe.read_pos = (pipe.read_pos + chunk) % PIPE_RING_CAPACITY;
        pipe.len -= chunk;
        dest = VirtAddr::new_truncate(dest.as_u64() + chunk as u64);
        remaining -= chunk;
    }
    Ok(n)
}

/// Stages up to [`STAGE_SIZE`] bytes at a time from `src` in `pid`'s address
/// space into the ring, wrapping at the ring boundary.
fn user_to_ring(pipe: &mut Pipe, copier: &dyn UserCopy, pid: Pid, mut src: VirtAddr, max: usize) -> Result<usize, ()> {
    let n = max.min(pipe.free_space());
    let mut remaining = n;
    let mut stage = [0u8; STAGE_SIZE];
    while remaining > 0 {
        let chunk = remaining.min(STAGE_SIZE);
        copier.copy_from_user(pid, src, &mut stage[..chunk])?;
        let write_pos = pipe.write_pos();
        for (i, b) in stage.iter().take(chunk).enumerate() {
            pipe.ring[(write_pos + i) % PIPE_RING_CAPACITY] = *b;
        }
        pipe.len += chunk;
        src = VirtAddr::new_truncate(src.as_u64() + chunk as u64);
        remaining -= chunk;
    }
    Ok(n)
}

/// The pipe table: every live pipe plus the static waiter pool, behind one
/// lock (spec 4.5: "Within the pipe lock all byte movements and waiter
/// state transitions are strictly serialized").
pub struct PipeTable {
    inner: SpinLock<Inner>,
}

impl PipeTable {
    /// Creates an empty pipe table.
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(Inner {
                pipes: [const { None }; MAX_PIPES],
                generations: [0; MAX_PIPES],
                waiters: [const { None }; MAX_PIPE_WAITERS],
            }),
        }
    }

    /// Creates a new pipe and returns the first endpoint onto it (spec 4.5:
    /// "A pipe is created by the first `open(type=Pipe, flags,
    /// existing_id=0)` call").
    pub fn create(&self, can_read: bool, can_write: bool) -> Result<Endpoint, PipeError> {
        if !can_read && !can_write {
            return Err(PipeError::BadArgument);
        }
        let mut inner = self.inner.lock();
        let index = inner.pipes.iter().position(|p| p.is_none()).ok_or(PipeError::TooManyPipes)?;
        let gen = bump_generation(&mut inner.generations[index]);
        inner.pipes[index] = Some(Pipe {
            generation: gen,
            ring: [0; PIPE_RING_CAPACITY],
            read_pos: 0,
            len: 0,
            reader_count: can_read as u32,
            writer_count: can_write as u32,
            refcount: 1,
            readers: WaitQueueList::default(),
            writers: WaitQueueList::default(),
        });
        Ok(Endpoint { index, generation: gen, can_read, can_write })
    }

    /// Attaches a new endpoint to an already-live pipe (spec 4.5:
    /// "Subsequent `open` calls with the same `existing_id` attach").
    pub fn attach(&self, id: PipeId, can_read: bool, can_write: bool) -> Result<Endpoint, PipeError> {
        if !can_read && !can_write {
            return Err(PipeError::BadArgument);
        }
        let index = id.0 as usize;
        let mut inner = self.inner.lock();
        let pipe = inner.pipes.get_mut(index).and_then(|p| p.as_mut()).ok_or(PipeError::NotFound)?;
        pipe.reader_count += can_read as u32;
        pipe.writer_count += can_write as u32;
        pipe.refcount += 1;
        let generation = pipe.generation;
        Ok(Endpoint { index, generation, can_read, can_write })
    }

    /// Reads up to `len` bytes into `user_addr` in `reader_pid`'s address
    /// space (spec 4.5 "Read"). Never touches user memory unless at least
    /// one byte is available or a definitive EOF/async-empty answer is
    /// being returned.
    #[allow(clippy::too_many_arguments)]
    pub fn read(
        &self,
        sched: &ProcTable,
        copier: &dyn UserCopy,
        endpoint: &Endpoint,
        reader_pid: Pid,
        user_addr: VirtAddr,
        len: usize,
        is_async: bool,
    ) -> Outcome<i64> {
        let mut inner = self.inner.lock();
        let pipe = inner.pipes[endpoint.index].as_mut().expect("endpoint keeps its pipe alive");

        if pipe.len > 0 {
            let n = match ring_to_user(pipe, copier, reader_pid, user_addr, len) {
                Ok(n) => n,
                Err(()) => return Outcome::Returned(-1),
            };
            wake_writers(&mut inner, sched, copier, endpoint.index);
            return Outcome::Returned(n as i64);
        }

        if is_async {
            return Outcome::Returned(0);
        }
        if pipe.writer_count == 0 {
            return Outcome::Returned(0);
        }

        let waiter = Waiter { pid: reader_pid, buf: user_addr, len, kind: WaitKind::Read, next: None };
        let idx = match inner.alloc_waiter(waiter) {
            Ok(idx) => idx,
            Err(_) => return Outcome::Returned(-1),
        };
        inner.push_waiter(|p| &mut p.readers, endpoint.index, idx);
        drop(inner);
        let _ = sched.block(reader_pid, pipe_waiting_token(endpoint.index));
        Outcome::Suspended
    }

    /// Writes up to `len` bytes from `user_addr` in `writer_pid`'s address
    /// space (spec 4.5 "Write").
    #[allow(clippy::too_many_arguments)]
    pub fn write(
        &self,
        sched: &ProcTable,
        copier: &dyn UserCopy,
        endpoint: &Endpoint,
        writer_pid: Pid,
        user_addr: VirtAddr,
        len: usize,
        is_async: bool,
    ) -> Outcome<i64> {
        let mut inner = self.inner.lock();
        let pipe = inner.pipes[endpoint.index].as_mut().expect("endpoint keeps its pipe alive");

        if pipe.reader_count == 0 {
            return Outcome::Returned(-1);
        }

        if pipe.free_space() > 0 {
            let n = match user_to_ring(pipe, copier, writer_pid, user_addr, len) {
                Ok(n) => n,
                Err(()) => return Outcome::Returned(-1),
            };
            wake_readers(&mut inner, sched, copier, endpoint.index);
            return Outcome::Returned(n as i64);
        }

        if is_async {
            return Outcome::Returned(0);
        }

        let waiter = Waiter { pid: writer_pid, buf: user_addr, len, kind: WaitKind::Write, next: None };
        let idx = match inner.alloc_waiter(waiter) {
            Ok(idx) => idx,
            Err(_) => return Outcome::Returned(-1),
        };
        inner.push_waiter(|p| &mut p.writers, endpoint.index, idx);
        drop(inner);
        let _ = sched.block(writer_pid, pipe_waiting_token(endpoint.index));
        Outcome::Suspended
    }

    /// Closes `endpoint` (spec 4.5 "Close"). Always removes the closer's
    /// own still-pending waiters before completing anyone else's (spec
    /// section 9's resolved open question on close/wake ordering).
    pub fn close(&self, sched: &ProcTable, copier: &dyn UserCopy, endpoint: Endpoint, closer_pid: Pid) {
        let mut inner = self.inner.lock();
        let index = endpoint.index;
        if inner.pipes[index].as_ref().map(|p| p.generation) != Some(endpoint.generation) {
            return;
        }

        inner.remove_waiters_owned_by(index, closer_pid);

        {
            let pipe = inner.pipes[index].as_mut().unwrap();
            if endpoint.can_read {
                pipe.reader_count -= 1;
            }
            if endpoint.can_write {
                pipe.writer_count -= 1;
            }
            pipe.refcount -= 1;
        }

        let (writer_count, reader_count) = {
            let pipe = inner.pipes[index].as_ref().unwrap();
            (pipe.writer_count, pipe.reader_count)
        };
        if writer_count == 0 {
            drain_with_result(&mut inner, sched, index, WaitKind::Read, 0);
        }
        if reader_count == 0 {
            drain_with_result(&mut inner, sched, index, WaitKind::Write, -1);
        }

        let refcount = inner.pipes[index].as_ref().unwrap().refcount;
        if refcount == 0 {
            inner.pipes[index] = None;
        }
        let _ = copier;
    }
}

impl Default for PipeTable {
    fn default() -> Self {
        Self::new()
    }
}

fn bump_generation(slot: &mut u16) -> u16 {
    let next = slot.wrapping_add(1);
    *slot = if next == 0 { 1 } else { next };
    *slot
}

/// The `waiting_on` token stored in a blocked process's slot while it waits
/// on a pipe (spec 3: "pointer-valued waiting on object", realised here as
/// an opaque index since this crate has no pointers to give out).
fn pipe_waiting_token(pipe_index: usize) -> usize {
    pipe_index
}

/// Wakes blocked writers in FIFO order, each copying into the ring as far
/// as capacity permits (spec 4.5 "Read": "wake blocked writers... each one
/// copying into the ring as far as capacity permits").
fn wake_writers(inner: &mut Inner, sched: &ProcTable, copier: &dyn UserCopy, pipe_index: usize) {
    while inner.pipes[pipe_index].as_ref().unwrap().free_space() > 0 {
        let Some(idx) = inner.pop_waiter(|p| &mut p.writers, pipe_index) else { break };
        let Waiter { pid, buf, len, .. } = inner.waiters[idx].take().unwrap();
        let pipe = inner.pipes[pipe_index].as_mut().unwrap();
        let result = match user_to_ring(pipe, copier, pid, buf, len) {
            Ok(n) => n as i64,
            Err(()) => -1,
        };
        complete_waiter(sched, pid, result);
    }
}

/// Wakes blocked readers in FIFO order as data becomes available.
fn wake_readers(inner: &mut Inner, sched: &ProcTable, copier: &dyn UserCopy, pipe_index: usize) {
    while inner.pipes[pipe_index].as_ref().unwrap().len > 0 {
        let Some(idx) = inner.pop_waiter(|p| &mut p.readers, pipe_index) else { break };
        let Waiter { pid, buf, len, .. } = inner.waiters[idx].take().unwrap();
        let pipe = inner.pipes[pipe_index].as_mut().unwrap();
        let result = match ring_to_user(pipe, copier, pid, buf, len) {
            Ok(n) => n as i64,
            Err(()) => -1,
        };
        complete_waiter(sched, pid, result);
    }
}

/// Drains every remaining waiter of `kind` on `pipe_index`'s queue,
/// completing each with the fixed `result` (spec 4.5 "Close": EOF for
/// readers when the last writer goes, broken-pipe for writers when the
/// last reader goes).
fn drain_with_result(inner: &mut Inner, sched: &ProcTable, pipe_index: usize, kind: WaitKind, result: i64) {
    let pick: fn(&mut Pipe) -> &mut WaitQueueList = match kind {
        WaitKind::Read => |p| &mut p.readers,
        WaitKind::Write => |p| &mut p.writers,
    };
    while let Some(idx) = inner.pop_waiter(pick, pipe_index) {
        let pid = inner.waiters[idx].take().unwrap().pid;
        complete_waiter(sched, pid, result);
    }
}

/// Writes `result` into `pid`'s saved frame and moves it back onto the
/// ready queue (spec 4.5 "Waiter completion"). Silently drops the
/// completion if `pid` is no longer blocked (e.g. it already exited).
fn complete_waiter(sched: &ProcTable, pid: Pid, result: i64) {
    let wrote = sched
        .with_slot_mut(pid, |slot| {
            slot.context.rax = result as u64;
            slot.has_context = true;
        })
        .is_ok();
    if wrote {
        let _ = sched.enqueue(pid);
    }
}
