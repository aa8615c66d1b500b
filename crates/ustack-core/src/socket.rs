//! Socket table
//!
//! A fixed array of slots shared by the application and engine threads.
//! The event-poll core touches only the interest/pending/tag words of a
//! slot plus its endpoint binding; everything else about a socket belongs
//! to the protocol layers.
//!
//! Slot ids are recycled LIFO so a just-closed slot is reused while still
//! warm in cache. Every allocate and free bumps the slot generation, which
//! lets the drain path reject records queued for a previous occupant.

use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{StackError, StackResult};
use crate::event::EventMask;
use crate::id::SocketId;
use crate::spinlock::SpinLock;
use crate::traits::{PipeEndpoint, StreamState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketKind {
    Unused = 0,
    /// Allocated, protocol not yet chosen.
    Unbound = 1,
    Stream = 2,
    Listener = 3,
    Pipe = 4,
    Epoll = 5,
}

impl SocketKind {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => SocketKind::Unbound,
            2 => SocketKind::Stream,
            3 => SocketKind::Listener,
            4 => SocketKind::Pipe,
            5 => SocketKind::Epoll,
            _ => SocketKind::Unused,
        }
    }
}

/// Protocol object behind a slot.
#[derive(Clone, Default)]
pub enum Endpoint {
    #[default]
    None,
    Stream(Arc<dyn StreamState>),
    Pipe(Arc<dyn PipeEndpoint>),
}

pub struct SocketSlot {
    id: SocketId,
    kind: AtomicU8,
    generation: AtomicU32,
    interest: AtomicU32,
    pending: AtomicU32,
    tag: AtomicU64,
    endpoint: SpinLock<Endpoint>,
}

impl SocketSlot {
    fn new(id: u32) -> Self {
        Self {
            id: SocketId::new(id),
            kind: AtomicU8::new(SocketKind::Unused as u8),
            generation: AtomicU32::new(0),
            interest: AtomicU32::new(0),
            pending: AtomicU32::new(0),
            tag: AtomicU64::new(0),
            endpoint: SpinLock::new(Endpoint::None),
        }
    }

    #[inline]
    pub fn id(&self) -> SocketId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> SocketKind {
        SocketKind::from_u8(self.kind.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_in_use(&self) -> bool {
        self.kind() != SocketKind::Unused
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    #[inline]
    pub fn interest(&self) -> EventMask {
        EventMask::from_bits(self.interest.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_interest(&self, mask: EventMask) {
        self.interest.store(mask.bits(), Ordering::Release);
    }

    #[inline]
    pub fn pending(&self) -> EventMask {
        EventMask::from_bits(self.pending.load(Ordering::Acquire))
    }

    /// Set `kind` pending. Returns false when it was already pending, in
    /// which case nothing changed.
    #[inline]
    pub fn mark_pending(&self, kind: EventMask) -> bool {
        let prev = self.pending.fetch_or(kind.bits(), Ordering::AcqRel);
        prev & kind.bits() == 0
    }

    #[inline]
    pub fn clear_pending(&self, kind: EventMask) {
        self.pending.fetch_and(!kind.bits(), Ordering::AcqRel);
    }

    #[inline]
    pub fn tag(&self) -> u64 {
        self.tag.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_tag(&self, tag: u64) {
        self.tag.store(tag, Ordering::Release);
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.lock().clone()
    }

    pub fn stream(&self) -> Option<Arc<dyn StreamState>> {
        match &*self.endpoint.lock() {
            Endpoint::Stream(s) => Some(Arc::clone(s)),
            _ => None,
        }
    }

    pub fn pipe(&self) -> Option<Arc<dyn PipeEndpoint>> {
        match &*self.endpoint.lock() {
            Endpoint::Pipe(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    fn reset(&self) {
        self.interest.store(0, Ordering::Relaxed);
        self.pending.store(0, Ordering::Relaxed);
        self.tag.store(0, Ordering::Relaxed);
        *self.endpoint.lock() = Endpoint::None;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl core::fmt::Debug for SocketSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SocketSlot")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("generation", &self.generation())
            .field("interest", &self.interest())
            .field("pending", &self.pending())
            .finish()
    }
}

pub struct SocketTable {
    slots: Box<[SocketSlot]>,
    /// Recycled slot ids, most recently freed last.
    free_stack: SpinLock<Vec<u32>>,
    /// Next never-used slot id.
    next_fresh: AtomicU32,
    allocated: AtomicU32,
}

impl SocketTable {
    pub fn new(max_sockets: usize) -> Self {
        let max = max_sockets.min(u32::MAX as usize - 1) as u32;
        Self {
            slots: (0..max).map(SocketSlot::new).collect(),
            free_stack: SpinLock::new(Vec::with_capacity(max as usize)),
            next_fresh: AtomicU32::new(0),
            allocated: AtomicU32::new(0),
        }
    }

    /// Claim a slot for `kind`. `ResourceExhausted` when the table is full.
    pub fn allocate(&self, kind: SocketKind) -> StackResult<SocketId> {
        if kind == SocketKind::Unused {
            return Err(StackError::InvalidArgument);
        }
        let recycled = self.free_stack.lock().pop();
        let raw = match recycled {
            Some(raw) => raw,
            None => self.claim_fresh()?,
        };
        let slot = &self.slots[raw as usize];
        slot.reset();
        slot.kind.store(kind as u8, Ordering::Release);
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(slot.id)
    }

    fn claim_fresh(&self) -> StackResult<u32> {
        let max = self.slots.len() as u32;
        self.next_fresh
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur < max).then_some(cur + 1)
            })
            .map_err(|_| StackError::ResourceExhausted)
    }

    /// Allocate a stream slot bound to `state`.
    pub fn allocate_stream(&self, state: Arc<dyn StreamState>) -> StackResult<SocketId> {
        let id = self.allocate(SocketKind::Stream)?;
        *self.slots[id.as_usize()].endpoint.lock() = Endpoint::Stream(state);
        Ok(id)
    }

    /// Allocate a pipe slot bound to `pipe`.
    pub fn allocate_pipe(&self, pipe: Arc<dyn PipeEndpoint>) -> StackResult<SocketId> {
        let id = self.allocate(SocketKind::Pipe)?;
        *self.slots[id.as_usize()].endpoint.lock() = Endpoint::Pipe(pipe);
        Ok(id)
    }

    /// Bind a protocol object to a live slot; the slot kind follows it.
    pub fn attach(&self, id: SocketId, endpoint: Endpoint) -> StackResult<()> {
        let slot = self.resolve(id)?;
        let kind = match &endpoint {
            Endpoint::None => SocketKind::Unbound,
            Endpoint::Stream(_) => SocketKind::Stream,
            Endpoint::Pipe(_) => SocketKind::Pipe,
        };
        if slot.kind() == SocketKind::Epoll {
            return Err(StackError::BadHandle);
        }
        *slot.endpoint.lock() = endpoint;
        slot.kind.store(kind as u8, Ordering::Release);
        Ok(())
    }

    /// Return a slot to the table. Any record still queued for it is
    /// invalidated by the generation bump.
    pub fn free(&self, id: SocketId) -> StackResult<()> {
        let slot = self.resolve(id)?;
        slot.kind.store(SocketKind::Unused as u8, Ordering::Release);
        slot.reset();
        self.free_stack.lock().push(id.as_u32());
        self.allocated.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    /// Range-checked slot access, live or not.
    #[inline]
    pub fn get(&self, id: SocketId) -> StackResult<&SocketSlot> {
        self.slots.get(id.as_usize()).ok_or(StackError::BadHandle)
    }

    /// Slot access that also requires the slot to be in use.
    #[inline]
    pub fn resolve(&self, id: SocketId) -> StackResult<&SocketSlot> {
        let slot = self.get(id)?;
        if slot.is_in_use() {
            Ok(slot)
        } else {
            Err(StackError::BadHandle)
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn allocated_count(&self) -> u32 {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl core::fmt::Debug for SocketTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SocketTable")
            .field("capacity", &self.capacity())
            .field("allocated", &self.allocated_count())
            .finish()
    }
}
