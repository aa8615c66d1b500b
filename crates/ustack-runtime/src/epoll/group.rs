//! Notification group and its lifecycle
//!
//! A group owns three event queues:
//!
//! - `user`: lives inside the group mutex and is what the condvar
//!   handshake is built on.
//! - `shadow`: records synthesized at registration time. Guarded by its
//!   own spinlock so `ctl` never needs the group mutex.
//! - `engine`: private to the engine thread, moved into `user` by
//!   `flush_engine_events` once per engine loop iteration.
//!
//! Lock order is group mutex, then a queue spinlock. Nothing takes a
//! spinlock and then the mutex.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use ustack_core::{kdebug, ktrace, kwarn};
use ustack_core::{
    EventMask, EventQueue, QueueKind, QueuedEvent, SocketId, SocketKind, SocketSlot,
    SocketTable, SpinLock, StackError, StackResult,
};

use crate::context::StackContext;

/// Counters kept per group. Monotonic, relaxed.
#[derive(Debug, Default)]
pub struct GroupStats {
    /// `wait` calls
    pub calls: AtomicU64,
    /// Times a waiter actually slept
    pub waits: AtomicU64,
    /// Flush-time signals to a sleeping waiter
    pub wakes: AtomicU64,
    /// Records queued
    pub issued: AtomicU64,
    /// Records delivered to the application
    pub handled: AtomicU64,
    /// Records dropped at delivery as stale
    pub invalidated: AtomicU64,
}

/// Point-in-time copy of `GroupStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStatsSnapshot {
    pub calls: u64,
    pub waits: u64,
    pub wakes: u64,
    pub issued: u64,
    pub handled: u64,
    pub invalidated: u64,
}

impl GroupStats {
    pub fn snapshot(&self) -> GroupStatsSnapshot {
        GroupStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            wakes: self.wakes.load(Ordering::Relaxed),
            issued: self.issued.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// State guarded by the group mutex.
pub(crate) struct UserSide {
    pub(crate) queue: EventQueue,
}

pub struct NotificationGroup {
    id: SocketId,
    capacity: usize,

    pub(crate) user: Mutex<UserSide>,
    pub(crate) cond: Condvar,
    pub(crate) shadow: SpinLock<EventQueue>,
    pub(crate) engine: SpinLock<EventQueue>,

    /// A waiter is blocked on `cond`. Written under the mutex.
    pub(crate) waiting: AtomicBool,
    /// Cleared by destroy, under the mutex.
    alive: AtomicBool,
    /// Records in `user` + `shadow`; lets a spinning waiter poll without
    /// the mutex.
    pub(crate) ready_hint: AtomicUsize,
    /// Engine timestamp of the last flush that woke a waiter.
    last_event_ts: AtomicU32,

    stats: GroupStats,
}

impl NotificationGroup {
    fn new(id: SocketId, capacity: usize) -> StackResult<Self> {
        Ok(Self {
            id,
            capacity,
            user: Mutex::new(UserSide {
                queue: EventQueue::new(capacity)?,
            }),
            cond: Condvar::new(),
            shadow: SpinLock::new(EventQueue::new(capacity)?),
            engine: SpinLock::new(EventQueue::new(capacity)?),
            waiting: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            ready_hint: AtomicUsize::new(0),
            last_event_ts: AtomicU32::new(0),
            stats: GroupStats::default(),
        })
    }

    #[inline]
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Capacity of each of the three queues.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn stats(&self) -> &GroupStats {
        &self.stats
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }

    #[inline]
    pub fn last_event_ts(&self) -> u32 {
        self.last_event_ts.load(Ordering::Relaxed)
    }

    pub(crate) fn set_last_event_ts(&self, ts: u32) {
        self.last_event_ts.store(ts, Ordering::Relaxed);
    }

    /// Records currently queued in `kind`.
    pub fn queued(&self, kind: QueueKind) -> StackResult<usize> {
        Ok(match kind {
            QueueKind::User => self.lock_user()?.queue.len(),
            QueueKind::Shadow => self.shadow.lock().len(),
            QueueKind::Engine => self.engine.lock().len(),
        })
    }

    #[inline]
    pub(crate) fn lock_user(&self) -> StackResult<MutexGuard<'_, UserSide>> {
        Ok(self.user.lock()?)
    }

    /// Wake every thread blocked on the group. The mutex is taken so a
    /// waiter between its checks and `cond.wait` cannot miss the wake.
    pub(crate) fn wake_all(&self) {
        let _guard = self.user.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }

    /// Queue `events` for `slot`, one record per event kind.
    ///
    /// Kinds already pending are skipped. If the queue cannot take every
    /// remaining kind the call fails with `CapacityExceeded` and leaves the
    /// socket untouched. A destroyed group is `BadHandle`.
    pub(crate) fn issue(
        &self,
        kind: QueueKind,
        slot: &SocketSlot,
        events: EventMask,
    ) -> StackResult<()> {
        let events = events.kinds();
        if slot.pending().contains(events) {
            return Ok(());
        }
        let record = QueuedEvent {
            socket: slot.id(),
            generation: slot.generation(),
            events,
            tag: slot.tag(),
        };

        let queued = match kind {
            QueueKind::User => {
                let mut user = self.lock_user()?;
                let queued = self.push_pending(&mut user.queue, slot, record)?;
                if queued > 0 {
                    self.ready_hint.fetch_add(queued, Ordering::AcqRel);
                    self.cond.notify_one();
                }
                queued
            }
            QueueKind::Shadow => {
                let mut shadow = self.shadow.lock();
                let queued = self.push_pending(&mut shadow, slot, record)?;
                if queued > 0 {
                    self.ready_hint.fetch_add(queued, Ordering::AcqRel);
                }
                drop(shadow);
                // Best effort: a waiter that misses this nudge is woken by
                // the engine's next flush, which also checks shadow.
                if queued > 0 && self.is_waiting() {
                    self.cond.notify_one();
                }
                queued
            }
            QueueKind::Engine => self.push_pending(&mut self.engine.lock(), slot, record)?,
        };

        if queued > 0 {
            self.stats.issued.fetch_add(queued as u64, Ordering::Relaxed);
            ktrace!(
                "group {} <- {} {} on {} queue",
                self.id,
                slot.id(),
                events,
                kind
            );
        }
        Ok(())
    }

    /// Append one record per kind of `record.events` not yet pending.
    ///
    /// Runs under the lock guarding `queue`. Liveness and capacity for
    /// every kind are checked before any pending bit is claimed, so a
    /// failure mutates nothing. A kind claimed by a concurrent raiser in
    /// between is skipped. Returns how many records were appended.
    fn push_pending(
        &self,
        queue: &mut EventQueue,
        slot: &SocketSlot,
        record: QueuedEvent,
    ) -> StackResult<usize> {
        if !self.is_alive() {
            return Err(StackError::BadHandle);
        }
        let fresh = record.events & !slot.pending();
        if fresh.kind_count() > queue.remaining() {
            return Err(StackError::CapacityExceeded);
        }

        let mut queued = 0;
        for kind in EventMask::KINDS {
            if !fresh.contains(kind) || !slot.mark_pending(kind) {
                continue;
            }
            queue.push(QueuedEvent { events: kind, ..record })?;
            queued += 1;
        }
        Ok(queued)
    }

    /// Drop every queued record, releasing the pending bit each one held.
    fn discard(queue: &mut EventQueue, sockets: &SocketTable) {
        queue.drain_with(|record| release_pending(sockets, &record));
    }
}

impl core::fmt::Debug for NotificationGroup {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotificationGroup")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("alive", &self.is_alive())
            .field("waiting", &self.is_waiting())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

/// Clear the pending bit a record held, unless the slot was recycled and
/// the bit now belongs to its new occupant.
pub(crate) fn release_pending(sockets: &SocketTable, record: &QueuedEvent) {
    if let Ok(slot) = sockets.get(record.socket) {
        if slot.generation() == record.generation {
            slot.clear_pending(record.events);
        }
    }
}

/// Frees the reserved EPOLL slot unless creation reaches `commit`.
struct SlotReservation<'a> {
    sockets: &'a SocketTable,
    id: SocketId,
    armed: bool,
}

impl<'a> SlotReservation<'a> {
    fn new(sockets: &'a SocketTable) -> StackResult<Self> {
        let id = sockets.allocate(SocketKind::Epoll)?;
        Ok(Self {
            sockets,
            id,
            armed: true,
        })
    }

    fn commit(mut self) -> SocketId {
        self.armed = false;
        self.id
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            kdebug!("group creation unwound, releasing slot {}", self.id);
            let _ = self.sockets.free(self.id);
        }
    }
}

impl StackContext {
    /// Create a notification group whose queues each hold `capacity`
    /// records. Returns the group's socket id.
    pub fn create_group(&self, capacity: usize) -> StackResult<SocketId> {
        if capacity == 0 {
            return Err(StackError::InvalidArgument);
        }
        let reservation = SlotReservation::new(self.sockets())?;
        let group = Arc::new(NotificationGroup::new(reservation.id, capacity)?);
        self.bind_group(group);
        let id = reservation.commit();
        kdebug!("group {} created, capacity {}", id, capacity);
        Ok(id)
    }

    /// Tear down a group. A thread blocked in `wait` on it returns
    /// `Interrupted`.
    pub fn destroy_group(&self, id: SocketId) -> StackResult<()> {
        let group = self.lookup_group(id, StackError::NotFound)?;
        let sockets = self.sockets();

        let mut user = group.lock_user()?;
        if !group.alive.swap(false, Ordering::AcqRel) {
            return Err(StackError::NotFound);
        }
        // Every push checks `alive` under its queue's lock, so nothing
        // lands in these queues once they have been emptied here.
        NotificationGroup::discard(&mut user.queue, sockets);
        NotificationGroup::discard(&mut group.shadow.lock(), sockets);
        NotificationGroup::discard(&mut group.engine.lock(), sockets);
        group.ready_hint.store(0, Ordering::Release);

        self.unbind_group(id);
        if let Err(e) = sockets.free(id) {
            kwarn!("group {}: releasing slot failed: {}", id, e);
        }
        group.cond.notify_all();
        drop(user);

        kdebug!("group {} destroyed ({:?})", id, group.stats.snapshot());
        Ok(())
    }
}
