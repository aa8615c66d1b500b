//! Event issuance and the engine-side flush
//!
//! Protocol code calls `raise` when a socket condition changes. The
//! engine normally raises into its private queue and calls
//! `flush_engine_events` once per loop iteration, so a burst of packets
//! costs one lock round-trip and at most one wake-up.

use std::sync::atomic::Ordering;

use ustack_core::ktrace;
use ustack_core::{EventMask, QueueKind, SocketId, StackError, StackResult};

use crate::context::StackContext;
use crate::epoll::group::GroupStats;

impl StackContext {
    /// Queue `events` for `socket` on one of `group`'s queues.
    ///
    /// Each event kind in the mask becomes its own record; mode flags and
    /// unknown bits are ignored, and a mask with no event kind is
    /// `InvalidArgument`. Kinds already pending are skipped. If the queue
    /// cannot take every remaining kind nothing is queued and the call
    /// fails with `CapacityExceeded`.
    pub fn raise(
        &self,
        group: SocketId,
        queue: QueueKind,
        socket: SocketId,
        events: EventMask,
    ) -> StackResult<()> {
        let events = events.kinds();
        if events.is_empty() {
            return Err(StackError::InvalidArgument);
        }
        let group = self.lookup_group(group, StackError::BadHandle)?;
        let slot = self.sockets().resolve(socket)?;

        group.issue(queue, slot, events)
    }

    /// Move the engine queue into the application queue and wake a
    /// sleeping waiter if anything is now deliverable.
    ///
    /// Records that do not fit stay in the engine queue for the next
    /// flush. Returns how many records moved.
    pub fn flush_engine_events(&self, group: SocketId, now_ts: u32) -> StackResult<usize> {
        let group = self.lookup_group(group, StackError::BadHandle)?;
        let mut user = group.lock_user()?;
        if !group.is_alive() {
            return Err(StackError::BadHandle);
        }

        let mut moved = 0;
        {
            let mut engine = group.engine.lock();
            while !engine.is_empty() && !user.queue.is_full() {
                user.queue.push(engine.pop_expected())?;
                moved += 1;
            }
        }
        group.ready_hint.fetch_add(moved, Ordering::AcqRel);

        if group.is_waiting() && (!user.queue.is_empty() || !group.shadow.lock().is_empty()) {
            GroupStats::bump(&group.stats().wakes);
            group.set_last_event_ts(now_ts);
            group.cond.notify_one();
        }
        if moved > 0 {
            ktrace!("group {}: flushed {} engine events", group.id(), moved);
        }
        Ok(moved)
    }
}
