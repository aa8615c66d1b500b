//! Fixed-capacity circular event queue
//!
//! One record per (socket, event kind) notification. Storage is reserved
//! once at creation and never grows; a full queue rejects the push and the
//! caller decides whether the dropped notification matters.

use crate::error::{QueueError, StackError, StackResult};
use crate::event::EventMask;
use crate::id::SocketId;

/// A queued notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedEvent {
    pub socket: SocketId,
    /// Slot generation at issue time; a mismatch at delivery means the slot
    /// was recycled underneath the record.
    pub generation: u32,
    pub events: EventMask,
    pub tag: u64,
}

impl QueuedEvent {
    const EMPTY: Self = Self {
        socket: SocketId::NONE,
        generation: 0,
        events: EventMask::NONE,
        tag: 0,
    };
}

pub struct EventQueue {
    slots: Box<[QueuedEvent]>,
    head: usize,
    tail: usize,
    count: usize,
}

impl EventQueue {
    /// Reserve storage for `capacity` records.
    ///
    /// Fails with `ResourceExhausted` for a zero capacity or when the
    /// allocator refuses the reservation.
    pub fn new(capacity: usize) -> StackResult<Self> {
        if capacity == 0 {
            return Err(StackError::ResourceExhausted);
        }
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| StackError::ResourceExhausted)?;
        storage.resize(capacity, QueuedEvent::EMPTY);
        Ok(Self {
            slots: storage.into_boxed_slice(),
            head: 0,
            tail: 0,
            count: 0,
        })
    }

    pub fn push(&mut self, record: QueuedEvent) -> Result<(), QueueError> {
        if self.count == self.slots.len() {
            return Err(QueueError::Full);
        }
        self.slots[self.tail] = record;
        self.tail = (self.tail + 1) % self.slots.len();
        self.count += 1;
        Ok(())
    }

    pub fn pop_front(&mut self) -> Result<QueuedEvent, QueueError> {
        if self.count == 0 {
            return Err(QueueError::Empty);
        }
        let record = self.slots[self.head];
        self.head = (self.head + 1) % self.slots.len();
        self.count -= 1;
        Ok(record)
    }

    /// Pop when the caller has already established `!is_empty()`.
    ///
    /// # Panics
    ///
    /// On an empty queue: the caller's bookkeeping is broken.
    #[inline]
    pub fn pop_expected(&mut self) -> QueuedEvent {
        match self.pop_front() {
            Ok(record) => record,
            Err(e) => panic!("event queue invariant broken: {}", e),
        }
    }

    /// Remove every record, handing each to `f` in FIFO order.
    pub fn drain_with(&mut self, mut f: impl FnMut(QueuedEvent)) {
        while let Ok(record) = self.pop_front() {
            f(record);
        }
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Free slots left before a push fails.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.slots.len() - self.count
    }
}

impl core::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventQueue")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("count", &self.count)
            .field("capacity", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: u32, ev: EventMask) -> QueuedEvent {
        QueuedEvent {
            socket: SocketId::new(id),
            generation: 1,
            events: ev,
            tag: id as u64 * 10,
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(EventQueue::new(0), Err(StackError::ResourceExhausted)));
    }

    #[test]
    fn test_fifo_and_wraparound() {
        let mut q = EventQueue::new(3).unwrap();
        q.push(rec(1, EventMask::IN)).unwrap();
        q.push(rec(2, EventMask::OUT)).unwrap();
        assert_eq!(q.pop_front().unwrap().socket, SocketId::new(1));

        // tail wraps past the end of storage
        q.push(rec(3, EventMask::IN)).unwrap();
        q.push(rec(4, EventMask::HUP)).unwrap();
        assert!(q.is_full());

        let order: Vec<u32> = std::iter::from_fn(|| q.pop_front().ok())
            .map(|r| r.socket.as_u32())
            .collect();
        assert_eq!(order, vec![2, 3, 4]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_full_push_leaves_queue_untouched() {
        let mut q = EventQueue::new(2).unwrap();
        q.push(rec(1, EventMask::IN)).unwrap();
        q.push(rec(2, EventMask::IN)).unwrap();
        assert_eq!(q.push(rec(3, EventMask::IN)), Err(QueueError::Full));
        assert_eq!(q.len(), 2);
        assert_eq!(q.remaining(), 0);
        assert_eq!(q.pop_front().unwrap(), rec(1, EventMask::IN));
    }

    #[test]
    fn test_pop_empty() {
        let mut q = EventQueue::new(1).unwrap();
        assert_eq!(q.pop_front(), Err(QueueError::Empty));
    }

    #[test]
    #[should_panic(expected = "invariant")]
    fn test_pop_expected_on_empty_panics() {
        let mut q = EventQueue::new(1).unwrap();
        q.pop_expected();
    }

    #[test]
    fn test_drain_with_and_clear() {
        let mut q = EventQueue::new(4).unwrap();
        for i in 0..3 {
            q.push(rec(i, EventMask::IN)).unwrap();
        }
        let mut seen = Vec::new();
        q.drain_with(|r| seen.push(r.tag));
        assert_eq!(seen, vec![0, 10, 20]);

        q.push(rec(9, EventMask::OUT)).unwrap();
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.capacity(), 4);
    }
}
