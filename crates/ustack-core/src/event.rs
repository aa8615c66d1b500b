//! Event masks and the records exchanged with `wait` callers.
//!
//! Bit values match the Linux epoll ABI so an application can pass masks
//! through unchanged.

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Bitset of event kinds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct EventMask(u32);

impl EventMask {
    pub const NONE: Self = Self(0x000);
    /// Readable: buffered input or peer half-close.
    pub const IN: Self = Self(0x001);
    /// Urgent data.
    pub const PRI: Self = Self(0x002);
    /// Writable: send buffer has room.
    pub const OUT: Self = Self(0x004);
    /// Error condition. Always monitored.
    pub const ERR: Self = Self(0x008);
    /// Hang-up. Always monitored.
    pub const HUP: Self = Self(0x010);
    /// Peer closed its write half.
    pub const RDHUP: Self = Self(0x2000);
    /// Delivery disarms the registration (recorded, not enforced).
    pub const ONESHOT: Self = Self(1 << 30);
    /// Edge-triggered flag (recorded, not enforced).
    pub const ET: Self = Self(1 << 31);

    /// Kinds folded into every ADD/MODIFY.
    pub const ALWAYS: Self = Self(Self::ERR.0 | Self::HUP.0);

    /// Single-kind bits `wait` can deliver, in delivery-name order.
    pub const KINDS: [Self; 6] = [
        Self::IN,
        Self::PRI,
        Self::OUT,
        Self::ERR,
        Self::HUP,
        Self::RDHUP,
    ];

    /// Union of `KINDS`.
    pub const ALL_KINDS: Self = Self(
        Self::IN.0 | Self::PRI.0 | Self::OUT.0 | Self::ERR.0 | Self::HUP.0 | Self::RDHUP.0,
    );

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// All bits of `other` are set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Keep only deliverable event kinds; mode flags and unknown bits go.
    #[inline]
    pub const fn kinds(self) -> Self {
        Self(self.0 & Self::ALL_KINDS.0)
    }

    /// Number of event kinds set.
    #[inline]
    pub const fn kind_count(self) -> usize {
        self.kinds().0.count_ones() as usize
    }

    #[inline]
    pub const fn is_edge_triggered(self) -> bool {
        self.0 & Self::ET.0 != 0
    }
}

impl BitOr for EventMask {
    type Output = Self;
    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = Self;
    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for EventMask {
    type Output = Self;
    #[inline]
    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventMask({})", self)
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut first = true;
        let mut put = |f: &mut fmt::Formatter<'_>, name: &str| -> fmt::Result {
            if !first {
                write!(f, "|")?;
            }
            first = false;
            write!(f, "{}", name)
        };
        for kind in Self::KINDS {
            if self.contains(kind) {
                put(f, event_to_string(kind))?;
            }
        }
        if self.contains(Self::ONESHOT) {
            put(f, "ONESHOT")?;
        }
        if self.contains(Self::ET) {
            put(f, "ET")?;
        }
        let known = Self::ALL_KINDS | Self::ONESHOT | Self::ET;
        let rest = *self & !known;
        if !rest.is_empty() {
            put(f, &format!("{:#x}", rest.0))?;
        }
        Ok(())
    }
}

/// Name of a single event kind; "?" for composite or unknown masks.
pub fn event_to_string(event: EventMask) -> &'static str {
    match event {
        EventMask::NONE => "NONE",
        EventMask::IN => "IN",
        EventMask::PRI => "PRI",
        EventMask::OUT => "OUT",
        EventMask::ERR => "ERR",
        EventMask::HUP => "HUP",
        EventMask::RDHUP => "RDHUP",
        _ => "?",
    }
}

/// Interest descriptor passed to `ctl` and filled in by `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpollEvent {
    pub events: EventMask,
    /// Caller correlation token, returned verbatim.
    pub data: u64,
}

impl EpollEvent {
    pub const fn new(events: EventMask, data: u64) -> Self {
        Self { events, data }
    }
}

/// `ctl` operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtlOp {
    Add,
    Modify,
    Delete,
}

/// Which of a group's three queues an event is issued into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Engine-private queue, moved to `User` by the engine's flush.
    Engine,
    /// Application-visible queue, guarded by the group lock.
    User,
    /// Registration-time replay queue, never takes the group lock.
    Shadow,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Engine => write!(f, "engine"),
            QueueKind::User => write!(f, "user"),
            QueueKind::Shadow => write!(f, "shadow"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_and_kinds() {
        let m = EventMask::IN | EventMask::ALWAYS | EventMask::ET;
        assert!(m.contains(EventMask::IN));
        assert!(m.contains(EventMask::ERR | EventMask::HUP));
        assert!(!m.contains(EventMask::OUT));
        assert!(m.is_edge_triggered());
        assert_eq!(m.kinds(), EventMask::IN | EventMask::ERR | EventMask::HUP);
        assert_eq!(m.kind_count(), 3);
    }

    #[test]
    fn test_kinds_drops_unknown_bits() {
        assert!(EventMask::from_bits(0x40).kinds().is_empty());
        assert_eq!((EventMask::OUT | EventMask::from_bits(0x40)).kinds(), EventMask::OUT);
        assert_eq!(EventMask::ALL_KINDS.kind_count(), EventMask::KINDS.len());
    }

    #[test]
    fn test_event_to_string() {
        assert_eq!(event_to_string(EventMask::IN), "IN");
        assert_eq!(event_to_string(EventMask::RDHUP), "RDHUP");
        assert_eq!(event_to_string(EventMask::IN | EventMask::OUT), "?");
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", EventMask::NONE), "NONE");
        assert_eq!(format!("{}", EventMask::IN | EventMask::OUT | EventMask::ET), "IN|OUT|ET");
        assert_eq!(format!("{}", EventMask::from_bits(0x100)), "0x100");
    }
}
