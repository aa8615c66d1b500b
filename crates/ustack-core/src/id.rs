//! Socket-table identifier type

use core::fmt;

/// Index of a slot in the socket table
///
/// Notification groups live in the same table as streams and pipes, so a
/// group id is a `SocketId` whose slot has kind `Epoll`.
/// `u32::MAX` is reserved as the "no socket" sentinel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SocketId(u32);

impl SocketId {
    pub const NONE: SocketId = SocketId(u32::MAX);

    #[inline]
    pub const fn new(id: u32) -> Self {
        SocketId(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }
}

impl From<u32> for SocketId {
    #[inline]
    fn from(id: u32) -> Self {
        SocketId(id)
    }
}

impl fmt::Debug for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "SocketId(NONE)")
        } else {
            write!(f, "SocketId({})", self.0)
        }
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "-")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
