//! Collaborator traits
//!
//! The event-poll core never owns protocol state. These traits are the
//! seams through which it asks the TCP engine and pipe objects whether a
//! condition already holds when interest is registered.

use crate::event::EventMask;

/// TCP connection states, in state-machine order.
///
/// Ordering matters: replay only fires for streams at or past
/// `Established`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TcpState {
    Closed = 0,
    Listen = 1,
    SynSent = 2,
    SynReceived = 3,
    Established = 4,
    FinWait1 = 5,
    FinWait2 = 6,
    CloseWait = 7,
    Closing = 8,
    LastAck = 9,
    TimeWait = 10,
}

impl TcpState {
    #[inline]
    pub fn is_established_or_later(self) -> bool {
        self >= TcpState::Established
    }
}

/// Read-only view of a TCP stream, implemented by the protocol engine.
///
/// Queries must be cheap and must not call back into the notification
/// core: `ctl` invokes them on the application thread.
pub trait StreamState: Send + Sync {
    fn state(&self) -> TcpState;

    /// Bytes received and merged but not yet read by the application.
    fn recv_buffered(&self) -> usize;

    /// Bytes sitting in the send buffer, `None` if no buffer is allocated.
    fn send_buffered(&self) -> Option<usize>;

    /// Current send window in bytes.
    fn send_window(&self) -> usize;

    /// Room to accept more application data.
    fn has_send_room(&self) -> bool {
        match self.send_buffered() {
            None => true,
            Some(len) => len < self.send_window(),
        }
    }
}

/// Pipe endpoint, implemented by the pipe layer.
pub trait PipeEndpoint: Send + Sync {
    /// Event kinds whose condition currently holds (data buffered -> IN,
    /// room to write -> OUT, peer closed -> HUP/RDHUP).
    fn ready_events(&self) -> EventMask;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        buffered: Option<usize>,
        window: usize,
    }

    impl StreamState for Fixed {
        fn state(&self) -> TcpState {
            TcpState::Established
        }
        fn recv_buffered(&self) -> usize {
            0
        }
        fn send_buffered(&self) -> Option<usize> {
            self.buffered
        }
        fn send_window(&self) -> usize {
            self.window
        }
    }

    #[test]
    fn test_state_order() {
        assert!(!TcpState::SynReceived.is_established_or_later());
        assert!(TcpState::Established.is_established_or_later());
        assert!(TcpState::CloseWait.is_established_or_later());
    }

    #[test]
    fn test_send_room() {
        assert!(Fixed { buffered: None, window: 0 }.has_send_room());
        assert!(Fixed { buffered: Some(10), window: 11 }.has_send_room());
        assert!(!Fixed { buffered: Some(11), window: 11 }.has_send_room());
    }
}
