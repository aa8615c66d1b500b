//! Error types for the event-poll core

use core::fmt;

/// Result type for stack operations
pub type StackResult<T> = Result<T, StackError>;

/// Errors surfaced by the notification and ingress APIs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    /// Bad sizes, empty output buffers, missing event descriptors
    InvalidArgument,

    /// Unknown, out-of-range or wrong-kind group/socket id
    BadHandle,

    /// Group or socket id is in range but nothing is bound to it
    NotFound,

    /// ADD on a socket that already carries an interest mask
    AlreadyRegistered,

    /// MODIFY/DELETE on a socket without an interest mask
    NotRegistered,

    /// Event queue is full; the notification was dropped
    CapacityExceeded,

    /// Slot table or queue storage could not be obtained
    ResourceExhausted,

    /// Wait aborted by shutdown, interrupt or group teardown
    Interrupted,

    /// Lock or condition primitive failed
    PlatformError(i32),
}

impl StackError {
    /// Map to the errno value the socket-style API reports.
    pub fn errno(&self) -> i32 {
        match self {
            StackError::InvalidArgument => libc::EINVAL,
            StackError::BadHandle => libc::EBADF,
            StackError::NotFound => libc::ENOENT,
            StackError::AlreadyRegistered => libc::EEXIST,
            StackError::NotRegistered => libc::ENOENT,
            StackError::CapacityExceeded => libc::ENOSPC,
            StackError::ResourceExhausted => libc::ENFILE,
            StackError::Interrupted => libc::EINTR,
            StackError::PlatformError(code) => *code,
        }
    }

    /// Recoverable errors leave the stack fully usable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StackError::PlatformError(_))
    }
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackError::InvalidArgument => write!(f, "invalid argument"),
            StackError::BadHandle => write!(f, "bad handle"),
            StackError::NotFound => write!(f, "no such group or socket"),
            StackError::AlreadyRegistered => write!(f, "socket already registered"),
            StackError::NotRegistered => write!(f, "socket not registered"),
            StackError::CapacityExceeded => write!(f, "event queue capacity exceeded"),
            StackError::ResourceExhausted => write!(f, "resources exhausted"),
            StackError::Interrupted => write!(f, "wait interrupted"),
            StackError::PlatformError(code) => write!(f, "platform error: {}", code),
        }
    }
}

impl std::error::Error for StackError {}

/// Event queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Push on a queue holding `capacity` records
    Full,

    /// Pop on a queue holding no records
    Empty,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Full => write!(f, "event queue full"),
            QueueError::Empty => write!(f, "event queue empty"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<QueueError> for StackError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Full => StackError::CapacityExceeded,
            // Callers check emptiness first; reaching here is an invariant break.
            QueueError::Empty => StackError::InvalidArgument,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for StackError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StackError::PlatformError(libc::EDEADLK)
    }
}
