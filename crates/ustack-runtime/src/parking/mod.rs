//! Engine parking
//!
//! The engine thread parks here when its rx rings and timers are idle.
//! Application threads about to block in `wait` call `unpark` so the
//! engine flushes anything it is still holding before they sleep.
//!
//! A wake is a token: an `unpark` that lands before the engine parks is
//! consumed by the next `park`, which then returns immediately.

use std::time::Duration;

/// Platform-specific engine parking mechanism
pub trait EngineParking: Send + Sync {
    /// Park the engine until unparked or `timeout` elapses.
    ///
    /// Returns `true` if a wake token was consumed, `false` on timeout or
    /// spurious return. The engine re-polls its work either way.
    fn park(&self, timeout: Option<Duration>) -> bool;

    /// Post a wake token and wake the engine if it is parked.
    fn unpark(&self);

    /// A wake token is posted and not yet consumed.
    fn has_token(&self) -> bool;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

/// Create a new platform-appropriate parking instance
pub fn new_parking() -> Box<dyn EngineParking> {
    Box::new(PlatformParking::new())
}
