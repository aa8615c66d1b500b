//! Compiled-in defaults, overridable through `USTACK_*` env variables.

use ustack_core::constants;

pub const MAX_CONCURRENCY: usize = constants::DEFAULT_MAX_CONCURRENCY;
pub const MAX_INTERFACES: usize = constants::DEFAULT_MAX_INTERFACES;

/// Busy-poll before blocking in `wait`
pub const SPIN_BEFORE_SLEEP: bool = false;
/// Spin iterations when spinning is enabled
pub const WAIT_SPINS: u32 = 10_000;

/// Kick a parked engine before an application thread blocks
pub const WAKEUP_ENGINE: bool = true;
/// Upper bound on one engine park
pub const ENGINE_PARK_MS: u64 = 100;
