//! Environment overrides for stack tunables
//!
//! Every `USTACK_*` knob goes through these helpers so that a malformed
//! value falls back to the compiled default instead of aborting startup.
//!
//! ```ignore
//! use ustack_core::env::{env_get, env_get_bool};
//!
//! let slots: usize = env_get("USTACK_MAX_CONCURRENCY", 10_000);
//! let spin = env_get_bool("USTACK_SPIN_BEFORE_SLEEP", false);
//! ```

use std::str::FromStr;

/// Parse `key` as `T`, or return `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T` when it is set and well-formed.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean knob: "1", "true", "yes", "on" (any case) are true, anything
/// else that is set is false, unset yields `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => parse_bool(&val),
        Err(_) => default,
    }
}

fn parse_bool(val: &str) -> bool {
    matches!(
        val.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
