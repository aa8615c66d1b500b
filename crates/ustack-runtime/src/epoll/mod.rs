//! epoll-compatible notification groups
//!
//! Application side: `create_group`, `ctl`, `wait`, `destroy_group`.
//! Engine side: `raise`, `flush_engine_events`.
//!
//! All of them are methods on `StackContext`; a group is named by the
//! socket id of the EPOLL slot it occupies.

mod group;
mod ctl;
mod wait;
mod raise;

pub use group::{GroupStats, GroupStatsSnapshot, NotificationGroup};
