//! # ustack-core
//!
//! Core types for the ustack event-poll core.
//!
//! This crate is platform-agnostic: no threads, no parking, no clocks.
//! The engine context, notification groups and the ingress path live in
//! `ustack-runtime`.
//!
//! ## Modules
//!
//! - `id` - socket-table identifier
//! - `event` - event masks, `EpollEvent`, ctl ops, queue kinds
//! - `queue` - fixed-capacity circular event queue
//! - `socket` - socket table and per-slot interest/pending state
//! - `traits` - TCP stream and pipe collaborator traits
//! - `error` - error types
//! - `spinlock` - short-section spinlock for engine-side queues
//! - `kprint` - leveled stderr logging macros
//! - `env` - environment variable helpers

pub mod id;
pub mod event;
pub mod queue;
pub mod socket;
pub mod traits;
pub mod error;
pub mod spinlock;
pub mod kprint;
pub mod env;

pub use id::SocketId;
pub use event::{event_to_string, CtlOp, EpollEvent, EventMask, QueueKind};
pub use queue::{EventQueue, QueuedEvent};
pub use socket::{Endpoint, SocketKind, SocketSlot, SocketTable};
pub use traits::{PipeEndpoint, StreamState, TcpState};
pub use error::{QueueError, StackError, StackResult};
pub use spinlock::SpinLock;
pub use env::{env_get, env_get_bool, env_get_opt};

/// Constants shared by the runtime and its callers
pub mod constants {
    /// Default socket-table size (mTCP's max_concurrency)
    pub const DEFAULT_MAX_CONCURRENCY: usize = 10_000;

    /// Default number of NIC interfaces tracked by ingress stats
    pub const DEFAULT_MAX_INTERFACES: usize = 16;

    /// Ethernet II header length
    pub const ETH_HEADER_LEN: usize = 14;

    /// Preamble + SFD + FCS + inter-frame gap, added to rx byte counts
    pub const ETH_WIRE_OVERHEAD: u64 = 24;
}
