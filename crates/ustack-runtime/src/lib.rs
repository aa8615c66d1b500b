//! # ustack-runtime
//!
//! Engine-side runtime for the ustack event-poll core.
//!
//! This crate provides:
//! - `StackContext`: per-engine state passed explicitly to every call
//! - Notification groups with epoll semantics (create/ctl/wait/destroy on
//!   the application side, raise/flush on the engine side)
//! - Engine parking with an explicit interrupt
//! - The Ethernet ingress demultiplexer and its rx counters
//! - Configuration with env overrides

pub mod config;
pub mod context;
pub mod epoll;
pub mod ingress;
pub mod parking;

// Re-exports
pub use config::{ConfigError, StackConfig, WaitStrategy};
pub use context::StackContext;
pub use epoll::{GroupStats, GroupStatsSnapshot, NotificationGroup};
pub use ingress::{
    ether_type, ArpHandler, EtherType, IfaceStats, Ingress, Ipv4Handler, NetStats, PacketOutcome,
    PacketPool,
};
pub use parking::{new_parking, EngineParking};
