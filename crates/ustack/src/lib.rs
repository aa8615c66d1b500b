//! # ustack - userspace TCP stack core
//!
//! The cross-thread event notification subsystem of a kernel-bypass TCP
//! stack: epoll-compatible notification groups shared between application
//! threads and a packet-processing engine thread, plus the Ethernet
//! ingress demultiplexer that feeds the engine.
//!
//! ## Quick Start
//!
//! ```ignore
//! use ustack::{CtlOp, EpollEvent, EventMask, QueueKind, Stack, StackConfig};
//!
//! let mut stack = Stack::new(StackConfig::from_env())?;
//! let ctx = stack.context();
//!
//! let group = ctx.create_group(1024)?;
//! let sock = ctx.sockets().allocate_stream(my_stream)?;
//! ctx.ctl(group, CtlOp::Add, sock, Some(EpollEvent::new(EventMask::IN, 42)))?;
//!
//! stack.spawn_engine(move |ctx| {
//!     // rx burst -> Ingress::dispatch -> protocol code calls
//!     // ctx.raise(group, QueueKind::Engine, sock, EventMask::IN)
//!     ctx.flush_engine_events(group, now_ts())?;
//!     ctx.engine_park(None);
//!     Ok(())
//! })?;
//!
//! let mut events = [EpollEvent::default(); 64];
//! let n = ctx.wait(group, &mut events, 64, -1)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   application thread                     engine thread
//!   ──────────────────                     ─────────────
//!   ctl ──► shadow queue ─┐          ┌──── raise(Engine)
//!                         │          ▼
//!   wait ◄── user queue ◄─┴── flush_engine_events ◄── Ingress::dispatch
//!     │         ▲                                        ▲
//!     │         └── raise(User) under group lock         │
//!     └── condvar sleep, kicks a parked engine      NIC rx burst
//! ```

use std::io;
use std::sync::Arc;
use std::thread;

// Re-export core types
pub use ustack_core::{
    event_to_string, CtlOp, Endpoint, EpollEvent, EventMask, EventQueue, PipeEndpoint,
    QueueError, QueueKind, QueuedEvent, SocketId, SocketKind, SocketSlot, SocketTable,
    StackError, StackResult, StreamState, TcpState,
};
pub use ustack_core::constants;

// Re-export kprint macros for logging
pub use ustack_core::{kdebug, kerror, kinfo, ktrace, kwarn};
pub use ustack_core::kprint::{
    init as init_logging, set_flush_enabled, set_log_level, LogLevel,
};

// Re-export env utilities
pub use ustack_core::{env_get, env_get_bool, env_get_opt};

// Re-export runtime types
pub use ustack_runtime::{
    ether_type, ArpHandler, ConfigError, EtherType, GroupStats, GroupStatsSnapshot,
    IfaceStats, Ingress, Ipv4Handler, NetStats, NotificationGroup, PacketOutcome, PacketPool,
    StackConfig, StackContext, WaitStrategy,
};

/// Owns a `StackContext` and, once spawned, its engine thread.
///
/// Dropping the handle asks the engine to exit and joins it.
pub struct Stack {
    ctx: Arc<StackContext>,
    engine: Option<thread::JoinHandle<()>>,
}

impl Stack {
    pub fn new(config: StackConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            ctx: Arc::new(StackContext::new(config)?),
            engine: None,
        })
    }

    /// Shared handle for application threads.
    pub fn context(&self) -> Arc<StackContext> {
        Arc::clone(&self.ctx)
    }

    /// Start the engine thread. `step` runs once per engine loop
    /// iteration until exit is requested or it returns an error.
    pub fn spawn_engine<F>(&mut self, mut step: F) -> io::Result<()>
    where
        F: FnMut(&StackContext) -> StackResult<()> + Send + 'static,
    {
        if self.engine.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "engine thread already running",
            ));
        }
        let ctx = Arc::clone(&self.ctx);
        let handle = thread::Builder::new()
            .name("ustack-engine".into())
            .spawn(move || {
                kdebug!("engine thread started");
                while !ctx.is_exiting() {
                    if let Err(e) = step(&ctx) {
                        kerror!("engine step failed: {}", e);
                        break;
                    }
                }
                ctx.mark_done();
                kdebug!("engine thread finished");
            })?;
        self.engine = Some(handle);
        Ok(())
    }

    /// Ask the engine to exit, wake every waiter and join the engine.
    pub fn shutdown(&mut self) {
        self.ctx.request_exit();
        if let Some(handle) = self.engine.take() {
            if handle.join().is_err() {
                kerror!("engine thread panicked");
            }
        }
        self.ctx.mark_done();
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.shutdown();
    }
}
