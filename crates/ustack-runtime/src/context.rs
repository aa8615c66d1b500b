//! Per-engine stack context
//!
//! Everything the notification core needs is reached through a
//! `StackContext` passed explicitly to every call: the socket table, the
//! registry of notification groups, the engine's sleep/wake state and the
//! termination flags that make a blocked `wait` return.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ustack_core::{kdebug, ktrace};
use ustack_core::{SocketId, SocketKind, SocketTable, SpinLock, StackError, StackResult};

use crate::config::{ConfigError, StackConfig};
use crate::epoll::NotificationGroup;
use crate::parking::{new_parking, EngineParking};

pub struct StackContext {
    config: StackConfig,
    sockets: SocketTable,

    /// Live groups indexed by their socket-table slot.
    groups: SpinLock<Vec<Option<Arc<NotificationGroup>>>>,
    /// Group the engine flushes by default (most recently created).
    default_group: SpinLock<Option<SocketId>>,

    /// Engine loop finished
    done: AtomicBool,
    /// Shutdown requested
    exit: AtomicBool,
    /// One-shot interrupt for a blocked waiter, consumed on delivery
    interrupt: AtomicBool,

    /// Engine is inside `engine_park`
    is_sleeping: AtomicBool,
    parking: Box<dyn EngineParking>,
}

impl StackContext {
    pub fn new(config: StackConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let slots = config.max_concurrency;
        kdebug!("stack context: {} socket slots", slots);
        Ok(Self {
            sockets: SocketTable::new(slots),
            groups: SpinLock::new(vec![None; slots]),
            default_group: SpinLock::new(None),
            done: AtomicBool::new(false),
            exit: AtomicBool::new(false),
            interrupt: AtomicBool::new(false),
            is_sleeping: AtomicBool::new(false),
            parking: new_parking(),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    #[inline]
    pub fn sockets(&self) -> &SocketTable {
        &self.sockets
    }

    // ========================================================================
    // Group registry
    // ========================================================================

    /// Resolve a live group. Out-of-range ids and non-EPOLL slots are
    /// `BadHandle`; an EPOLL slot with no group bound yields `absent`.
    pub(crate) fn lookup_group(
        &self,
        id: SocketId,
        absent: StackError,
    ) -> StackResult<Arc<NotificationGroup>> {
        let slot = self.sockets.get(id)?;
        match slot.kind() {
            SocketKind::Epoll => {}
            SocketKind::Unused => return Err(absent),
            _ => return Err(StackError::BadHandle),
        }
        self.groups.lock()[id.as_usize()]
            .as_ref()
            .map(Arc::clone)
            .ok_or(absent)
    }

    /// Look up a live group by id.
    pub fn group(&self, id: SocketId) -> StackResult<Arc<NotificationGroup>> {
        self.lookup_group(id, StackError::NotFound)
    }

    /// Most recently created group still alive, if any.
    pub fn default_group(&self) -> Option<SocketId> {
        *self.default_group.lock()
    }

    pub(crate) fn bind_group(&self, group: Arc<NotificationGroup>) {
        let id = group.id();
        self.groups.lock()[id.as_usize()] = Some(group);
        *self.default_group.lock() = Some(id);
    }

    pub(crate) fn unbind_group(&self, id: SocketId) {
        self.groups.lock()[id.as_usize()] = None;
        let mut default = self.default_group.lock();
        if *default == Some(id) {
            *default = None;
        }
    }

    // ========================================================================
    // Termination
    // ========================================================================

    /// Ask the engine and every blocked waiter to wind down.
    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::Release);
        self.wake_waiters();
        self.interrupt_engine();
    }

    /// Engine loop has finished.
    pub fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
        self.wake_waiters();
    }

    /// Make the next blocked `wait` return `Interrupted` once.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Release);
        self.wake_waiters();
    }

    #[inline]
    pub fn is_exiting(&self) -> bool {
        self.exit.load(Ordering::Acquire) || self.done.load(Ordering::Acquire)
    }

    /// Checked by a waiter after every wake-up. Consumes a pending
    /// interrupt.
    pub(crate) fn take_termination(&self) -> bool {
        if self.is_exiting() {
            return true;
        }
        self.interrupt.swap(false, Ordering::AcqRel)
    }

    fn wake_waiters(&self) {
        let live: Vec<Arc<NotificationGroup>> =
            self.groups.lock().iter().flatten().map(Arc::clone).collect();
        for group in live {
            group.wake_all();
        }
    }

    // ========================================================================
    // Engine sleep / wake
    // ========================================================================

    /// Park the engine thread for at most `timeout` (the configured park
    /// timeout when `None`). Returns true when woken by `interrupt_engine`.
    pub fn engine_park(&self, timeout: Option<Duration>) -> bool {
        if self.is_exiting() {
            return false;
        }
        let timeout = timeout.unwrap_or(self.config.engine_park_timeout);
        self.is_sleeping.store(true, Ordering::Release);
        let woken = self.parking.park(Some(timeout));
        self.is_sleeping.store(false, Ordering::Release);
        ktrace!("engine unparked (woken={})", woken);
        woken
    }

    /// Wake a parked engine, or make its next park return immediately.
    pub fn interrupt_engine(&self) {
        self.parking.unpark();
    }

    #[inline]
    pub fn engine_is_sleeping(&self) -> bool {
        self.is_sleeping.load(Ordering::Acquire)
    }
}

impl core::fmt::Debug for StackContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StackContext")
            .field("sockets", &self.sockets)
            .field("default_group", &self.default_group())
            .field("exiting", &self.is_exiting())
            .field("engine_sleeping", &self.engine_is_sleeping())
            .finish()
    }
}
