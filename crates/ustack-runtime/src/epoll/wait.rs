//! The application-side wait
//!
//! `wait` sleeps on the group condvar until the user or shadow queue holds
//! something, then drains the user queue before the shadow queue, FIFO
//! within each. Every popped record is re-validated against the socket
//! slot because the socket may have been closed, recycled or
//! deregistered since the record was queued.
//!
//! One waiter per group is the supported pattern. A second concurrent
//! waiter is not rejected but may be woken for events the first drains.
//!
//! Records pushed to the shadow queue (registration replay) nudge a
//! waiter without taking the group mutex. A `ctl` that lands while a
//! waiter is between its empty check and going to sleep is therefore not
//! seen until the engine's next `flush_engine_events`, or until the
//! waiter's timeout expires. Without a running engine loop, wait with a
//! finite timeout.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use ustack_core::{ktrace, kdebug};
use ustack_core::{EpollEvent, QueuedEvent, SocketId, StackError, StackResult};

use crate::config::WaitStrategy;
use crate::context::StackContext;
use crate::epoll::group::{release_pending, GroupStats, NotificationGroup, UserSide};

/// Remaining sleep budget of one `wait` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timeout {
    /// Do not sleep.
    Poll,
    Infinite,
    /// Absolute deadline computed once at entry.
    Until(Instant),
}

impl Timeout {
    fn from_ms(timeout_ms: i32) -> Self {
        match timeout_ms {
            0 => Timeout::Poll,
            ms if ms < 0 => Timeout::Infinite,
            ms => Timeout::Until(Instant::now() + Duration::from_millis(ms as u64)),
        }
    }
}

impl StackContext {
    /// Wait for events on `group`, filling at most `max_events` entries of
    /// `out`.
    ///
    /// `timeout_ms` of 0 polls, a negative value waits without bound, a
    /// positive value sleeps at most once until the deadline. Returns the
    /// number of events written, 0 on timeout.
    ///
    /// Fails with `Interrupted` when the group is destroyed underneath the
    /// call or the context is shutting down or interrupted.
    ///
    /// Supports a single waiter per group. A replay queued by a concurrent
    /// `ctl` can be missed until the next engine flush; see the module
    /// docs.
    pub fn wait(
        &self,
        group: SocketId,
        out: &mut [EpollEvent],
        max_events: usize,
        timeout_ms: i32,
    ) -> StackResult<usize> {
        let group = self.lookup_group(group, StackError::BadHandle)?;
        if out.is_empty() || max_events == 0 {
            return Err(StackError::InvalidArgument);
        }
        let limit = max_events.min(out.len());
        let out = &mut out[..limit];

        GroupStats::bump(&group.stats().calls);
        let mut timeout = Timeout::from_ms(timeout_ms);

        if let WaitStrategy::SpinThenBlock { spins } = self.config().wait_strategy {
            if timeout != Timeout::Poll {
                spin_for_events(&group, spins);
            }
        }

        let mut user = group.lock_user()?;
        loop {
            if !group.is_alive() {
                return Err(StackError::Interrupted);
            }

            while user.queue.is_empty() && group.shadow.lock().is_empty() {
                if timeout == Timeout::Poll {
                    break;
                }
                if self.take_termination() {
                    return Err(StackError::Interrupted);
                }

                GroupStats::bump(&group.stats().waits);
                group.waiting.store(true, Ordering::Release);
                if self.config().wakeup_engine && self.engine_is_sleeping() {
                    self.interrupt_engine();
                }

                let slept: StackResult<_> = match timeout {
                    Timeout::Until(deadline) => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        timeout = Timeout::Poll;
                        group
                            .cond
                            .wait_timeout(user, remaining)
                            .map(|(guard, _)| guard)
                            .map_err(StackError::from)
                    }
                    _ => group.cond.wait(user).map_err(StackError::from),
                };
                group.waiting.store(false, Ordering::Release);
                user = slept?;

                if !group.is_alive() {
                    kdebug!("group {}: waiter woken by destroy", group.id());
                    return Err(StackError::Interrupted);
                }
                if self.take_termination() {
                    return Err(StackError::Interrupted);
                }
            }

            let delivered = self.drain(&group, &mut user, out);
            if delivered > 0 || timeout == Timeout::Poll {
                ktrace!("group {}: wait returns {}", group.id(), delivered);
                return Ok(delivered);
            }
        }
    }

    /// Copy valid records into `out`, user queue first, then shadow.
    fn drain(&self, group: &NotificationGroup, user: &mut UserSide, out: &mut [EpollEvent]) -> usize {
        let mut count = 0;
        while count < out.len() && !user.queue.is_empty() {
            let record = user.queue.pop_expected();
            let n = self.deliver(group, record, &mut out[count..]);
            count += n;
        }
        let mut shadow = group.shadow.lock();
        while count < out.len() && !shadow.is_empty() {
            let record = shadow.pop_expected();
            let n = self.deliver(group, record, &mut out[count..]);
            count += n;
        }
        count
    }

    /// Validate one popped record and write it to `slot[0]` if it still
    /// describes a live interest. Returns the number of entries written.
    fn deliver(&self, group: &NotificationGroup, record: QueuedEvent, slot: &mut [EpollEvent]) -> usize {
        group.ready_hint.fetch_sub(1, Ordering::AcqRel);

        let valid = self.sockets().get(record.socket).map_or(false, |sock| {
            sock.is_in_use()
                && sock.generation() == record.generation
                && sock.interest().contains(record.events)
                && sock.pending().contains(record.events)
        });
        release_pending(self.sockets(), &record);

        if valid {
            slot[0] = EpollEvent::new(record.events, record.tag);
            GroupStats::bump(&group.stats().handled);
            1
        } else {
            ktrace!(
                "group {}: dropped stale {} for {}",
                group.id(),
                ustack_core::event_to_string(record.events),
                record.socket
            );
            GroupStats::bump(&group.stats().invalidated);
            0
        }
    }
}

/// Busy-poll the ready hint before taking the lock.
fn spin_for_events(group: &NotificationGroup, spins: u32) {
    for _ in 0..spins {
        if group.ready_hint.load(Ordering::Acquire) > 0 || !group.is_alive() {
            return;
        }
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use std::sync::Arc;
    use std::thread;
    use ustack_core::{CtlOp, EventMask, QueueKind, SocketKind, StreamState, TcpState};

    fn context() -> StackContext {
        StackContext::new(StackConfig::new().max_concurrency(64)).unwrap()
    }

    fn watched(ctx: &StackContext, group: SocketId, mask: EventMask, tag: u64) -> SocketId {
        let id = ctx.sockets().allocate(SocketKind::Unbound).unwrap();
        ctx.ctl(group, CtlOp::Add, id, Some(EpollEvent::new(mask, tag))).unwrap();
        id
    }

    /// Spin until the group reports a blocked waiter.
    fn until_waiting(ctx: &StackContext, group: SocketId) {
        let g = ctx.group(group).unwrap();
        let start = Instant::now();
        while !g.is_waiting() {
            assert!(start.elapsed() < Duration::from_secs(5), "waiter never blocked");
            thread::yield_now();
        }
    }

    struct Readable;

    impl StreamState for Readable {
        fn state(&self) -> TcpState {
            TcpState::Established
        }
        fn recv_buffered(&self) -> usize {
            100
        }
        fn send_buffered(&self) -> Option<usize> {
            Some(0)
        }
        fn send_window(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_argument_checks() {
        let ctx = context();
        let group = ctx.create_group(4).unwrap();
        let mut out = [EpollEvent::default(); 4];
        assert_eq!(ctx.wait(group, &mut out, 0, 0), Err(StackError::InvalidArgument));
        assert_eq!(ctx.wait(group, &mut [], 4, 0), Err(StackError::InvalidArgument));
        assert_eq!(
            ctx.wait(SocketId::new(40), &mut out, 4, 0),
            Err(StackError::BadHandle)
        );
    }

    #[test]
    fn test_poll_on_empty_returns_zero_immediately() {
        let ctx = context();
        let group = ctx.create_group(4).unwrap();
        let mut out = [EpollEvent::default(); 4];
        let start = Instant::now();
        assert_eq!(ctx.wait(group, &mut out, 4, 0).unwrap(), 0);
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(ctx.group(group).unwrap().stats().snapshot().waits, 0);
    }

    #[test]
    fn test_basic_scenario() {
        let ctx = context();
        let group = ctx.create_group(4).unwrap();
        let sock = watched(&ctx, group, EventMask::IN, 7);
        let mut out = [EpollEvent::default(); 4];

        assert_eq!(ctx.wait(group, &mut out, 4, 0).unwrap(), 0);
        ctx.raise(group, QueueKind::User, sock, EventMask::IN).unwrap();
        assert_eq!(ctx.wait(group, &mut out, 4, 0).unwrap(), 1);
        assert_eq!(out[0], EpollEvent::new(EventMask::IN, 7));
        assert_eq!(ctx.wait(group, &mut out, 4, 0).unwrap(), 0);

        let stats = ctx.group(group).unwrap().stats().snapshot();
        assert_eq!(stats.calls, 3);
        assert_eq!(stats.issued, 1);
        assert_eq!(stats.handled, 1);
        assert!(ctx.sockets().get(sock).unwrap().pending().is_empty());
    }

    #[test]
    fn test_capacity_plus_one() {
        let ctx = context();
        let group = ctx.create_group(4).unwrap();
        let socks: Vec<SocketId> = (0..5).map(|i| watched(&ctx, group, EventMask::IN, i)).collect();

        for &sock in &socks[..4] {
            ctx.raise(group, QueueKind::User, sock, EventMask::IN).unwrap();
        }
        assert_eq!(
            ctx.raise(group, QueueKind::User, socks[4], EventMask::IN),
            Err(StackError::CapacityExceeded)
        );

        let mut out = [EpollEvent::default(); 8];
        assert_eq!(ctx.wait(group, &mut out, 8, 0).unwrap(), 4);
        let tags: Vec<u64> = out[..4].iter().map(|e| e.data).collect();
        assert_eq!(tags, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_max_events_limits_and_keeps_rest() {
        let ctx = context();
        let group = ctx.create_group(8).unwrap();
        for i in 0..3 {
            let sock = watched(&ctx, group, EventMask::IN, i);
            ctx.raise(group, QueueKind::User, sock, EventMask::IN).unwrap();
        }
        let mut out = [EpollEvent::default(); 8];
        assert_eq!(ctx.wait(group, &mut out, 2, 0).unwrap(), 2);
        assert_eq!(ctx.wait(group, &mut out, 8, 0).unwrap(), 1);
        assert_eq!(out[0].data, 2);
    }

    #[test]
    fn test_user_queue_drains_before_shadow() {
        let ctx = context();
        let group = ctx.create_group(4).unwrap();
        let a = watched(&ctx, group, EventMask::IN, 1);
        let b = watched(&ctx, group, EventMask::IN, 2);
        ctx.raise(group, QueueKind::Shadow, a, EventMask::IN).unwrap();
        ctx.raise(group, QueueKind::User, b, EventMask::IN).unwrap();

        let mut out = [EpollEvent::default(); 4];
        assert_eq!(ctx.wait(group, &mut out, 4, 0).unwrap(), 2);
        assert_eq!(out[0].data, 2);
        assert_eq!(out[1].data, 1);
    }

    #[test]
    fn test_engine_queue_invisible_until_flush() {
        let ctx = context();
        let group = ctx.create_group(4).unwrap();
        let sock = watched(&ctx, group, EventMask::IN, 1);
        ctx.raise(group, QueueKind::Engine, sock, EventMask::IN).unwrap();

        let mut out = [EpollEvent::default(); 4];
        assert_eq!(ctx.wait(group, &mut out, 4, 0).unwrap(), 0);
        ctx.flush_engine_events(group, 0).unwrap();
        assert_eq!(ctx.wait(group, &mut out, 4, 0).unwrap(), 1);
    }

    #[test]
    fn test_delete_invalidates_queued_record() {
        let ctx = context();
        let group = ctx.create_group(4).unwrap();
        let sock = watched(&ctx, group, EventMask::IN, 1);
        ctx.raise(group, QueueKind::User, sock, EventMask::IN).unwrap();
        ctx.ctl(group, CtlOp::Delete, sock, None).unwrap();

        let mut out = [EpollEvent::default(); 4];
        assert_eq!(ctx.wait(group, &mut out, 4, 0).unwrap(), 0);
        let stats = ctx.group(group).unwrap().stats().snapshot();
        assert_eq!(stats.invalidated, 1);
        assert_eq!(stats.handled, 0);
        // the kind is no longer latched
        assert!(ctx.sockets().get(sock).unwrap().pending().is_empty());
    }

    #[test]
    fn test_recycled_slot_record_dropped() {
        let ctx = context();
        let group = ctx.create_group(4).unwrap();
        let sock = watched(&ctx, group, EventMask::IN, 1);
        ctx.raise(group, QueueKind::User, sock, EventMask::IN).unwrap();

        ctx.sockets().free(sock).unwrap();
        let reused = watched(&ctx, group, EventMask::IN, 2);
        assert_eq!(reused, sock);

        let mut out = [EpollEvent::default(); 4];
        assert_eq!(ctx.wait(group, &mut out, 4, 0).unwrap(), 0);
        assert_eq!(ctx.group(group).unwrap().stats().snapshot().invalidated, 1);

        ctx.raise(group, QueueKind::User, reused, EventMask::IN).unwrap();
        assert_eq!(ctx.wait(group, &mut out, 4, 0).unwrap(), 1);
        assert_eq!(out[0].data, 2);
    }

    #[test]
    fn test_add_replay_visible_on_next_wait() {
        let ctx = context();
        let group = ctx.create_group(4).unwrap();
        let sock = ctx.sockets().allocate_stream(Arc::new(Readable)).unwrap();
        ctx.ctl(group, CtlOp::Add, sock, Some(EpollEvent::new(EventMask::IN, 11)))
            .unwrap();

        let mut out = [EpollEvent::default(); 4];
        assert_eq!(ctx.wait(group, &mut out, 4, 0).unwrap(), 1);
        assert_eq!(out[0], EpollEvent::new(EventMask::IN, 11));
    }

    #[test]
    fn test_finite_timeout_elapses() {
        let ctx = context();
        let group = ctx.create_group(4).unwrap();
        let mut out = [EpollEvent::default(); 4];
        let start = Instant::now();
        assert_eq!(ctx.wait(group, &mut out, 4, 50).unwrap(), 0);
        assert!(start.elapsed() >= Duration::from_millis(45));
        assert_eq!(ctx.group(group).unwrap().stats().snapshot().waits, 1);
    }

    #[test]
    fn test_blocked_waiter_woken_by_raise() {
        let ctx = Arc::new(context());
        let group = ctx.create_group(4).unwrap();
        let sock = watched(&ctx, group, EventMask::IN, 5);

        let waiter = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let mut out = [EpollEvent::default(); 4];
                let n = ctx.wait(group, &mut out, 4, -1).unwrap();
                (n, out[0])
            })
        };

        until_waiting(&ctx, group);
        ctx.raise(group, QueueKind::User, sock, EventMask::IN).unwrap();

        let (n, ev) = waiter.join().unwrap();
        assert_eq!(n, 1);
        assert_eq!(ev, EpollEvent::new(EventMask::IN, 5));
    }

    #[test]
    fn test_blocked_waiter_sleeps_through_stale_records() {
        let ctx = Arc::new(context());
        let group = ctx.create_group(4).unwrap();
        let dropped = watched(&ctx, group, EventMask::IN, 1);
        let live = watched(&ctx, group, EventMask::IN, 2);
        ctx.ctl(group, CtlOp::Delete, dropped, None).unwrap();

        let waiter = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let mut out = [EpollEvent::default(); 4];
                ctx.wait(group, &mut out, 4, -1).map(|n| (n, out[0]))
            })
        };

        until_waiting(&ctx, group);
        // Wakes the waiter, but the record fails validation.
        ctx.raise(group, QueueKind::User, dropped, EventMask::IN).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(!waiter.is_finished());
        until_waiting(&ctx, group);

        ctx.raise(group, QueueKind::User, live, EventMask::IN).unwrap();
        let (n, ev) = waiter.join().unwrap().unwrap();
        assert_eq!(n, 1);
        assert_eq!(ev, EpollEvent::new(EventMask::IN, 2));
        assert_eq!(ctx.group(group).unwrap().stats().snapshot().invalidated, 1);
    }

    #[test]
    fn test_blocked_waiter_woken_by_flush() {
        let ctx = Arc::new(context());
        let group = ctx.create_group(4).unwrap();
        let sock = watched(&ctx, group, EventMask::OUT, 6);

        let waiter = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let mut out = [EpollEvent::default(); 4];
                ctx.wait(group, &mut out, 4, 10_000).map(|n| (n, out[0]))
            })
        };

        until_waiting(&ctx, group);
        ctx.raise(group, QueueKind::Engine, sock, EventMask::OUT).unwrap();
        assert_eq!(ctx.flush_engine_events(group, 99).unwrap(), 1);

        let (n, ev) = waiter.join().unwrap().unwrap();
        assert_eq!(n, 1);
        assert_eq!(ev.events, EventMask::OUT);

        let g = ctx.group(group).unwrap();
        assert_eq!(g.stats().snapshot().wakes, 1);
        assert_eq!(g.last_event_ts(), 99);
    }

    #[test]
    fn test_destroy_wakes_blocked_waiter() {
        let ctx = Arc::new(context());
        let group = ctx.create_group(4).unwrap();

        let waiter = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let mut out = [EpollEvent::default(); 4];
                ctx.wait(group, &mut out, 4, -1)
            })
        };

        until_waiting(&ctx, group);
        let start = Instant::now();
        ctx.destroy_group(group).unwrap();
        assert_eq!(waiter.join().unwrap(), Err(StackError::Interrupted));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_interrupt_wakes_blocked_waiter() {
        let ctx = Arc::new(context());
        let group = ctx.create_group(4).unwrap();

        let waiter = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let mut out = [EpollEvent::default(); 4];
                ctx.wait(group, &mut out, 4, -1)
            })
        };

        until_waiting(&ctx, group);
        ctx.interrupt();
        assert_eq!(waiter.join().unwrap(), Err(StackError::Interrupted));

        // interrupt is consumed; the group still works
        let mut out = [EpollEvent::default(); 4];
        assert_eq!(ctx.wait(group, &mut out, 4, 0).unwrap(), 0);
    }

    #[test]
    fn test_wait_after_exit_does_not_block() {
        let ctx = context();
        let group = ctx.create_group(4).unwrap();
        ctx.request_exit();
        let mut out = [EpollEvent::default(); 4];
        assert_eq!(ctx.wait(group, &mut out, 4, -1), Err(StackError::Interrupted));
    }

    #[test]
    fn test_waiter_wakes_parked_engine() {
        let ctx = Arc::new(context());
        let group = ctx.create_group(4).unwrap();

        let engine = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || ctx.engine_park(Some(Duration::from_secs(10))))
        };
        let start = Instant::now();
        while !ctx.engine_is_sleeping() {
            assert!(start.elapsed() < Duration::from_secs(5));
            thread::yield_now();
        }

        let mut out = [EpollEvent::default(); 4];
        assert_eq!(ctx.wait(group, &mut out, 4, 20).unwrap(), 0);
        assert!(engine.join().unwrap());
    }

    #[test]
    fn test_spin_strategy_delivers() {
        let config = StackConfig::new()
            .max_concurrency(8)
            .wait_strategy(WaitStrategy::SpinThenBlock { spins: 1000 });
        let ctx = StackContext::new(config).unwrap();
        let group = ctx.create_group(2).unwrap();
        let sock = watched(&ctx, group, EventMask::IN, 3);
        ctx.raise(group, QueueKind::Shadow, sock, EventMask::IN).unwrap();

        let mut out = [EpollEvent::default(); 2];
        assert_eq!(ctx.wait(group, &mut out, 2, 100).unwrap(), 1);
        assert_eq!(out[0].data, 3);
        assert_eq!(ctx.wait(group, &mut out, 2, 10).unwrap(), 0);
    }

    #[test]
    fn test_concurrent_raisers_single_record() {
        let ctx = Arc::new(context());
        let group = ctx.create_group(16).unwrap();
        let sock = watched(&ctx, group, EventMask::IN, 1);

        let raisers: Vec<_> = [QueueKind::User, QueueKind::Shadow, QueueKind::Engine]
            .into_iter()
            .map(|kind| {
                let ctx = Arc::clone(&ctx);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        ctx.raise(group, kind, sock, EventMask::IN).unwrap();
                    }
                })
            })
            .collect();
        for r in raisers {
            r.join().unwrap();
        }

        let g = ctx.group(group).unwrap();
        let total = g.queued(QueueKind::User).unwrap()
            + g.queued(QueueKind::Shadow).unwrap()
            + g.queued(QueueKind::Engine).unwrap();
        assert_eq!(total, 1);
    }
}
