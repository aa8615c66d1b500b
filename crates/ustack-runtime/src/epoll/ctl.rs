//! Interest registration
//!
//! ADD and MODIFY store the caller's tag and mask (with ERR|HUP always
//! folded in) on the socket slot, then replay any condition that already
//! holds into the shadow queue. Without the replay a socket that became
//! readable before registration would never be reported.
//!
//! DELETE only clears the interest mask. Records already queued for the
//! socket are dropped lazily when `wait` finds the kind outside interest.

use std::sync::Arc;

use ustack_core::{ktrace, kwarn};
use ustack_core::{
    CtlOp, EpollEvent, EventMask, PipeEndpoint, QueueKind, SocketId, SocketKind, SocketSlot,
    StackError, StackResult, StreamState, TcpState,
};

use crate::context::StackContext;
use crate::epoll::NotificationGroup;

impl StackContext {
    /// Register, change or remove interest of `socket` in `group`.
    ///
    /// `event` is required for ADD and MODIFY, ignored for DELETE.
    pub fn ctl(
        &self,
        group: SocketId,
        op: CtlOp,
        socket: SocketId,
        event: Option<EpollEvent>,
    ) -> StackResult<()> {
        let group = self.lookup_group(group, StackError::BadHandle)?;
        let slot = self.sockets().resolve(socket)?;
        if slot.kind() == SocketKind::Epoll {
            return Err(StackError::InvalidArgument);
        }

        match op {
            CtlOp::Add => {
                let event = event.ok_or(StackError::InvalidArgument)?;
                if !slot.interest().is_empty() {
                    return Err(StackError::AlreadyRegistered);
                }
                self.register(&group, slot, event);
            }
            CtlOp::Modify => {
                let event = event.ok_or(StackError::InvalidArgument)?;
                if slot.interest().is_empty() {
                    return Err(StackError::NotRegistered);
                }
                self.register(&group, slot, event);
            }
            CtlOp::Delete => {
                if slot.interest().is_empty() {
                    return Err(StackError::NotRegistered);
                }
                slot.set_interest(EventMask::NONE);
            }
        }
        ktrace!("group {} ctl {:?} {} -> {}", group.id(), op, socket, slot.interest());
        Ok(())
    }

    fn register(&self, group: &NotificationGroup, slot: &SocketSlot, event: EpollEvent) {
        slot.set_tag(event.data);
        slot.set_interest(event.events | EventMask::ALWAYS);

        if let Some(stream) = slot.stream() {
            replay_stream(group, slot, stream);
        } else if let Some(pipe) = slot.pipe() {
            replay_pipe(group, slot, pipe);
        }
    }
}

/// Level-triggered replay for a TCP stream.
fn replay_stream(group: &NotificationGroup, slot: &SocketSlot, stream: Arc<dyn StreamState>) {
    let state = stream.state();
    if !state.is_established_or_later() {
        return;
    }
    let interest = slot.interest();

    if interest.contains(EventMask::IN)
        && (stream.recv_buffered() > 0 || state == TcpState::CloseWait)
    {
        replay(group, slot, EventMask::IN);
    }
    if interest.contains(EventMask::OUT)
        && stream.has_send_room()
        && !slot.pending().contains(EventMask::OUT)
    {
        replay(group, slot, EventMask::OUT);
    }
}

fn replay_pipe(group: &NotificationGroup, slot: &SocketSlot, pipe: Arc<dyn PipeEndpoint>) {
    let ready = pipe.ready_events() & slot.interest().kinds();
    for kind in EventMask::KINDS {
        if ready.contains(kind) {
            replay(group, slot, kind);
        }
    }
}

/// A full shadow queue loses the replayed event but not the registration.
fn replay(group: &NotificationGroup, slot: &SocketSlot, kind: EventMask) {
    if let Err(e) = group.issue(QueueKind::Shadow, slot, kind) {
        kwarn!(
            "group {}: replay of {} for {} dropped: {}",
            group.id(),
            ustack_core::event_to_string(kind),
            slot.id(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    /// Stream whose state the test flips at will.
    struct FakeStream {
        state: AtomicU32,
        recv: AtomicUsize,
        send: Option<usize>,
        window: usize,
    }

    impl FakeStream {
        fn new(state: TcpState, recv: usize, send: Option<usize>, window: usize) -> Arc<Self> {
            Arc::new(Self {
                state: AtomicU32::new(state as u32),
                recv: AtomicUsize::new(recv),
                send,
                window,
            })
        }
    }

    impl StreamState for FakeStream {
        fn state(&self) -> TcpState {
            match self.state.load(Ordering::Relaxed) {
                4 => TcpState::Established,
                7 => TcpState::CloseWait,
                _ => TcpState::SynReceived,
            }
        }
        fn recv_buffered(&self) -> usize {
            self.recv.load(Ordering::Relaxed)
        }
        fn send_buffered(&self) -> Option<usize> {
            self.send
        }
        fn send_window(&self) -> usize {
            self.window
        }
    }

    struct FakePipe(EventMask);

    impl PipeEndpoint for FakePipe {
        fn ready_events(&self) -> EventMask {
            self.0
        }
    }

    fn setup(capacity: usize) -> (StackContext, SocketId) {
        let ctx = StackContext::new(StackConfig::new().max_concurrency(16)).unwrap();
        let group = ctx.create_group(capacity).unwrap();
        (ctx, group)
    }

    fn shadow_len(ctx: &StackContext, group: SocketId) -> usize {
        ctx.group(group).unwrap().queued(QueueKind::Shadow).unwrap()
    }

    #[test]
    fn test_add_folds_always_bits_and_stores_tag() {
        let (ctx, group) = setup(4);
        let sock = ctx.sockets().allocate(SocketKind::Unbound).unwrap();
        ctx.ctl(group, CtlOp::Add, sock, Some(EpollEvent::new(EventMask::IN, 77)))
            .unwrap();

        let slot = ctx.sockets().get(sock).unwrap();
        assert_eq!(slot.interest(), EventMask::IN | EventMask::ERR | EventMask::HUP);
        assert_eq!(slot.tag(), 77);
    }

    #[test]
    fn test_add_twice() {
        let (ctx, group) = setup(4);
        let sock = ctx.sockets().allocate(SocketKind::Unbound).unwrap();
        let ev = Some(EpollEvent::new(EventMask::IN, 1));
        ctx.ctl(group, CtlOp::Add, sock, ev).unwrap();
        assert_eq!(
            ctx.ctl(group, CtlOp::Add, sock, ev),
            Err(StackError::AlreadyRegistered)
        );
    }

    #[test]
    fn test_modify_and_delete_require_registration() {
        let (ctx, group) = setup(4);
        let sock = ctx.sockets().allocate(SocketKind::Unbound).unwrap();
        let ev = Some(EpollEvent::new(EventMask::OUT, 1));
        assert_eq!(
            ctx.ctl(group, CtlOp::Modify, sock, ev),
            Err(StackError::NotRegistered)
        );
        assert_eq!(
            ctx.ctl(group, CtlOp::Delete, sock, None),
            Err(StackError::NotRegistered)
        );

        ctx.ctl(group, CtlOp::Add, sock, Some(EpollEvent::new(EventMask::IN, 1)))
            .unwrap();
        ctx.ctl(group, CtlOp::Modify, sock, Some(EpollEvent::new(EventMask::OUT, 9)))
            .unwrap();
        let slot = ctx.sockets().get(sock).unwrap();
        assert_eq!(slot.interest(), EventMask::OUT | EventMask::ALWAYS);
        assert_eq!(slot.tag(), 9);

        ctx.ctl(group, CtlOp::Delete, sock, None).unwrap();
        assert!(slot.interest().is_empty());
    }

    #[test]
    fn test_missing_descriptor() {
        let (ctx, group) = setup(4);
        let sock = ctx.sockets().allocate(SocketKind::Unbound).unwrap();
        assert_eq!(
            ctx.ctl(group, CtlOp::Add, sock, None),
            Err(StackError::InvalidArgument)
        );
        ctx.ctl(group, CtlOp::Add, sock, Some(EpollEvent::new(EventMask::IN, 0)))
            .unwrap();
        assert_eq!(
            ctx.ctl(group, CtlOp::Modify, sock, None),
            Err(StackError::InvalidArgument)
        );
    }

    #[test]
    fn test_bad_handles() {
        let (ctx, group) = setup(4);
        let sock = ctx.sockets().allocate(SocketKind::Unbound).unwrap();
        let ev = Some(EpollEvent::new(EventMask::IN, 0));

        // socket id used as a group id
        assert_eq!(ctx.ctl(sock, CtlOp::Add, sock, ev), Err(StackError::BadHandle));
        // out of range / unused socket
        assert_eq!(
            ctx.ctl(group, CtlOp::Add, SocketId::new(999), ev),
            Err(StackError::BadHandle)
        );
        assert_eq!(
            ctx.ctl(group, CtlOp::Add, SocketId::new(10), ev),
            Err(StackError::BadHandle)
        );
        // a group cannot watch a group
        assert_eq!(
            ctx.ctl(group, CtlOp::Add, group, ev),
            Err(StackError::InvalidArgument)
        );
    }

    #[test]
    fn test_stream_replay_in_when_data_buffered() {
        let (ctx, group) = setup(4);
        let sock = ctx
            .sockets()
            .allocate_stream(FakeStream::new(TcpState::Established, 10, Some(0), 0))
            .unwrap();
        ctx.ctl(group, CtlOp::Add, sock, Some(EpollEvent::new(EventMask::IN, 5)))
            .unwrap();

        assert_eq!(shadow_len(&ctx, group), 1);
        assert_eq!(ctx.sockets().get(sock).unwrap().pending(), EventMask::IN);
    }

    #[test]
    fn test_stream_replay_in_on_close_wait() {
        let (ctx, group) = setup(4);
        let sock = ctx
            .sockets()
            .allocate_stream(FakeStream::new(TcpState::CloseWait, 0, Some(0), 0))
            .unwrap();
        ctx.ctl(group, CtlOp::Add, sock, Some(EpollEvent::new(EventMask::IN, 5)))
            .unwrap();
        assert_eq!(shadow_len(&ctx, group), 1);
    }

    #[test]
    fn test_stream_replay_skipped_before_established() {
        let (ctx, group) = setup(4);
        let sock = ctx
            .sockets()
            .allocate_stream(FakeStream::new(TcpState::SynReceived, 10, None, 0))
            .unwrap();
        ctx.ctl(
            group,
            CtlOp::Add,
            sock,
            Some(EpollEvent::new(EventMask::IN | EventMask::OUT, 5)),
        )
        .unwrap();
        assert_eq!(shadow_len(&ctx, group), 0);
    }

    #[test]
    fn test_stream_replay_out() {
        let (ctx, group) = setup(4);
        let roomy = ctx
            .sockets()
            .allocate_stream(FakeStream::new(TcpState::Established, 0, None, 0))
            .unwrap();
        let full = ctx
            .sockets()
            .allocate_stream(FakeStream::new(TcpState::Established, 0, Some(100), 100))
            .unwrap();
        let ev = Some(EpollEvent::new(EventMask::OUT, 0));
        ctx.ctl(group, CtlOp::Add, roomy, ev).unwrap();
        ctx.ctl(group, CtlOp::Add, full, ev).unwrap();

        assert_eq!(shadow_len(&ctx, group), 1);
        assert_eq!(ctx.sockets().get(roomy).unwrap().pending(), EventMask::OUT);
        assert!(ctx.sockets().get(full).unwrap().pending().is_empty());

        // MODIFY with OUT already pending does not queue a second record
        ctx.ctl(group, CtlOp::Modify, roomy, ev).unwrap();
        assert_eq!(shadow_len(&ctx, group), 1);
    }

    #[test]
    fn test_pipe_replay() {
        let (ctx, group) = setup(4);
        let pipe = ctx
            .sockets()
            .allocate_pipe(Arc::new(FakePipe(EventMask::IN | EventMask::OUT)))
            .unwrap();
        ctx.ctl(group, CtlOp::Add, pipe, Some(EpollEvent::new(EventMask::IN, 3)))
            .unwrap();

        // OUT is ready but not of interest
        assert_eq!(shadow_len(&ctx, group), 1);
        assert_eq!(ctx.sockets().get(pipe).unwrap().pending(), EventMask::IN);
    }

    #[test]
    fn test_replay_overflow_keeps_registration() {
        let (ctx, group) = setup(1);
        let a = ctx
            .sockets()
            .allocate_stream(FakeStream::new(TcpState::Established, 1, None, 0))
            .unwrap();
        let b = ctx
            .sockets()
            .allocate_stream(FakeStream::new(TcpState::Established, 1, None, 0))
            .unwrap();
        let ev = Some(EpollEvent::new(EventMask::IN, 0));
        ctx.ctl(group, CtlOp::Add, a, ev).unwrap();
        ctx.ctl(group, CtlOp::Add, b, ev).unwrap();

        assert_eq!(shadow_len(&ctx, group), 1);
        let slot_b = ctx.sockets().get(b).unwrap();
        assert!(slot_b.interest().contains(EventMask::IN));
        assert!(slot_b.pending().is_empty());
    }
}
