//! ustack End-to-End Smoke Test
//!
//! Exercises the event-poll core the way an application and an engine
//! thread would drive it:
//!   Part A - Notification groups: create, ctl, raise, wait, capacity
//!   Part B - Registration replay: streams and pipes
//!   Part C - Engine loop: synthetic NIC ring -> ingress -> raise -> flush
//!   Part D - Teardown: destroy and shutdown wake blocked waiters
//!
//! Run: ./target/release/epoll-smoke
//! (USTACK_LOG_LEVEL=trace shows every raise and drain)

use byteorder::{ByteOrder, NetworkEndian};
use crossbeam_queue::ArrayQueue;

use ustack::{
    ArpHandler, CtlOp, EpollEvent, EventMask, IfaceStats, Ingress, Ipv4Handler, PacketOutcome,
    PacketPool, PipeEndpoint, QueueKind, SocketId, SocketKind, Stack, StackConfig, StackContext,
    StackError, StreamState, TcpState,
};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

// ── Collaborators ──

/// Stream whose receive buffer the synthetic IPv4 path fills.
struct SmokeStream {
    state: TcpState,
    recv: AtomicUsize,
}

impl SmokeStream {
    fn new(state: TcpState, recv: usize) -> Arc<Self> {
        Arc::new(Self { state, recv: AtomicUsize::new(recv) })
    }
}

impl StreamState for SmokeStream {
    fn state(&self) -> TcpState {
        self.state
    }
    fn recv_buffered(&self) -> usize {
        self.recv.load(Ordering::Acquire)
    }
    fn send_buffered(&self) -> Option<usize> {
        Some(0)
    }
    fn send_window(&self) -> usize {
        65535
    }
}

struct SmokePipe;

impl PipeEndpoint for SmokePipe {
    fn ready_events(&self) -> EventMask {
        EventMask::OUT
    }
}

// Synthetic frame: Ethernet header, then u16 stream index, u16 payload len.
const FRAME_LEN: usize = 64;

fn build_frame(ether_type: u16, stream: u16, payload: u16) -> Vec<u8> {
    let mut frame = vec![0u8; FRAME_LEN];
    NetworkEndian::write_u16(&mut frame[12..14], ether_type);
    NetworkEndian::write_u16(&mut frame[14..16], stream);
    NetworkEndian::write_u16(&mut frame[16..18], payload);
    frame
}

/// Toy IPv4 path: credits the payload to a stream and raises IN.
struct SmokeIpv4 {
    group: SocketId,
    streams: Vec<(SocketId, Arc<SmokeStream>)>,
}

impl Ipv4Handler for SmokeIpv4 {
    fn process(&mut self, ctx: &StackContext, _ifidx: usize, _ts: u32, frame: &[u8]) -> PacketOutcome {
        let body = match frame.get(14..18) {
            Some(body) => body,
            None => return PacketOutcome::Dropped,
        };
        let idx = NetworkEndian::read_u16(&body[..2]) as usize;
        let payload = NetworkEndian::read_u16(&body[2..]) as usize;
        let (sock, stream) = match self.streams.get(idx) {
            Some(entry) => entry,
            None => return PacketOutcome::Failed(-libc::ENOENT),
        };
        stream.recv.fetch_add(payload, Ordering::AcqRel);
        match ctx.raise(self.group, QueueKind::Engine, *sock, EventMask::IN) {
            Ok(()) => PacketOutcome::Handled,
            Err(e) => PacketOutcome::Failed(-e.errno()),
        }
    }
}

#[derive(Default)]
struct SmokeArp {
    seen: Arc<AtomicUsize>,
}

impl ArpHandler for SmokeArp {
    fn process(&mut self, _ctx: &StackContext, _ifidx: usize, _ts: u32, _frame: &[u8]) {
        self.seen.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct SmokePool {
    released: Arc<AtomicUsize>,
}

impl PacketPool for SmokePool {
    fn release(&mut self, _ifidx: usize, _frame: &[u8]) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }
}

fn wait_for_waiter(ctx: &StackContext, group: SocketId) -> bool {
    let g = match ctx.group(group) {
        Ok(g) => g,
        Err(_) => return false,
    };
    let start = Instant::now();
    while !g.is_waiting() {
        if start.elapsed() > Duration::from_secs(5) {
            return false;
        }
        thread::yield_now();
    }
    true
}

// ════════════════════════════════════════════════════════════
// Part A: Notification groups
// ════════════════════════════════════════════════════════════

fn test_groups(t: &mut TestRunner, ctx: &StackContext) {
    t.section("Part A: Notification groups");

    let group = match ctx.create_group(4) {
        Ok(g) => { t.pass("create_group(4)"); g }
        Err(e) => { t.fail("create_group(4)", &e.to_string()); return; }
    };
    t.check(
        "create_group(0) -> InvalidArgument",
        ctx.create_group(0) == Err(StackError::InvalidArgument),
        "accepted zero capacity",
    );

    let socks: Vec<SocketId> = (0..5)
        .filter_map(|i| {
            let id = ctx.sockets().allocate(SocketKind::Unbound).ok()?;
            ctx.ctl(group, CtlOp::Add, id, Some(EpollEvent::new(EventMask::IN, i))).ok()?;
            Some(id)
        })
        .collect();
    t.check("ADD IN on 5 sockets", socks.len() == 5, "ctl failed");
    if socks.len() != 5 {
        return;
    }

    let mut out = [EpollEvent::default(); 8];
    t.check(
        "wait(timeout=0) on empty group",
        ctx.wait(group, &mut out, 8, 0) == Ok(0),
        "expected 0",
    );

    let _ = ctx.raise(group, QueueKind::User, socks[0], EventMask::IN);
    let n = ctx.wait(group, &mut out, 8, 0);
    t.check(
        "raise then wait delivers once",
        n == Ok(1) && out[0] == EpollEvent::new(EventMask::IN, 0),
        &format!("{:?} {:?}", n, out[0]),
    );
    t.check("second wait returns 0", ctx.wait(group, &mut out, 8, 0) == Ok(0), "redelivered");

    for &sock in &socks[..4] {
        let _ = ctx.raise(group, QueueKind::User, sock, EventMask::IN);
    }
    t.check(
        "capacity+1 raise -> CapacityExceeded",
        ctx.raise(group, QueueKind::User, socks[4], EventMask::IN)
            == Err(StackError::CapacityExceeded),
        "fifth raise accepted",
    );
    let n = ctx.wait(group, &mut out, 8, 0).unwrap_or(0);
    let tags: Vec<u64> = out[..n].iter().map(|e| e.data).collect();
    t.check("first 4 delivered FIFO", tags == [0, 1, 2, 3], &format!("{:?}", tags));

    let _ = ctx.raise(group, QueueKind::User, socks[1], EventMask::IN);
    let _ = ctx.ctl(group, CtlOp::Delete, socks[1], None);
    t.check(
        "DELETE while queued -> not delivered",
        ctx.wait(group, &mut out, 8, 0) == Ok(0),
        "stale record delivered",
    );

    let stats = ctx.group(group).map(|g| g.stats().snapshot()).unwrap_or_default();
    t.check(
        "stats: handled=5 invalidated=1",
        stats.handled == 5 && stats.invalidated == 1,
        &format!("{:?}", stats),
    );

    t.check("destroy_group", ctx.destroy_group(group).is_ok(), "destroy failed");
    for sock in socks {
        let _ = ctx.sockets().free(sock);
    }
}

// ════════════════════════════════════════════════════════════
// Part B: Registration replay
// ════════════════════════════════════════════════════════════

fn test_replay(t: &mut TestRunner, ctx: &StackContext) {
    t.section("Part B: Registration replay");

    let group = match ctx.create_group(8) {
        Ok(g) => g,
        Err(e) => { t.fail("create_group(8)", &e.to_string()); return; }
    };
    let mut out = [EpollEvent::default(); 8];

    let readable = ctx.sockets().allocate_stream(SmokeStream::new(TcpState::Established, 512));
    let connecting = ctx.sockets().allocate_stream(SmokeStream::new(TcpState::SynSent, 512));
    let pipe = ctx.sockets().allocate_pipe(Arc::new(SmokePipe));
    let (readable, connecting, pipe) = match (readable, connecting, pipe) {
        (Ok(a), Ok(b), Ok(c)) => (a, b, c),
        _ => { t.fail("allocate sockets", "table full"); return; }
    };

    let _ = ctx.ctl(group, CtlOp::Add, readable, Some(EpollEvent::new(EventMask::IN, 1)));
    let n = ctx.wait(group, &mut out, 8, 0);
    t.check(
        "ADD IN on readable stream -> IN",
        n == Ok(1) && out[0] == EpollEvent::new(EventMask::IN, 1),
        &format!("{:?}", n),
    );

    let _ = ctx.ctl(group, CtlOp::Add, connecting, Some(EpollEvent::new(EventMask::IN, 2)));
    t.check(
        "ADD IN before Established -> nothing",
        ctx.wait(group, &mut out, 8, 0) == Ok(0),
        "replayed too early",
    );

    let _ = ctx.ctl(
        group,
        CtlOp::Add,
        pipe,
        Some(EpollEvent::new(EventMask::IN | EventMask::OUT, 3)),
    );
    let n = ctx.wait(group, &mut out, 8, 0);
    t.check(
        "ADD IN|OUT on writable pipe -> OUT",
        n == Ok(1) && out[0] == EpollEvent::new(EventMask::OUT, 3),
        &format!("{:?} {:?}", n, out[0]),
    );

    let _ = ctx.destroy_group(group);
    for sock in [readable, connecting, pipe] {
        let _ = ctx.sockets().free(sock);
    }
}

// ════════════════════════════════════════════════════════════
// Part C: Engine loop with ingress
// ════════════════════════════════════════════════════════════

const STREAMS: usize = 8;
const FRAMES: usize = 400;

fn test_engine(t: &mut TestRunner, stack: &mut Stack) {
    t.section("Part C: Engine loop (NIC ring -> ingress -> flush)");
    let ctx = stack.context();

    let group = match ctx.create_group(64) {
        Ok(g) => g,
        Err(e) => { t.fail("create_group(64)", &e.to_string()); return; }
    };

    let mut streams = Vec::with_capacity(STREAMS);
    for i in 0..STREAMS {
        let stream = SmokeStream::new(TcpState::Established, 0);
        let sock = match ctx.sockets().allocate_stream(stream.clone()) {
            Ok(s) => s,
            Err(e) => { t.fail("allocate stream", &e.to_string()); return; }
        };
        if let Err(e) = ctx.ctl(group, CtlOp::Add, sock, Some(EpollEvent::new(EventMask::IN, i as u64))) {
            t.fail("ADD stream", &e.to_string());
            return;
        }
        streams.push((sock, stream));
    }
    t.pass("8 streams registered");

    // NIC rx ring: producer thread pushes, engine pops.
    let ring: Arc<ArrayQueue<Vec<u8>>> = Arc::new(ArrayQueue::new(256));
    let arp_seen = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));

    let mut ingress = Ingress::new(
        &ctx,
        SmokeIpv4 { group, streams: streams.clone() },
        SmokeArp { seen: Arc::clone(&arp_seen) },
        SmokePool { released: Arc::clone(&released) },
    );
    let netstat = ingress.stats();

    let engine_ring = Arc::clone(&ring);
    let mut ts: u32 = 0;
    let spawned = stack.spawn_engine(move |ctx| {
        let mut burst = 0;
        while let Some(frame) = engine_ring.pop() {
            ts = ts.wrapping_add(1);
            ingress.dispatch(ctx, 0, ts, &frame);
            burst += 1;
            if burst == 32 {
                break;
            }
        }
        ctx.flush_engine_events(group, ts)?;
        if burst == 0 {
            ctx.engine_park(None);
        }
        Ok(())
    });
    if let Err(e) = spawned {
        t.fail("spawn engine", &e.to_string());
        return;
    }
    t.pass("engine thread started");

    let nic_done = Arc::new(AtomicBool::new(false));
    let nic = {
        let ring = Arc::clone(&ring);
        let ctx = Arc::clone(&ctx);
        let nic_done = Arc::clone(&nic_done);
        thread::spawn(move || {
            for i in 0..FRAMES {
                let frame = match i % 50 {
                    0 => build_frame(0x0806, 0, 0),
                    1 => build_frame(0x86DD, 0, 0),
                    _ => build_frame(0x0800, (i % STREAMS) as u16, 100),
                };
                let mut frame = frame;
                loop {
                    match ring.push(frame) {
                        Ok(()) => break,
                        Err(back) => { frame = back; thread::yield_now(); }
                    }
                }
                ctx.interrupt_engine();
            }
            nic_done.store(true, Ordering::Release);
        })
    };

    let expected_bytes = (FRAMES - 2 * (FRAMES / 50)) * 100;
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut out = [EpollEvent::default(); 16];
    let mut delivered = 0usize;
    let mut drained_bytes = 0usize;
    while Instant::now() < deadline {
        match ctx.wait(group, &mut out, 16, 100) {
            Ok(n) => {
                delivered += n;
                for ev in &out[..n] {
                    // "read" everything buffered on the stream
                    if let Some((_, stream)) = streams.get(ev.data as usize) {
                        drained_bytes += stream.recv.swap(0, Ordering::AcqRel);
                    }
                }
            }
            Err(e) => { t.fail("wait in engine loop", &e.to_string()); break; }
        }
        if nic_done.load(Ordering::Acquire) && ring.is_empty() && drained_bytes == expected_bytes {
            break;
        }
    }
    let _ = nic.join();

    t.check("IN events delivered", delivered > 0, "none");
    t.check(
        "all payload bytes observed",
        drained_bytes == expected_bytes,
        &format!("{} of {}", drained_bytes, expected_bytes),
    );
    t.check(
        "ARP frames reached ARP handler",
        arp_seen.load(Ordering::Relaxed) == FRAMES / 50,
        &format!("{}", arp_seen.load(Ordering::Relaxed)),
    );
    t.check(
        "non-IP frames released to pool",
        released.load(Ordering::Relaxed) == FRAMES / 50,
        &format!("{}", released.load(Ordering::Relaxed)),
    );
    let rx = netstat.snapshot(0).unwrap_or_default();
    t.check(
        "netstat rx_packets / rx_bytes",
        rx == IfaceStats {
            rx_packets: FRAMES as u64,
            rx_bytes: (FRAMES * (FRAME_LEN + 24)) as u64,
            rx_errors: 0,
        },
        &format!("{:?}", rx),
    );

    let stats = ctx.group(group).map(|g| g.stats().snapshot()).unwrap_or_default();
    println!(
        "       calls={} waits={} wakes={} issued={} handled={} invalidated={}",
        stats.calls, stats.waits, stats.wakes, stats.issued, stats.handled, stats.invalidated
    );
}

// ════════════════════════════════════════════════════════════
// Part D: Teardown
// ════════════════════════════════════════════════════════════

fn test_teardown(t: &mut TestRunner, mut stack: Stack) {
    t.section("Part D: Teardown");
    let ctx = stack.context();

    let doomed = match ctx.create_group(4) {
        Ok(g) => g,
        Err(e) => { t.fail("create_group(4)", &e.to_string()); return; }
    };
    let waiter = {
        let ctx = Arc::clone(&ctx);
        thread::spawn(move || {
            let mut out = [EpollEvent::default(); 4];
            ctx.wait(doomed, &mut out, 4, -1)
        })
    };
    if wait_for_waiter(&ctx, doomed) {
        let start = Instant::now();
        let _ = ctx.destroy_group(doomed);
        let res = waiter.join().unwrap_or(Ok(0));
        t.check(
            "destroy wakes blocked waiter",
            res == Err(StackError::Interrupted) && start.elapsed() < Duration::from_secs(1),
            &format!("{:?}", res),
        );
    } else {
        t.fail("destroy wakes blocked waiter", "waiter never blocked");
    }

    let group = ctx.default_group().or_else(|| ctx.create_group(4).ok());
    let group = match group {
        Some(g) => g,
        None => { t.fail("group for shutdown", "none"); return; }
    };
    let waiter = {
        let ctx = Arc::clone(&ctx);
        thread::spawn(move || {
            let mut out = [EpollEvent::default(); 4];
            loop {
                match ctx.wait(group, &mut out, 4, -1) {
                    Ok(_) => continue,
                    other => return other,
                }
            }
        })
    };
    if wait_for_waiter(&ctx, group) {
        stack.shutdown();
        let res = waiter.join().unwrap_or(Ok(0));
        t.check(
            "shutdown interrupts blocked waiter",
            res == Err(StackError::Interrupted),
            &format!("{:?}", res),
        );
    } else {
        t.fail("shutdown interrupts blocked waiter", "waiter never blocked");
    }
}

fn main() {
    println!("=== ustack End-to-End Smoke Test ===");
    ustack::init_logging();

    let config = StackConfig::from_env().max_concurrency(256);
    if ustack::env_get_bool("USTACK_PRINT_CONFIG", false) {
        config.print();
    }

    let mut stack = match Stack::new(config) {
        Ok(s) => s,
        Err(e) => {
            println!("\nFATAL: {}", e);
            std::process::exit(1);
        }
    };
    let ctx = stack.context();

    let mut t = TestRunner::new();

    test_groups(&mut t, &ctx);
    test_replay(&mut t, &ctx);
    test_engine(&mut t, &mut stack);
    test_teardown(&mut t, stack);

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
