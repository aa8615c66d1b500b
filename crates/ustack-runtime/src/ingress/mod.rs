//! Ingress demultiplexer
//!
//! The engine hands every received Ethernet frame to `Ingress::dispatch`,
//! which reads the EtherType and routes the frame to the IPv4 or ARP
//! handler. Frames of any other type go straight back to the driver's
//! buffer pool. Dispatch never raises events itself; protocol handlers do
//! that through the `StackContext` they are given.

mod netstat;

pub use netstat::{IfaceStats, NetStats};

use std::fmt;
use std::sync::Arc;

use byteorder::{ByteOrder, NetworkEndian};

use ustack_core::constants::ETH_HEADER_LEN;
use ustack_core::{kdebug, ktrace};

use crate::context::StackContext;

/// EtherType field values the demultiplexer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EtherType {
    Ipv4,
    Arp,
    Ipv6,
    Unknown(u16),
}

impl From<u16> for EtherType {
    fn from(raw: u16) -> Self {
        match raw {
            0x0800 => EtherType::Ipv4,
            0x0806 => EtherType::Arp,
            0x86DD => EtherType::Ipv6,
            other => EtherType::Unknown(other),
        }
    }
}

impl From<EtherType> for u16 {
    fn from(ty: EtherType) -> u16 {
        match ty {
            EtherType::Ipv4 => 0x0800,
            EtherType::Arp => 0x0806,
            EtherType::Ipv6 => 0x86DD,
            EtherType::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtherType::Ipv4 => write!(f, "IPv4"),
            EtherType::Arp => write!(f, "ARP"),
            EtherType::Ipv6 => write!(f, "IPv6"),
            EtherType::Unknown(raw) => write!(f, "0x{:04x}", raw),
        }
    }
}

const ETHERTYPE_OFFSET: usize = 12;

/// EtherType of `frame`, `None` if it is shorter than an Ethernet header.
pub fn ether_type(frame: &[u8]) -> Option<EtherType> {
    if frame.len() < ETH_HEADER_LEN {
        return None;
    }
    Some(NetworkEndian::read_u16(&frame[ETHERTYPE_OFFSET..ETH_HEADER_LEN]).into())
}

/// What became of a dispatched frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    Handled,
    /// Not consumed, not an error.
    Dropped,
    /// Handler error code, counted as an rx error.
    Failed(i32),
}

/// IPv4 input path. Owns the frame until it returns.
pub trait Ipv4Handler {
    fn process(&mut self, ctx: &StackContext, ifidx: usize, ts: u32, frame: &[u8])
        -> PacketOutcome;
}

/// ARP input path. Its result does not affect the dispatch outcome.
pub trait ArpHandler {
    fn process(&mut self, ctx: &StackContext, ifidx: usize, ts: u32, frame: &[u8]);
}

/// Driver receive-buffer pool.
pub trait PacketPool {
    /// Give the buffer holding `frame` back to the driver.
    fn release(&mut self, ifidx: usize, frame: &[u8]);
}

/// Per-engine ingress entry point.
pub struct Ingress<I, A, P> {
    ipv4: I,
    arp: A,
    pool: P,
    stats: Arc<NetStats>,
}

impl<I, A, P> Ingress<I, A, P>
where
    I: Ipv4Handler,
    A: ArpHandler,
    P: PacketPool,
{
    pub fn new(ctx: &StackContext, ipv4: I, arp: A, pool: P) -> Self {
        Self {
            ipv4,
            arp,
            pool,
            stats: Arc::new(NetStats::new(ctx.config().max_interfaces)),
        }
    }

    /// Route one received frame.
    pub fn dispatch(
        &mut self,
        ctx: &StackContext,
        ifidx: usize,
        ts: u32,
        frame: &[u8],
    ) -> PacketOutcome {
        self.stats.record_rx(ifidx, frame.len());

        let ty = match ether_type(frame) {
            Some(ty) => ty,
            None => {
                kdebug!("if{}: runt frame of {} bytes", ifidx, frame.len());
                self.pool.release(ifidx, frame);
                self.stats.record_error(ifidx);
                return PacketOutcome::Dropped;
            }
        };
        ktrace!("if{}: rx {} bytes, {}", ifidx, frame.len(), ty);

        match ty {
            EtherType::Ipv4 => {
                let outcome = self.ipv4.process(ctx, ifidx, ts, frame);
                if let PacketOutcome::Failed(code) = outcome {
                    kdebug!("if{}: ipv4 input failed: {}", ifidx, code);
                    self.stats.record_error(ifidx);
                }
                outcome
            }
            EtherType::Arp => {
                self.arp.process(ctx, ifidx, ts, frame);
                PacketOutcome::Handled
            }
            _ => {
                self.pool.release(ifidx, frame);
                PacketOutcome::Handled
            }
        }
    }

    /// Shared handle to the rx counters, readable from other threads.
    pub fn stats(&self) -> Arc<NetStats> {
        Arc::clone(&self.stats)
    }

    pub fn ipv4_handler(&mut self) -> &mut I {
        &mut self.ipv4
    }

    pub fn arp_handler(&mut self) -> &mut A {
        &mut self.arp
    }

    pub fn pool(&mut self) -> &mut P {
        &mut self.pool
    }
}
