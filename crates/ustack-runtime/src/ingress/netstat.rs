//! Per-interface receive counters

use std::sync::atomic::{AtomicU64, Ordering};

use ustack_core::constants::ETH_WIRE_OVERHEAD;

#[derive(Debug, Default)]
struct IfaceCounters {
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    rx_errors: AtomicU64,
}

/// Snapshot of one interface's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IfaceStats {
    pub rx_packets: u64,
    /// Frame bytes plus preamble, FCS and inter-frame gap.
    pub rx_bytes: u64,
    pub rx_errors: u64,
}

/// Receive counters for a fixed number of interfaces. Frames on an
/// interface index past the end are not counted.
#[derive(Debug)]
pub struct NetStats {
    ifaces: Box<[IfaceCounters]>,
}

impl NetStats {
    pub fn new(max_interfaces: usize) -> Self {
        Self {
            ifaces: (0..max_interfaces).map(|_| IfaceCounters::default()).collect(),
        }
    }

    pub(crate) fn record_rx(&self, ifidx: usize, len: usize) {
        if let Some(c) = self.ifaces.get(ifidx) {
            c.rx_packets.fetch_add(1, Ordering::Relaxed);
            c.rx_bytes
                .fetch_add(len as u64 + ETH_WIRE_OVERHEAD, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_error(&self, ifidx: usize) {
        if let Some(c) = self.ifaces.get(ifidx) {
            c.rx_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn interfaces(&self) -> usize {
        self.ifaces.len()
    }

    pub fn snapshot(&self, ifidx: usize) -> Option<IfaceStats> {
        self.ifaces.get(ifidx).map(|c| IfaceStats {
            rx_packets: c.rx_packets.load(Ordering::Relaxed),
            rx_bytes: c.rx_bytes.load(Ordering::Relaxed),
            rx_errors: c.rx_errors.load(Ordering::Relaxed),
        })
    }

    /// Sum over all interfaces.
    pub fn total(&self) -> IfaceStats {
        (0..self.ifaces.len())
            .filter_map(|i| self.snapshot(i))
            .fold(IfaceStats::default(), |acc, s| IfaceStats {
                rx_packets: acc.rx_packets + s.rx_packets,
                rx_bytes: acc.rx_bytes + s.rx_bytes,
                rx_errors: acc.rx_errors + s.rx_errors,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_with_wire_overhead() {
        let stats = NetStats::new(2);
        stats.record_rx(0, 60);
        stats.record_rx(0, 100);
        stats.record_error(0);
        stats.record_rx(1, 14);

        assert_eq!(
            stats.snapshot(0),
            Some(IfaceStats { rx_packets: 2, rx_bytes: 160 + 48, rx_errors: 1 })
        );
        assert_eq!(stats.total().rx_packets, 3);
        assert_eq!(stats.total().rx_bytes, 160 + 48 + 14 + 24);
    }

    #[test]
    fn test_out_of_range_interface_ignored() {
        let stats = NetStats::new(1);
        stats.record_rx(5, 60);
        stats.record_error(5);
        assert_eq!(stats.snapshot(5), None);
        assert_eq!(stats.total(), IfaceStats::default());
    }
}
