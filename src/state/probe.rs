use std::net::{IpAddr, Ipv6Addr};
use std::time::Instant;

use crate::probe::Icmpv6ErrorKind;

/// Sequence number of the first probe of a run
pub const SEQ_BASE: u32 = 1000;

/// Sequence space consumed per probe (SYN + option bytes headroom)
pub const SEQ_STEP: u32 = 4;

/// Sequence numbers wrap at 2^30
pub const SEQ_MODULUS: u32 = 1 << 30;

/// Number of distinct ids before the sequence wraps around
pub const SEQ_PERIOD: u32 = SEQ_MODULUS / SEQ_STEP;

/// Generates correlation ids: SEQ_BASE, then +SEQ_STEP mod SEQ_MODULUS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounter {
    next: u32,
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new(SEQ_BASE)
    }
}

impl SequenceCounter {
    pub fn new(start: u32) -> Self {
        Self {
            next: start % SEQ_MODULUS,
        }
    }

    /// Id the `n`th probe after `start` receives
    pub fn nth(start: u32, n: u64) -> u32 {
        ((start as u64 + SEQ_STEP as u64 * n) % SEQ_MODULUS as u64) as u32
    }

    /// Return the current id and advance
    pub fn next_seq(&mut self) -> u32 {
        let seq = self.next;
        self.next = (self.next + SEQ_STEP) % SEQ_MODULUS;
        seq
    }
}

/// A probe that went out on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentProbe {
    /// TCP sequence number of the SYN
    pub id: u32,
    pub dest: Ipv6Addr,
    /// Hop limit used (0 for connect probes)
    pub ttl: u8,
    pub sent_at: Instant,
}

/// What kind of reply produced a receive record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// ICMPv6 hop limit exceeded from an intermediate router
    TimeExceeded,
    /// ICMPv6 port unreachable
    PortUnreachable,
    /// SYN-ACK straight from the destination
    SynAck,
    /// Connect-mode handshake completed
    Connected,
}

impl ResponseKind {
    /// Whether this reply came from the destination itself
    pub fn is_destination(&self) -> bool {
        !matches!(self, ResponseKind::TimeExceeded)
    }
}

impl From<Icmpv6ErrorKind> for ResponseKind {
    fn from(kind: Icmpv6ErrorKind) -> Self {
        match kind {
            Icmpv6ErrorKind::HopLimitExceeded => ResponseKind::TimeExceeded,
            Icmpv6ErrorKind::PortUnreachable => ResponseKind::PortUnreachable,
        }
    }
}

/// A reply correlated to a probe by id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedProbe {
    /// Sequence number of the probe this answers
    pub id: u32,
    /// Address the reply came from
    pub responder: IpAddr,
    pub received_at: Instant,
    pub kind: ResponseKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sequence_starts_at_base_and_steps() {
        let mut counter = SequenceCounter::default();
        assert_eq!(counter.next_seq(), 1000);
        assert_eq!(counter.next_seq(), 1004);
        assert_eq!(counter.next_seq(), 1008);
    }

    #[test]
    fn test_sequence_wraps_mod_2_30() {
        let mut counter = SequenceCounter::new(SEQ_MODULUS - 4);
        assert_eq!(counter.next_seq(), SEQ_MODULUS - 4);
        assert_eq!(counter.next_seq(), 0);
        assert_eq!(counter.next_seq(), 4);
    }

    #[test]
    fn test_sequence_no_repeat_in_window() {
        let mut counter = SequenceCounter::default();
        let mut seen = HashSet::new();
        for _ in 0..100_000 {
            assert!(seen.insert(counter.next_seq()));
        }
    }

    #[test]
    fn test_sequence_period() {
        // Ids repeat exactly after SEQ_PERIOD probes, never earlier
        assert_eq!(SEQ_PERIOD, 1 << 28);
        assert_eq!(SequenceCounter::nth(SEQ_BASE, SEQ_PERIOD as u64), SEQ_BASE);
        assert_ne!(SequenceCounter::nth(SEQ_BASE, SEQ_PERIOD as u64 - 1), SEQ_BASE);
        // Across the wrap point, ids stay distinct from the start
        let before_wrap = (SEQ_MODULUS - SEQ_BASE) / SEQ_STEP;
        assert_eq!(SequenceCounter::nth(SEQ_BASE, before_wrap as u64), 0);
        assert_ne!(SequenceCounter::nth(SEQ_BASE, before_wrap as u64 + 249), SEQ_BASE);
    }

    #[test]
    fn test_nth_matches_counter() {
        let mut counter = SequenceCounter::default();
        for n in 0..1000u64 {
            assert_eq!(counter.next_seq(), SequenceCounter::nth(SEQ_BASE, n));
        }
    }

    #[test]
    fn test_destination_kinds() {
        assert!(!ResponseKind::TimeExceeded.is_destination());
        assert!(ResponseKind::SynAck.is_destination());
        assert!(ResponseKind::PortUnreachable.is_destination());
    }
}
