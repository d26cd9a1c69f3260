//! Joining send and receive records by correlation id.
//!
//! Sends land in a pending map keyed by id; a receive with a known id turns
//! its pending entry into a `HopReply`. Duplicates of an already-matched probe
//! are dropped; replies whose send never shows up stay out of the results.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::Duration;

use crate::state::{ProbeQueues, ReceivedProbe, ResponseKind, SentProbe};

/// A probe joined with the reply it provoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopReply {
    pub ttl: u8,
    pub id: u32,
    pub responder: IpAddr,
    pub rtt: Duration,
    pub kind: ResponseKind,
}

#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<u32, SentProbe>,
    /// Receives that arrived before their send record was drained
    early: HashMap<u32, ReceivedProbe>,
    matched: HashSet<u32>,
    replies: Vec<HopReply>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self, probe: SentProbe) {
        // The two queues are drained independently, so a reply can be seen first
        if let Some(early) = self.early.remove(&probe.id) {
            self.matched.insert(probe.id);
            self.replies.push(join(&probe, &early));
            return;
        }
        self.pending.insert(probe.id, probe);
    }

    /// Join a reply to its probe. Returns the joined reply, if any.
    pub fn record_received(&mut self, reply: ReceivedProbe) -> Option<HopReply> {
        match self.pending.remove(&reply.id) {
            Some(sent) => {
                self.matched.insert(sent.id);
                let hop = join(&sent, &reply);
                self.replies.push(hop);
                Some(hop)
            }
            None => {
                if !self.matched.contains(&reply.id) {
                    self.early.entry(reply.id).or_insert(reply);
                }
                None
            }
        }
    }

    /// Replies joined so far, in join order
    pub fn replies(&self) -> &[HopReply] {
        &self.replies
    }

    /// Sends with no reply, ordered by id
    pub fn unmatched(&self) -> Vec<SentProbe> {
        let mut unmatched: Vec<SentProbe> = self.pending.values().copied().collect();
        unmatched.sort_by_key(|p| p.id);
        unmatched
    }

    /// Replies grouped by hop limit, lowest first
    pub fn by_hop(&self) -> Vec<(u8, Vec<HopReply>)> {
        let mut hops: HashMap<u8, Vec<HopReply>> = HashMap::new();
        for reply in &self.replies {
            hops.entry(reply.ttl).or_default().push(*reply);
        }
        let mut hops: Vec<(u8, Vec<HopReply>)> = hops.into_iter().collect();
        hops.sort_by_key(|(ttl, _)| *ttl);
        hops
    }

    /// Drain whatever is queued right now without waiting
    pub fn drain(&mut self, queues: &mut ProbeQueues) {
        while let Ok(sent) = queues.sent.try_recv() {
            self.record_sent(sent);
        }
        while let Ok(reply) = queues.received.try_recv() {
            self.record_received(reply);
        }
    }

    /// Consume both queues until every producer is gone
    pub async fn collect(mut self, mut queues: ProbeQueues) -> Self {
        let mut sent_open = true;
        let mut received_open = true;
        while sent_open || received_open {
            tokio::select! {
                sent = queues.sent.recv(), if sent_open => match sent {
                    Some(probe) => self.record_sent(probe),
                    None => sent_open = false,
                },
                reply = queues.received.recv(), if received_open => match reply {
                    Some(reply) => {
                        self.record_received(reply);
                    }
                    None => received_open = false,
                },
            }
        }
        self
    }
}

fn join(sent: &SentProbe, reply: &ReceivedProbe) -> HopReply {
    HopReply {
        ttl: sent.ttl,
        id: sent.id,
        responder: reply.responder,
        rtt: reply.received_at.saturating_duration_since(sent.sent_at),
        kind: reply.kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;
    use std::time::Instant;

    fn sent(id: u32, ttl: u8, at: Instant) -> SentProbe {
        SentProbe {
            id,
            dest: "2001:db8::99".parse().unwrap(),
            ttl,
            sent_at: at,
        }
    }

    fn reply(id: u32, at: Instant, kind: ResponseKind) -> ReceivedProbe {
        ReceivedProbe {
            id,
            responder: IpAddr::V6(Ipv6Addr::LOCALHOST),
            received_at: at,
            kind,
        }
    }

    #[test]
    fn test_join_computes_rtt_and_ttl() {
        let t0 = Instant::now();
        let mut correlator = Correlator::new();
        correlator.record_sent(sent(1000, 1, t0));

        let hop = correlator
            .record_received(reply(1000, t0 + Duration::from_millis(12), ResponseKind::TimeExceeded))
            .unwrap();
        assert_eq!(hop.ttl, 1);
        assert_eq!(hop.rtt, Duration::from_millis(12));
        assert!(correlator.unmatched().is_empty());
    }

    #[test]
    fn test_duplicate_and_foreign_replies_ignored() {
        let t0 = Instant::now();
        let mut correlator = Correlator::new();
        correlator.record_sent(sent(1000, 1, t0));
        correlator.record_sent(sent(1004, 1, t0));

        assert!(correlator.record_received(reply(1000, t0, ResponseKind::SynAck)).is_some());
        assert!(correlator.record_received(reply(1000, t0, ResponseKind::SynAck)).is_none());
        assert!(correlator.record_received(reply(4242, t0, ResponseKind::SynAck)).is_none());

        assert_eq!(correlator.replies().len(), 1);
        assert_eq!(correlator.unmatched().iter().map(|p| p.id).collect::<Vec<_>>(), vec![1004]);
    }

    #[test]
    fn test_reply_before_send_record() {
        let t0 = Instant::now();
        let mut correlator = Correlator::new();
        assert!(correlator.record_received(reply(1008, t0 + Duration::from_millis(3), ResponseKind::SynAck)).is_none());
        correlator.record_sent(sent(1008, 3, t0));

        assert_eq!(correlator.replies().len(), 1);
        assert_eq!(correlator.replies()[0].rtt, Duration::from_millis(3));
        assert!(correlator.unmatched().is_empty());
    }

    #[test]
    fn test_by_hop_orders_ttls() {
        let t0 = Instant::now();
        let mut correlator = Correlator::new();
        for (id, ttl) in [(1008, 3), (1000, 1), (1004, 2), (1012, 3)] {
            correlator.record_sent(sent(id, ttl, t0));
            correlator.record_received(reply(id, t0, ResponseKind::TimeExceeded));
        }
        let hops = correlator.by_hop();
        assert_eq!(hops.iter().map(|(t, r)| (*t, r.len())).collect::<Vec<_>>(), vec![(1, 1), (2, 1), (3, 2)]);
    }
}
