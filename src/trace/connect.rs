//! Connect-probe mode: one full TCP handshake per probe.
//!
//! No raw sockets and no hop limit stepping, so this only answers "is the
//! destination port reachable, and how fast". A probe that fails or times out
//! produces no receive record; the aggregator infers loss from its absence.

use anyhow::Result;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::state::{ReceivedProbe, ResponseKind, SentProbe, SequenceCounter, Trace};

/// Run one connect probe per hop index. Returns the number of handshakes that completed.
pub async fn run_connect_probes(trace: Trace, cancel: CancellationToken) -> Result<u64> {
    let config = trace.config.clone();
    let delay = config.probe_delay();
    let mut seq = SequenceCounter::default();
    let mut probes = JoinSet::new();

    for _ in 0..config.max_hops {
        if cancel.is_cancelled() {
            break;
        }

        let id = seq.next_seq();
        probes.spawn(connect_probe(trace.clone(), id));

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    let mut connected = 0;
    while let Some(result) = probes.join_next().await {
        if result? {
            connected += 1;
        }
    }
    Ok(connected)
}

/// One handshake to the destination, bounded by the connect timeout
async fn connect_probe(trace: Trace, id: u32) -> bool {
    let dest = trace.config.dest_ip;
    let addr = SocketAddr::new(IpAddr::V6(dest), trace.config.dest_port);

    trace.record_sent(SentProbe {
        id,
        dest,
        ttl: 0,
        sent_at: Instant::now(),
    });

    match tokio::time::timeout(trace.config.connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            trace.record_received(ReceivedProbe {
                id,
                responder: IpAddr::V6(dest),
                received_at: Instant::now(),
                kind: ResponseKind::Connected,
            });
            drop(stream);
            true
        }
        Ok(Err(e)) => {
            debug!("Connect probe {} to {} failed: {}", id, addr, e);
            false
        }
        Err(_) => {
            debug!("Connect probe {} to {} timed out", id, addr);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ProbeMode};
    use std::net::Ipv6Addr;
    use std::time::Duration;

    fn connect_config(port: u16) -> Config {
        Config {
            dest_ip: Ipv6Addr::LOCALHOST,
            dest_port: port,
            max_hops: 3,
            packet_rate: 200_000,
            connect_timeout: Duration::from_millis(500),
            mode: ProbeMode::Connect,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_connect_probes_to_listening_port() {
        // Skip on hosts without IPv6 loopback
        let Ok(listener) = tokio::net::TcpListener::bind("[::1]:0").await else {
            return;
        };
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((_stream, _)) = listener.accept().await {}
        });

        let (trace, mut queues) = Trace::new(connect_config(port));
        let connected = run_connect_probes(trace, CancellationToken::new()).await.unwrap();
        assert_eq!(connected, 3);

        let mut sent = Vec::new();
        while let Ok(p) = queues.sent.try_recv() {
            assert_eq!(p.ttl, 0);
            sent.push(p.id);
        }
        sent.sort();
        assert_eq!(sent, vec![1000, 1004, 1008]);

        let mut received = Vec::new();
        while let Ok(p) = queues.received.try_recv() {
            assert_eq!(p.kind, ResponseKind::Connected);
            assert_eq!(p.responder, IpAddr::V6(Ipv6Addr::LOCALHOST));
            received.push(p.id);
        }
        received.sort();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_refused_connect_emits_only_sends() {
        // Grab a free port, then close it so connects are refused
        let Ok(listener) = std::net::TcpListener::bind("[::1]:0") else {
            return;
        };
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (trace, mut queues) = Trace::new(connect_config(port));
        let connected = run_connect_probes(trace, CancellationToken::new()).await.unwrap();
        assert_eq!(connected, 0);

        let mut sent = 0;
        while queues.sent.try_recv().is_ok() {
            sent += 1;
        }
        assert_eq!(sent, 3);
        assert!(queues.received.try_recv().is_err());
    }
}
