use std::io;
use std::net::{IpAddr, Ipv6Addr};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::probe::{DatagramSource, TCP_HEADER_SIZE, TcpHeader, parse_icmpv6_tcp_error};
use crate::state::{ReceivedProbe, ResponseKind};

/// Largest direct TCP reply we accept (header plus generous options)
const MAX_TCP_REPLY_LEN: usize = 100;

/// Which reply path a listener captures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    /// ICMPv6 errors quoting our probes, from routers along the path
    Icmp,
    /// SYN-ACKs straight from the destination
    Tcp,
}

impl ListenerKind {
    /// Turn one datagram into a receive record, or None if it isn't ours.
    /// With `src_port` set, replies for other source ports are dropped too.
    pub fn handle(
        &self,
        data: &[u8],
        from: IpAddr,
        dest: Ipv6Addr,
        src_port: Option<u16>,
    ) -> Option<ReceivedProbe> {
        match self {
            ListenerKind::Icmp => handle_icmp_datagram(data, from, dest, src_port),
            ListenerKind::Tcp => handle_tcp_datagram(data, from, dest, src_port),
        }
    }
}

/// Correlate an ICMPv6 error: the quoted destination must be the trace target,
/// and the quoted sequence number becomes the id.
pub fn handle_icmp_datagram(
    data: &[u8],
    from: IpAddr,
    dest: Ipv6Addr,
    src_port: Option<u16>,
) -> Option<ReceivedProbe> {
    let quoted = parse_icmpv6_tcp_error(data)?;
    if quoted.original_dest != dest {
        return None;
    }
    if src_port.is_some_and(|port| port != quoted.src_port) {
        return None;
    }
    Some(ReceivedProbe {
        id: quoted.seq,
        responder: from,
        received_at: Instant::now(),
        kind: quoted.kind.into(),
    })
}

/// Correlate a raw TCP segment: a SYN-ACK from the destination acknowledges seq + 1
pub fn handle_tcp_datagram(
    data: &[u8],
    from: IpAddr,
    dest: Ipv6Addr,
    src_port: Option<u16>,
) -> Option<ReceivedProbe> {
    if !(TCP_HEADER_SIZE..=MAX_TCP_REPLY_LEN).contains(&data.len()) {
        return None;
    }
    if from != IpAddr::V6(dest) {
        return None;
    }
    let header = TcpHeader::parse(data)?;
    if !header.is_syn_ack() {
        return None;
    }
    if src_port.is_some_and(|port| port != header.dst_port) {
        return None;
    }
    Some(ReceivedProbe {
        id: header.ack.wrapping_sub(1),
        responder: from,
        received_at: Instant::now(),
        kind: ResponseKind::SynAck,
    })
}

/// A long-lived reader of one raw socket, feeding the receive queue
pub struct Listener<S> {
    kind: ListenerKind,
    source: S,
    dest: Ipv6Addr,
    src_port: Option<u16>,
    mtu: usize,
    tx: UnboundedSender<ReceivedProbe>,
    cancel: CancellationToken,
}

impl<S: DatagramSource> Listener<S> {
    pub fn new(
        kind: ListenerKind,
        source: S,
        dest: Ipv6Addr,
        mtu: usize,
        tx: UnboundedSender<ReceivedProbe>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            kind,
            source,
            dest,
            src_port: None,
            mtu,
            tx,
            cancel,
        }
    }

    /// Only accept replies addressed to this probe source port
    pub fn with_src_port(mut self, port: u16) -> Self {
        self.src_port = Some(port);
        self
    }

    /// Read until cancelled, the queue closes, or the socket fails.
    /// Returns the number of receive records emitted.
    ///
    /// Read timeouts only wake the loop to check for cancellation. Any other
    /// read error ends this listener quietly; the sender is unaffected.
    pub fn run_blocking(self) -> u64 {
        let mut buffer = vec![0u8; self.mtu];
        let mut emitted: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.source.recv_datagram(&mut buffer) {
                Ok((len, from)) => {
                    match self.kind.handle(&buffer[..len], from, self.dest, self.src_port) {
                        Some(probe) => {
                            if self.tx.send(probe).is_err() {
                                // Nobody is consuming anymore
                                break;
                            }
                            emitted += 1;
                        }
                        None => trace!("{:?} listener ignored {} bytes from {}", self.kind, len, from),
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    debug!("{:?} listener stopped: {}", self.kind, e);
                    break;
                }
            }
        }

        debug!("{:?} listener exiting after {} replies", self.kind, emitted);
        emitted
    }
}

/// Spawn a listener on a dedicated OS thread (blocking raw socket reads)
pub fn spawn_listener<S>(listener: Listener<S>) -> io::Result<std::thread::JoinHandle<u64>>
where
    S: DatagramSource + Send + 'static,
{
    let name = match listener.kind {
        ListenerKind::Icmp => "icmp6-listener",
        ListenerKind::Tcp => "tcp6-listener",
    };
    std::thread::Builder::new()
        .name(name.into())
        .spawn(move || listener.run_blocking())
}
