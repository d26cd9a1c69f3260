//! ICMPv6 error parsing for TCP probes
//!
//! Linux raw ICMPv6 sockets strip the outer IPv6 header, so a datagram starts
//! at the ICMPv6 header. RFC 4443 errors carry as much of the offending packet
//! as fits; we need the quoted IPv6 header (for its destination) and the first
//! 8 bytes of the quoted TCP header (ports and sequence number).

use pnet::packet::icmpv6::Icmpv6Packet;
use pnet::packet::ipv6::Ipv6Packet;
use std::net::Ipv6Addr;

use super::checksum::IPPROTO_TCP;
use super::tcp::extract_seq_from_tcp;

/// ICMPv6 header size (type, code, checksum, 4 bytes type-specific)
pub const ICMPV6_HEADER_SIZE: usize = 8;

/// IPv6 fixed header size
pub const IPV6_HEADER_LEN: usize = 40;

/// Smallest error that still quotes the probe's sequence number:
/// ICMPv6 header + quoted IPv6 header + first 8 bytes of the quoted TCP header
pub const MIN_ICMPV6_ERROR_LEN: usize = ICMPV6_HEADER_SIZE + IPV6_HEADER_LEN + 8;

// ICMPv6 type codes (RFC 4443)
const ICMPV6_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_TIME_EXCEEDED: u8 = 3;

const CODE_PORT_UNREACHABLE: u8 = 4;
const CODE_HOP_LIMIT_EXCEEDED: u8 = 0;

/// ICMPv6 errors the listener correlates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icmpv6ErrorKind {
    /// Type 3 code 0: hop limit exceeded in transit
    HopLimitExceeded,
    /// Type 1 code 4: port unreachable
    PortUnreachable,
}

/// Fields recovered from a quoted TCP probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotedProbe {
    pub kind: Icmpv6ErrorKind,
    /// Destination of the quoted IPv6 header
    pub original_dest: Ipv6Addr,
    pub src_port: u16,
    pub dst_port: u16,
    /// Sequence number of the quoted TCP header
    pub seq: u32,
}

/// Classify an ICMPv6 type/code pair
pub fn classify_icmpv6(icmp_type: u8, icmp_code: u8) -> Option<Icmpv6ErrorKind> {
    match (icmp_type, icmp_code) {
        (ICMPV6_TIME_EXCEEDED, CODE_HOP_LIMIT_EXCEEDED) => Some(Icmpv6ErrorKind::HopLimitExceeded),
        (ICMPV6_DEST_UNREACHABLE, CODE_PORT_UNREACHABLE) => Some(Icmpv6ErrorKind::PortUnreachable),
        _ => None,
    }
}

/// Parse an ICMPv6 error quoting one of our TCP probes.
///
/// Returns None for other ICMPv6 messages, truncated errors, and errors
/// quoting anything but TCP.
pub fn parse_icmpv6_tcp_error(icmp_data: &[u8]) -> Option<QuotedProbe> {
    if icmp_data.len() < MIN_ICMPV6_ERROR_LEN {
        return None;
    }

    let icmp = Icmpv6Packet::new(icmp_data)?;
    let kind = classify_icmpv6(icmp.get_icmpv6_type().0, icmp.get_icmpv6_code().0)?;

    let quoted = &icmp_data[ICMPV6_HEADER_SIZE..];
    let ipv6 = Ipv6Packet::new(quoted)?;
    if ipv6.get_version() != 6 || ipv6.get_next_header().0 != IPPROTO_TCP {
        return None;
    }

    // Slice past the fixed header ourselves: the quoted payload length
    // describes the original packet, not the truncated quote.
    let tcp = &quoted[IPV6_HEADER_LEN..];
    let seq = extract_seq_from_tcp(tcp)?;

    Some(QuotedProbe {
        kind,
        original_dest: ipv6.get_destination(),
        src_port: u16::from_be_bytes([tcp[0], tcp[1]]),
        dst_port: u16::from_be_bytes([tcp[2], tcp[3]]),
        seq,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::probe::tcp::build_tcp6_syn;

    /// Build an ICMPv6 error quoting `tcp` as sent from `src` to `dst`
    pub(crate) fn build_icmpv6_error(
        icmp_type: u8,
        icmp_code: u8,
        src: Ipv6Addr,
        dst: Ipv6Addr,
        tcp: &[u8],
    ) -> Vec<u8> {
        let mut packet = vec![0u8; ICMPV6_HEADER_SIZE + IPV6_HEADER_LEN];
        packet[0] = icmp_type;
        packet[1] = icmp_code;
        // ICMPv6 checksum is verified by the kernel; leave zero

        let ip = &mut packet[ICMPV6_HEADER_SIZE..];
        ip[0] = 0x60; // version 6
        ip[4..6].copy_from_slice(&(tcp.len() as u16).to_be_bytes());
        ip[6] = IPPROTO_TCP;
        ip[7] = 1; // hop limit as it expired
        ip[8..24].copy_from_slice(&src.octets());
        ip[24..40].copy_from_slice(&dst.octets());

        packet.extend_from_slice(tcp);
        packet
    }

    fn addrs() -> (Ipv6Addr, Ipv6Addr) {
        ("2001:db8::1".parse().unwrap(), "2001:db8::99".parse().unwrap())
    }

    #[test]
    fn test_parse_port_unreachable() {
        let (src, dst) = addrs();
        let probe = build_tcp6_syn(src, dst, 1234, 80, 7, 2000);
        let data = build_icmpv6_error(1, 4, src, dst, &probe.payload);

        let quoted = parse_icmpv6_tcp_error(&data).unwrap();
        assert_eq!(quoted.kind, Icmpv6ErrorKind::PortUnreachable);
        assert_eq!(quoted.original_dest, dst);
        assert_eq!(quoted.seq, 2000);
        assert_eq!(quoted.src_port, 1234);
        assert_eq!(quoted.dst_port, 80);
    }

    #[test]
    fn test_parse_hop_limit_exceeded_truncated_quote() {
        // Routers may quote only the first 8 bytes of the TCP header
        let (src, dst) = addrs();
        let probe = build_tcp6_syn(src, dst, 1234, 80, 2, 1004);
        let data = build_icmpv6_error(3, 0, src, dst, &probe.payload[..8]);
        assert_eq!(data.len(), MIN_ICMPV6_ERROR_LEN);

        let quoted = parse_icmpv6_tcp_error(&data).unwrap();
        assert_eq!(quoted.kind, Icmpv6ErrorKind::HopLimitExceeded);
        assert_eq!(quoted.seq, 1004);
    }

    #[test]
    fn test_too_short_rejected() {
        let (src, dst) = addrs();
        let probe = build_tcp6_syn(src, dst, 1234, 80, 2, 1004);
        let data = build_icmpv6_error(3, 0, src, dst, &probe.payload[..4]);
        assert!(parse_icmpv6_tcp_error(&data).is_none());
    }

    #[test]
    fn test_other_types_rejected() {
        let (src, dst) = addrs();
        let probe = build_tcp6_syn(src, dst, 1234, 80, 2, 1004);

        // Fragment reassembly time exceeded, admin prohibited, echo reply
        for (t, c) in [(3, 1), (1, 1), (129, 0), (2, 0)] {
            let data = build_icmpv6_error(t, c, src, dst, &probe.payload);
            assert!(parse_icmpv6_tcp_error(&data).is_none(), "type {} code {}", t, c);
        }
    }

    #[test]
    fn test_non_tcp_quote_rejected() {
        let (src, dst) = addrs();
        let mut data = build_icmpv6_error(3, 0, src, dst, &[0u8; 20]);
        data[ICMPV6_HEADER_SIZE + 6] = 17; // UDP
        assert!(parse_icmpv6_tcp_error(&data).is_none());
    }
}
