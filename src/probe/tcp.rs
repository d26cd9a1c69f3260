//! TCP SYN probe building and parsing for IPv6 traceroute
//!
//! Probes are bare TCP segments (the kernel adds the IPv6 header). The probe's
//! sequence number is the correlation key: routers quote it back inside ICMPv6
//! errors, and the destination acknowledges it (+1) in its SYN-ACK.

use std::net::Ipv6Addr;

use super::checksum::{internet_checksum, ipv6_pseudo_header};

/// Fixed TCP header size (no options)
pub const TCP_HEADER_SIZE: usize = 20;

/// Size of the fixed SYN options block
pub const TCP_OPTIONS_SIZE: usize = 20;

/// Total SYN probe size on the wire
pub const TCP_SYN_SIZE: usize = TCP_HEADER_SIZE + TCP_OPTIONS_SIZE;

/// Byte offset of the checksum field within the TCP header
pub const TCP_CHECKSUM_OFFSET: usize = 16;

/// TCP flags
pub const TCP_FLAG_SYN: u8 = 0x02;
pub const TCP_FLAG_ACK: u8 = 0x10;

/// Data offset of 10 words (20 header + 20 options) in the high nibble
const SYN_DATA_OFFSET: u8 = 0xA0;

/// Initial window advertised by the probe
const SYN_WINDOW: u16 = 64240;

/// Options block mirroring a typical Linux SYN:
/// MSS 1460, SACK permitted, timestamp, NOP, window scale 7
pub const SYN_OPTIONS: [u8; TCP_OPTIONS_SIZE] = [
    0x02, 0x04, 0x05, 0xb4, // MSS = 1460
    0x04, 0x02, // SACK permitted
    0x08, 0x0a, 0x7f, 0x73, 0xf9, 0x3a, 0x00, 0x00, 0x00, 0x00, // TSval, TSecr = 0
    0x01, // NOP
    0x03, 0x03, 0x07, // window scale = 7
];

/// Wire-format TCP header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    /// Data offset (high nibble, in 32-bit words) plus reserved bits
    pub data_offset: u8,
    pub flags: u8,
    pub window: u16,
    pub checksum: u16,
    pub urgent: u16,
}

impl TcpHeader {
    /// Serialize into the 20-byte big-endian layout
    pub fn encode(&self) -> [u8; TCP_HEADER_SIZE] {
        let mut buf = [0u8; TCP_HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        buf[4..8].copy_from_slice(&self.seq.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ack.to_be_bytes());
        buf[12] = self.data_offset;
        buf[13] = self.flags;
        buf[14..16].copy_from_slice(&self.window.to_be_bytes());
        buf[16..18].copy_from_slice(&self.checksum.to_be_bytes());
        buf[18..20].copy_from_slice(&self.urgent.to_be_bytes());
        buf
    }

    /// Parse the fixed header from the start of `data`. Options are not decoded.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < TCP_HEADER_SIZE {
            return None;
        }
        Some(Self {
            src_port: u16::from_be_bytes([data[0], data[1]]),
            dst_port: u16::from_be_bytes([data[2], data[3]]),
            seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            data_offset: data[12],
            flags: data[13],
            window: u16::from_be_bytes([data[14], data[15]]),
            checksum: u16::from_be_bytes([data[16], data[17]]),
            urgent: u16::from_be_bytes([data[18], data[19]]),
        })
    }

    /// Header length in bytes as announced by the data offset nibble
    pub fn header_len(&self) -> usize {
        ((self.data_offset >> 4) as usize) * 4
    }

    pub fn is_syn_ack(&self) -> bool {
        self.flags == TCP_FLAG_SYN | TCP_FLAG_ACK
    }
}

/// An outbound probe: the TCP segment plus the hop limit to send it with.
///
/// The hop limit is an IP-layer field, so it travels next to the payload and
/// is applied per send via ancillary data rather than written into the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePacket {
    pub hop_limit: u8,
    pub payload: Vec<u8>,
}

/// Build a checksummed TCP SYN probe for the given ports, hop limit and sequence
pub fn build_tcp6_syn(
    src_ip: Ipv6Addr,
    dst_ip: Ipv6Addr,
    src_port: u16,
    dst_port: u16,
    ttl: u8,
    seq: u32,
) -> ProbePacket {
    let mut header = TcpHeader {
        src_port,
        dst_port,
        seq,
        ack: 0,
        data_offset: SYN_DATA_OFFSET,
        flags: TCP_FLAG_SYN,
        window: SYN_WINDOW,
        checksum: 0,
        urgent: 0,
    };

    // Checksum input: pseudo-header || header (checksum zeroed) || options
    let pseudo = ipv6_pseudo_header(src_ip, dst_ip, TCP_SYN_SIZE as u32);
    let mut scratch = Vec::with_capacity(pseudo.len() + TCP_SYN_SIZE);
    scratch.extend_from_slice(&pseudo);
    scratch.extend_from_slice(&header.encode());
    scratch.extend_from_slice(&SYN_OPTIONS);
    header.checksum = internet_checksum(&scratch);

    let mut payload = Vec::with_capacity(TCP_SYN_SIZE);
    payload.extend_from_slice(&header.encode());
    payload.extend_from_slice(&SYN_OPTIONS);

    ProbePacket {
        hop_limit: ttl,
        payload,
    }
}

/// Extract the sequence number from a (possibly truncated) quoted TCP header.
/// Only the first 8 bytes are needed, which RFC 4443 errors always carry.
pub fn extract_seq_from_tcp(tcp_header: &[u8]) -> Option<u32> {
    if tcp_header.len() < 8 {
        return None;
    }
    Some(u32::from_be_bytes([
        tcp_header[4],
        tcp_header[5],
        tcp_header[6],
        tcp_header[7],
    ]))
}
