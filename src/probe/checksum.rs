//! Internet checksum (RFC 1071) and the IPv6 pseudo-header (RFC 2460 §8.1)
//! used for the TCP checksum of outgoing probes.

use std::net::Ipv6Addr;

/// TCP protocol number (IPv6 next header)
pub const IPPROTO_TCP: u8 = 6;

/// Pseudo-header length: src (16) + dst (16) + upper-layer length (4) + zero (3) + next header (1)
pub const IPV6_PSEUDO_HEADER_LEN: usize = 40;

/// Compute the 16-bit one's complement Internet checksum.
///
/// Words are summed big-endian with end-around carry, then complemented.
/// An odd trailing byte is treated as the high byte of a zero-padded word.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    // Fold 32-bit sum to 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Build the IPv6 pseudo-header for an upper-layer segment of `upper_len` bytes
pub fn ipv6_pseudo_header(
    src: Ipv6Addr,
    dst: Ipv6Addr,
    upper_len: u32,
) -> [u8; IPV6_PSEUDO_HEADER_LEN] {
    let mut header = [0u8; IPV6_PSEUDO_HEADER_LEN];
    header[0..16].copy_from_slice(&src.octets());
    header[16..32].copy_from_slice(&dst.octets());
    header[32..36].copy_from_slice(&upper_len.to_be_bytes());
    // bytes 36..39 stay zero
    header[39] = IPPROTO_TCP;
    header
}

/// TCP checksum of `segment` (checksum field zeroed) over the IPv6 pseudo-header
pub fn tcp6_checksum(src: Ipv6Addr, dst: Ipv6Addr, segment: &[u8]) -> u16 {
    let pseudo = ipv6_pseudo_header(src, dst, segment.len() as u32);
    let mut buf = Vec::with_capacity(pseudo.len() + segment.len());
    buf.extend_from_slice(&pseudo);
    buf.extend_from_slice(segment);
    internet_checksum(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1071_example() {
        // RFC 1071 §3 example: sum of these words is 0xddf2, checksum is its complement
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2u16);
    }

    #[test]
    fn test_all_zero_input() {
        assert_eq!(internet_checksum(&[0u8; 20]), 0xFFFF);
        assert_eq!(internet_checksum(&[]), 0xFFFF);
    }

    #[test]
    fn test_end_around_carry() {
        // 0xFFFF + 0x0001 = 0x10000 -> folds to 0x0001 -> complement 0xFFFE
        assert_eq!(internet_checksum(&[0xFF, 0xFF, 0x00, 0x01]), 0xFFFE);
    }

    #[test]
    fn test_odd_length_pads_low_byte() {
        assert_eq!(internet_checksum(&[0x12]), internet_checksum(&[0x12, 0x00]));
    }

    #[test]
    fn test_self_verification() {
        // Placing the checksum into a zeroed field makes the whole buffer sum to zero
        let inputs: [&[u8]; 4] = [
            &[0x45, 0x00, 0x00, 0x3c, 0x1c, 0x46, 0x40, 0x00, 0x00, 0x00],
            &[0xde, 0xad, 0xbe, 0xef, 0x00, 0x00],
            &[0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0xff, 0xff],
            &[0x00, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
        ];
        for input in inputs {
            let mut buf = input.to_vec();
            // Checksum slot: last two bytes for the first three vectors, first two for the last
            let slot = if buf[0] == 0 && buf[1] == 0 { 0 } else { buf.len() - 2 };
            buf[slot] = 0;
            buf[slot + 1] = 0;
            let cksum = internet_checksum(&buf);
            buf[slot..slot + 2].copy_from_slice(&cksum.to_be_bytes());
            assert_eq!(internet_checksum(&buf), 0, "input {:02x?}", input);
        }
    }

    #[test]
    fn test_pseudo_header_layout() {
        let src: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let dst: Ipv6Addr = "2001:db8::2".parse().unwrap();
        let header = ipv6_pseudo_header(src, dst, 40);

        assert_eq!(&header[0..16], &src.octets());
        assert_eq!(&header[16..32], &dst.octets());
        assert_eq!(&header[32..36], &[0, 0, 0, 40]);
        assert_eq!(&header[36..39], &[0, 0, 0]);
        assert_eq!(header[39], IPPROTO_TCP);
    }
}
