use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6};
use std::time::Duration;

use super::tcp::{ProbePacket, TCP_CHECKSUM_OFFSET};
use crate::error::TraceError;

/// Read timeout used by listeners to poll for shutdown between datagrams
pub const RECV_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Something a probe can be transmitted through
pub trait ProbeSink {
    /// Send one probe to `dest`, applying its hop limit to this send only
    fn send_probe(&self, packet: &ProbePacket, dest: Ipv6Addr) -> io::Result<usize>;
}

/// Something datagrams can be read from
pub trait DatagramSource {
    /// Read one datagram, returning its length and the sender's address
    fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)>;
}

impl ProbeSink for Socket {
    fn send_probe(&self, packet: &ProbePacket, dest: Ipv6Addr) -> io::Result<usize> {
        send_with_hop_limit(self, &packet.payload, packet.hop_limit, dest)
    }
}

impl DatagramSource for Socket {
    fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)> {
        // SAFETY: recv_from only writes initialized bytes into the buffer,
        // and u8 and MaybeUninit<u8> share a layout.
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
        let (len, addr) = self.recv_from(uninit)?;
        let source = addr
            .as_socket()
            .map(|s| s.ip())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non-IP source address"))?;
        Ok((len, source))
    }
}

/// Create a raw IPv6 socket for `protocol`, bound to the source address
fn create_raw_socket(
    protocol: Protocol,
    kind: &'static str,
    src_ip: Ipv6Addr,
) -> Result<Socket, TraceError> {
    // Requires root/CAP_NET_RAW
    let socket = Socket::new(Domain::IPV6, Type::RAW, Some(protocol))
        .map_err(|e| TraceError::from_create(kind, e))?;

    let addr = SockAddr::from(SocketAddrV6::new(src_ip, 0, 0, 0));
    socket.bind(&addr).map_err(|source| TraceError::Bind {
        kind,
        addr: src_ip,
        source,
    })?;

    Ok(socket)
}

/// Create the raw TCP socket probes are sent through
pub fn create_tcp_send_socket(src_ip: Ipv6Addr) -> Result<Socket, TraceError> {
    let socket = create_raw_socket(Protocol::TCP, "TCP", src_ip)?;
    socket
        .set_nonblocking(false)
        .map_err(|e| TraceError::from_create("TCP", e))?;
    Ok(socket)
}

/// Create a raw socket for a listener, with a short read timeout for polling
pub fn create_recv_socket(
    protocol: Protocol,
    kind: &'static str,
    src_ip: Ipv6Addr,
) -> Result<Socket, TraceError> {
    let socket = create_raw_socket(protocol, kind, src_ip)?;
    socket
        .set_read_timeout(Some(RECV_POLL_INTERVAL))
        .map_err(|e| TraceError::from_create(kind, e))?;
    if let Err(e) = socket.set_recv_buffer_size(1024 * 1024) {
        tracing::debug!("Could not set {} receive buffer to 1MB: {}", kind, e);
    }
    Ok(socket)
}

/// Create the raw ICMPv6 socket the ICMP listener reads from
pub fn create_icmpv6_recv_socket(src_ip: Ipv6Addr) -> Result<Socket, TraceError> {
    create_recv_socket(Protocol::ICMPV6, "ICMPv6", src_ip)
}

/// Create the raw TCP socket the TCP listener reads from
pub fn create_tcp_recv_socket(src_ip: Ipv6Addr) -> Result<Socket, TraceError> {
    create_recv_socket(Protocol::TCP, "TCP", src_ip)
}

/// Ask the kernel to compute the TCP checksum of outgoing segments (IPV6_CHECKSUM)
#[cfg(unix)]
pub fn enable_kernel_checksum(socket: &Socket) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let offset: libc::c_int = TCP_CHECKSUM_OFFSET as libc::c_int;
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IPV6,
            libc::IPV6_CHECKSUM,
            &offset as *const _ as *const libc::c_void,
            std::mem::size_of_val(&offset) as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Send `payload` to `dest` with an IPV6_HOPLIMIT control message.
///
/// The hop limit applies to this datagram only; the socket default is untouched.
#[cfg(unix)]
pub fn send_with_hop_limit(
    socket: &Socket,
    payload: &[u8],
    hop_limit: u8,
    dest: Ipv6Addr,
) -> io::Result<usize> {
    use std::os::unix::io::AsRawFd;

    let addr = SockAddr::from(SocketAddrV6::new(dest, 0, 0, 0));

    let mut iov = libc::iovec {
        iov_base: payload.as_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };

    // u64 backing keeps the control buffer aligned for cmsghdr
    let mut cmsg_buf = [0u64; 8];
    let hop_limit = hop_limit as libc::c_int;

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_name = addr.as_ptr() as *mut libc::c_void;
    msg.msg_namelen = addr.len();
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;

    unsafe {
        let space = libc::CMSG_SPACE(std::mem::size_of::<libc::c_int>() as u32);
        // msg_controllen type differs: usize on Linux, u32 on macOS
        msg.msg_controllen = space as _;

        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        if cmsg.is_null() {
            return Err(io::Error::other("control buffer too small"));
        }
        (*cmsg).cmsg_level = libc::IPPROTO_IPV6;
        (*cmsg).cmsg_type = libc::IPV6_HOPLIMIT;
        (*cmsg).cmsg_len = libc::CMSG_LEN(std::mem::size_of::<libc::c_int>() as u32) as _;
        std::ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut libc::c_int, hop_limit);
    }

    let sent = unsafe { libc::sendmsg(socket.as_raw_fd(), &msg, 0) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sent as usize)
}

/// Get the local IPv6 address the kernel would route `target` from.
/// Uses the UDP connect trick: no packet is sent.
pub fn get_local_addr(target: Ipv6Addr) -> Option<Ipv6Addr> {
    use std::net::UdpSocket;

    let socket = UdpSocket::bind("[::]:0").ok()?;
    socket.connect(SocketAddr::new(IpAddr::V6(target), 80)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V6(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}
