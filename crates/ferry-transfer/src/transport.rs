//! Datagram transport seam.
//!
//! The protocol loops only need connection-less send and a receive bounded by
//! a timeout. [`UdpTransport`] provides that over a real socket; the
//! [`crate::link`] simulator provides it in memory.

use std::cell::Cell;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::protocol::UDP_SOCKET_BUFFER;

/// Unreliable, unordered, possibly duplicating datagram transport.
pub trait Transport {
    /// Send one datagram to `peer`. Loss is not an error.
    fn send_to(&self, datagram: &[u8], peer: SocketAddr) -> io::Result<()>;

    /// Wait up to `timeout` for one datagram. `Ok(None)` means nothing arrived.
    fn recv_from(&self, buf: &mut [u8], timeout: Duration)
        -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send_to(&self, datagram: &[u8], peer: SocketAddr) -> io::Result<()> {
        (**self).send_to(datagram, peer)
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        (**self).recv_from(buf, timeout)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }
}

/// Send `copies` identical datagrams back to back.
pub fn send_copies<T: Transport + ?Sized>(
    transport: &T,
    datagram: &[u8],
    peer: SocketAddr,
    copies: u32,
) -> io::Result<()> {
    for _ in 0..copies {
        transport.send_to(datagram, peer)?;
    }
    Ok(())
}

/// [`Transport`] over a blocking `std::net::UdpSocket`.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    read_timeout: Cell<Option<Duration>>,
}

impl UdpTransport {
    /// Bind a socket to `addr` with enlarged OS buffers.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self::from_socket(create_udp_socket(addr)?))
    }

    /// Bind an ephemeral local port in the same address family as `peer`.
    pub fn for_peer(peer: SocketAddr) -> io::Result<Self> {
        let unspecified = match peer.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        Self::bind(SocketAddr::new(unspecified, 0))
    }

    /// Wrap a socket the caller already bound.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            read_timeout: Cell::new(None),
        }
    }

    pub fn into_inner(self) -> UdpSocket {
        self.socket
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, datagram: &[u8], peer: SocketAddr) -> io::Result<()> {
        // Retry on ENOBUFS / WSAENOBUFS: the send buffer is full, back off briefly.
        let mut retries = 0;
        loop {
            match self.socket.send_to(datagram, peer) {
                Ok(_) => return Ok(()),
                Err(ref e) if retries < 50 && is_buffer_full(e) => {
                    retries += 1;
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        if self.read_timeout.get() != Some(timeout) {
            self.socket.set_read_timeout(Some(timeout))?;
            self.read_timeout.set(Some(timeout));
        }
        match self.socket.recv_from(buf) {
            Ok((len, src)) => Ok(Some((len, src))),
            // Windows returns TimedOut, Unix returns WouldBlock
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            // Windows reports an ICMP port-unreachable from an earlier send here.
            Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

fn is_buffer_full(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == Some(10055) // WSAENOBUFS
        || e.raw_os_error() == Some(105) // ENOBUFS (Linux)
}

/// Create a blocking UDP socket bound to `addr` with large send/recv buffers.
pub fn create_udp_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(false)?;
    // Buffer sizes are hints; some platforms cap them.
    let _ = socket.set_recv_buffer_size(UDP_SOCKET_BUFFER);
    let _ = socket.set_send_buffer_size(UDP_SOCKET_BUFFER);
    socket.bind(&addr.into())?;

    Ok(socket.into())
}
