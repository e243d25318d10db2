//! Raw ICMPv4 socket handling.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// How long a receive may block before the loop checks for shutdown
pub const READ_TIMEOUT: Duration = Duration::from_millis(250);

/// A datagram socket carrying ICMPv4 messages.
///
/// Safe for concurrent senders. Received datagrams include the IPv4 header.
pub trait EchoSocket: Send + Sync {
    fn send_to(&self, packet: &[u8], target: Ipv4Addr) -> io::Result<usize>;

    /// Blocking receive. Implementations return `WouldBlock` or `TimedOut`
    /// periodically so the caller can stop.
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)>;
}

/// Raw ICMPv4 socket, requires `CAP_NET_RAW`
#[derive(Debug)]
pub struct RawIcmpSocket {
    socket: Socket,
}

impl RawIcmpSocket {
    pub fn open() -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;

        Ok(Self { socket })
    }
}

impl EchoSocket for RawIcmpSocket {
    fn send_to(&self, packet: &[u8], target: Ipv4Addr) -> io::Result<usize> {
        let addr = SocketAddr::from((target, 0));
        self.socket.send_to(packet, &addr.into())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)> {
        // SAFETY: an initialized buffer is valid as MaybeUninit and recv only
        // ever writes initialized bytes into it.
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };

        let (len, addr) = self.socket.recv_from(uninit)?;

        match addr.as_socket_ipv4() {
            Some(addr) => Ok((len, *addr.ip())),
            None => Err(io::Error::new(ErrorKind::InvalidData, "non-IPv4 source address")),
        }
    }
}
