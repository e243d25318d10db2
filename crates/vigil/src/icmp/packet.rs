//! ICMPv4 echo and destination-unreachable packets.
//!
//! RFC 792 echo message:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |     Code      |          Checksum             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Identifier          |        Sequence Number        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Data ...
//! +-+-+-+-+-
//! ```
//!
//! Destination unreachable carries 4 unused bytes followed by the IP header
//! and first 8 bytes of the datagram that could not be delivered, which for
//! an echo request is enough to recover its identifier.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const ECHO_REPLY: u8 = 0;
pub const DESTINATION_UNREACHABLE: u8 = 3;
pub const ECHO_REQUEST: u8 = 8;

const ICMP_HEADER_LEN: usize = 8;
const IPV4_MIN_HEADER_LEN: usize = 20;
const PROTOCOL_ICMP: u8 = 1;

/// Packet decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("packet too short")]
    Truncated,

    #[error("not an IPv4 packet")]
    NotIpv4,

    #[error("invalid IPv4 header length")]
    BadHeaderLength,

    #[error("embedded datagram is not ICMP")]
    NotIcmp,
}

/// An outgoing echo request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoRequest {
    pub id: u16,
    pub seq: u16,
    pub payload: Bytes,
}

impl EchoRequest {
    pub fn new(id: u16, seq: u16, payload: Bytes) -> Self {
        Self { id, seq, payload }
    }

    /// Serialize with the checksum filled in
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ICMP_HEADER_LEN + self.payload.len());
        buf.put_u8(ECHO_REQUEST);
        buf.put_u8(0);
        buf.put_u16(0);
        buf.put_u16(self.id);
        buf.put_u16(self.seq);
        buf.put_slice(&self.payload);

        let sum = checksum(&buf);
        buf[2..4].copy_from_slice(&sum.to_be_bytes());
        buf.freeze()
    }
}

/// Internet checksum (RFC 1071)
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// A received message that belongs to some echo probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Reply { id: u16, seq: u16 },
    Unreachable { id: u16, seq: u16, code: u8 },
}

impl Inbound {
    pub fn id(&self) -> u16 {
        match self {
            Inbound::Reply { id, .. } | Inbound::Unreachable { id, .. } => *id,
        }
    }
}

/// Skip the IPv4 header and return the payload
fn strip_ipv4(data: &[u8]) -> Result<(&[u8], u8), PacketError> {
    if data.len() < IPV4_MIN_HEADER_LEN {
        return Err(PacketError::Truncated);
    }
    if data[0] >> 4 != 4 {
        return Err(PacketError::NotIpv4);
    }

    let header_len = usize::from(data[0] & 0x0f) * 4;
    if header_len < IPV4_MIN_HEADER_LEN {
        return Err(PacketError::BadHeaderLength);
    }
    if data.len() < header_len {
        return Err(PacketError::Truncated);
    }

    Ok((&data[header_len..], data[9]))
}

fn id_seq(icmp: &[u8]) -> (u16, u16) {
    (
        u16::from_be_bytes([icmp[4], icmp[5]]),
        u16::from_be_bytes([icmp[6], icmp[7]]),
    )
}

/// Classify a datagram read from a raw ICMPv4 socket, IP header included.
///
/// Returns `Ok(None)` for well-formed ICMP messages that are not replies to
/// an echo request (including our own outgoing requests on loopback).
pub fn parse_datagram(data: &[u8]) -> Result<Option<Inbound>, PacketError> {
    let (icmp, _) = strip_ipv4(data)?;
    if icmp.len() < ICMP_HEADER_LEN {
        return Err(PacketError::Truncated);
    }

    match icmp[0] {
        ECHO_REPLY => {
            let (id, seq) = id_seq(icmp);
            Ok(Some(Inbound::Reply { id, seq }))
        }
        DESTINATION_UNREACHABLE => {
            let (original, protocol) = strip_ipv4(&icmp[ICMP_HEADER_LEN..])?;
            if protocol != PROTOCOL_ICMP {
                return Err(PacketError::NotIcmp);
            }
            if original.len() < ICMP_HEADER_LEN {
                return Err(PacketError::Truncated);
            }
            if original[0] != ECHO_REQUEST {
                return Ok(None);
            }

            let (id, seq) = id_seq(original);
            Ok(Some(Inbound::Unreachable { id, seq, code: icmp[1] }))
        }
        _ => Ok(None),
    }
}

/// Wrap an ICMP message in a minimal IPv4 header, as a raw socket delivers it
#[cfg(test)]
pub(crate) fn ipv4_wrap(src: std::net::Ipv4Addr, dst: std::net::Ipv4Addr, icmp: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(IPV4_MIN_HEADER_LEN + icmp.len());
    buf.put_u8(0x45);
    buf.put_u8(0);
    buf.put_u16((IPV4_MIN_HEADER_LEN + icmp.len()) as u16);
    buf.put_u32(0);
    buf.put_u8(64);
    buf.put_u8(PROTOCOL_ICMP);
    buf.put_u16(0);
    buf.put_slice(&src.octets());
    buf.put_slice(&dst.octets());
    buf.put_slice(icmp);
    buf.to_vec()
}

/// Build an echo reply for a serialized request
#[cfg(test)]
pub(crate) fn reply_to(request: &[u8]) -> Vec<u8> {
    let mut reply = request.to_vec();
    reply[0] = ECHO_REPLY;
    reply[2] = 0;
    reply[3] = 0;
    let sum = checksum(&reply);
    reply[2..4].copy_from_slice(&sum.to_be_bytes());
    reply
}

/// Build a destination-unreachable message quoting a serialized request
#[cfg(test)]
pub(crate) fn unreachable_for(
    request: &[u8],
    sender: std::net::Ipv4Addr,
    target: std::net::Ipv4Addr,
) -> Vec<u8> {
    let original = ipv4_wrap(sender, target, request);

    let mut msg = BytesMut::new();
    msg.put_u8(DESTINATION_UNREACHABLE);
    msg.put_u8(1);
    msg.put_u16(0);
    msg.put_u32(0);
    msg.put_slice(&original[..IPV4_MIN_HEADER_LEN + ICMP_HEADER_LEN]);

    let sum = checksum(&msg);
    msg[2..4].copy_from_slice(&sum.to_be_bytes());
    msg.to_vec()
}
