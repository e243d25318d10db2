//! ICMPv4 echo engine.
//!
//! One raw socket is shared by every probe. A single receive thread reads
//! replies and destination-unreachable messages and routes them, by echo
//! identifier, to the probe waiting for them.

pub mod engine;
pub mod packet;
pub mod socket;

pub use engine::{EchoReply, IcmpEngine, ReplyKind};
pub use packet::{EchoRequest, Inbound, PacketError};
pub use socket::{EchoSocket, RawIcmpSocket};

use std::io;
use thiserror::Error;

/// ICMP engine errors
#[derive(Debug, Error)]
pub enum IcmpError {
    #[error("opening a raw ICMP socket was denied. Please run:\nsudo setcap cap_net_raw=ep {binary}")]
    PermissionDenied { binary: String },

    #[error("ICMP socket error: {0}")]
    Io(#[from] io::Error),
}
