//! Probe correlation over a shared raw socket.

use super::packet::{parse_datagram, EchoRequest, Inbound};
use super::socket::{EchoSocket, RawIcmpSocket};
use super::IcmpError;
use crate::measurement::Measurements;
use crate::types::CheckResult;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

const PAYLOAD: &[u8] = b"vigil pinger";
const RECV_BUFFER: usize = 1500;

/// How a probe was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Reply,
    Unreachable,
}

/// Delivered to a waiting probe by the receive loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub source: Ipv4Addr,
    pub kind: ReplyKind,
}

type ActiveMap = HashMap<u16, mpsc::Sender<EchoReply>>;

/// Shared ICMP echo engine
pub struct IcmpEngine {
    socket: Arc<dyn EchoSocket>,
    active: RwLock<ActiveMap>,
    payload: Bytes,
}

impl fmt::Debug for IcmpEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcmpEngine")
            .field("active", &self.active_count())
            .finish()
    }
}

/// Removes a probe's identifier from the active map when dropped
struct ActiveGuard<'a> {
    engine: &'a IcmpEngine,
    id: u16,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.engine
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl IcmpEngine {
    /// Open the raw socket and start the receive loop.
    ///
    /// A permission error is reported with the command that grants the
    /// capability.
    pub fn open() -> Result<Arc<Self>, IcmpError> {
        let socket = RawIcmpSocket::open().map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => IcmpError::PermissionDenied {
                binary: std::env::args().next().unwrap_or_else(|| "vigil-server".to_string()),
            },
            _ => IcmpError::Io(e),
        })?;

        let engine = Self::start(Arc::new(socket))?;
        info!("ICMP engine started");
        Ok(engine)
    }

    /// Start the receive loop over an already opened socket.
    ///
    /// The loop exits once the last reference to the engine is dropped.
    pub fn start(socket: Arc<dyn EchoSocket>) -> Result<Arc<Self>, IcmpError> {
        let engine = Arc::new(Self {
            socket: socket.clone(),
            active: RwLock::new(HashMap::new()),
            payload: Bytes::from_static(PAYLOAD),
        });

        let weak = Arc::downgrade(&engine);
        thread::Builder::new()
            .name("icmp-receive".to_string())
            .spawn(move || receive_loop(weak, socket))?;

        Ok(engine)
    }

    /// Number of probes currently waiting for a reply
    pub fn active_count(&self) -> usize {
        self.active.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Route one received datagram to its probe. Returns whether a probe took it.
    pub fn dispatch_datagram(&self, data: &[u8], source: Ipv4Addr) -> bool {
        let inbound = match parse_datagram(data) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => return false,
            Err(e) => {
                trace!(%source, error = %e, "Ignoring ICMP datagram");
                return false;
            }
        };

        let kind = match inbound {
            Inbound::Reply { .. } => ReplyKind::Reply,
            Inbound::Unreachable { .. } => ReplyKind::Unreachable,
        };

        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        match active.get(&inbound.id()) {
            Some(tx) => tx.try_send(EchoReply { source, kind }).is_ok(),
            None => {
                trace!(%source, id = inbound.id(), "No probe waiting for ICMP message");
                false
            }
        }
    }

    /// Claim a free identifier, starting from a random one
    fn register(&self) -> Option<(ActiveGuard<'_>, mpsc::Receiver<EchoReply>)> {
        let (tx, rx) = mpsc::channel(1);
        let start: u16 = rand::random();

        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        let id = (0..=u16::MAX)
            .map(|offset| start.wrapping_add(offset))
            .find(|id| !active.contains_key(id))?;
        active.insert(id, tx);

        Some((ActiveGuard { engine: self, id }, rx))
    }

    /// Send one echo request to `target` and wait up to `timeout` for the answer
    pub async fn ping(&self, target: &str, timeout: Duration) -> CheckResult {
        let start = Instant::now();
        let elapsed = || Measurements::new().with("time", start.elapsed());

        let addr = match resolve_ipv4(target).await {
            Ok(addr) => addr,
            Err(text) => return CheckResult::failed(text),
        };

        let Some((probe, mut rx)) = self.register() else {
            return CheckResult::failed("no free ICMP identifier");
        };

        let request = EchoRequest::new(probe.id, rand::random(), self.payload.clone());
        let bytes = request.to_bytes();

        match self.socket.send_to(&bytes, addr) {
            Ok(n) if n == bytes.len() => {}
            Ok(n) => {
                return CheckResult::failed(format!("sent {} bytes; wanted {}", n, bytes.len()));
            }
            Err(e) => return CheckResult::failed(e.to_string()),
        }

        debug!(target, %addr, id = probe.id, seq = request.seq, "Sent echo request");

        match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_) => CheckResult::failed(format!("timeout [{}]", target)).with_measurements(elapsed()),
            Ok(Some(EchoReply {
                source,
                kind: ReplyKind::Reply,
            })) => CheckResult::ok(format!("reply from {} [{}]", source, target))
                .with_measurements(elapsed()),
            Ok(Some(EchoReply {
                source,
                kind: ReplyKind::Unreachable,
            })) => CheckResult::failed(format!("unreachable from {} [{}]", source, target))
                .with_measurements(elapsed()),
            Ok(None) => CheckResult::failed("ICMP engine stopped"),
        }
    }
}

async fn resolve_ipv4(target: &str) -> Result<Ipv4Addr, String> {
    if let Ok(addr) = target.parse::<Ipv4Addr>() {
        return Ok(addr);
    }

    let addrs = tokio::net::lookup_host((target, 0))
        .await
        .map_err(|e| e.to_string())?;

    addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| format!("no IPv4 address for {}", target))
}

fn receive_loop(engine: Weak<IcmpEngine>, socket: Arc<dyn EchoSocket>) {
    let mut buf = [0u8; RECV_BUFFER];

    loop {
        let result = socket.recv_from(&mut buf);

        let Some(engine) = engine.upgrade() else {
            debug!("ICMP engine dropped, receive loop exiting");
            return;
        };

        match result {
            Ok((len, source)) => {
                engine.dispatch_datagram(&buf[..len], source);
            }
            Err(e) if is_idle(&e) => {}
            Err(e) => {
                warn!(error = %e, "ICMP receive failed");
                thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}
