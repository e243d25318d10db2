//! Agent implementations.
//!
//! An agent performs one check against a host, reaching it through the
//! transport it is handed. Probe failures are never errors: every outcome,
//! including timeouts and unreachable targets, is reported as a
//! [`CheckResult`] with descriptive text.

mod dns;
mod http;
mod icmp_ping;
mod load;
mod noop;
mod pidof;
mod ssh_command;

pub use dns::Dns;
pub use http::Http;
pub use icmp_ping::IcmpPing;
pub use load::Load;
pub use noop::NoopPlugin;
pub use pidof::PidOf;
pub use ssh_command::SshCommand;

use crate::transport::Transport;
use crate::types::{CheckResult, Request};
use async_trait::async_trait;

/// A check implementation
#[async_trait]
pub trait Agent: Send + Sync {
    /// Run the check once
    async fn run(&self, transport: &dyn Transport, request: &Request) -> CheckResult;
}
