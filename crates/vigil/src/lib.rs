//! Check library for the vigil monitoring daemon.
//!
//! A check is an [`Agent`](checkers::Agent) run against a host reached
//! through a [`Transport`](transport::Transport). Both are plugins resolved
//! by identifier through the [`Registry`](registry::Registry), which also
//! describes each plugin's parameters for front ends. A [`Job`](job::Job)
//! binds an agent to its arguments and timeout and times every run.
//!
//! Built-in agents:
//! - `dns`: name resolution through the system resolver
//! - `http`: GET request, reports the status code
//! - `icmp4`: ICMPv4 echo through the shared [`icmp`] engine
//! - `load`: `/proc/loadavg` read through the transport
//! - `pidof`: process lookup through the transport
//! - `ssh-command`: remote command, reports its output
//! - `noop`: does nothing, also usable as a transport
//!
//! # Example
//!
//! ```no_run
//! use vigil::job::Job;
//! use vigil::plugins::{builtin, PluginContext};
//! use vigil::registry::Registry;
//! use vigil::transport::LocalTransport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::from_registrations(builtin(PluginContext::default()))?;
//!
//! let job = Job::decode(
//!     &registry,
//!     r#"{"agentId": "pidof", "timeout": "2s", "arguments": {"processName": "sshd"}}"#,
//! )?;
//!
//! let result = job.run(&LocalTransport::default()).await;
//! println!("{} {} ({:?})", result.status, result.text, result.duration);
//! # Ok(())
//! # }
//! ```

pub mod checkers;
pub mod icmp;
pub mod job;
pub mod measurement;
pub mod plugins;
pub mod registry;
pub mod transport;
pub mod types;

pub use checkers::Agent;
pub use job::{Job, JobDocument, JobError};
pub use measurement::Measurements;
pub use registry::{Capability, Registry, RegistryError};
pub use transport::Transport;
pub use types::{CheckResult, Request, Status};
