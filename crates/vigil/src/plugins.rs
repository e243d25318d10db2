//! The built-in plugin list handed to the registry at startup.

use crate::checkers::{Dns, Http, IcmpPing, Load, NoopPlugin, PidOf, SshCommand};
use crate::icmp::IcmpEngine;
use crate::registry::{Capabilities, Describe, Plugin, Registration};
use crate::transport::{LocalTransport, SshOptions, SshTransport};
use std::sync::Arc;

/// Identifier of the transport used when a host names none
pub const DEFAULT_TRANSPORT: &str = "localtransport";

/// Shared resources injected into plugins that need them
#[derive(Debug, Clone, Default)]
pub struct PluginContext {
    /// Running ICMP engine. Without one, `icmp4` is not registered.
    pub icmp: Option<Arc<IcmpEngine>>,
    pub ssh: SshOptions,
}

/// Every plugin shipped with vigil
pub fn builtin(context: PluginContext) -> Vec<Registration> {
    let mut registrations = vec![
        Registration::agent::<Dns>("dns"),
        Registration::agent::<Http>("http"),
        Registration::agent::<Load>("load"),
        Registration::agent::<PidOf>("pidof"),
        Registration::agent_and_transport::<NoopPlugin>("noop"),
        Registration::transport::<LocalTransport>(DEFAULT_TRANSPORT),
    ];

    let ssh = context.ssh.clone();
    registrations.push(Registration::new(
        "ssh",
        Capabilities::TRANSPORT,
        SshTransport::parameters,
        Arc::new(move |args| {
            let mut transport: SshTransport = serde_json::from_value(args)?;
            transport.options = ssh.clone();
            Ok(Plugin {
                agent: None,
                transport: Some(Arc::new(transport)),
            })
        }),
    ));

    let ssh = context.ssh;
    registrations.push(Registration::new(
        "ssh-command",
        Capabilities::AGENT,
        SshCommand::parameters,
        Arc::new(move |args| {
            let mut agent: SshCommand = serde_json::from_value(args)?;
            agent.options = ssh.clone();
            Ok(Plugin {
                agent: Some(Arc::new(agent)),
                transport: None,
            })
        }),
    ));

    if let Some(engine) = context.icmp {
        registrations.push(Registration::new(
            "icmp4",
            Capabilities::AGENT,
            IcmpPing::parameters,
            Arc::new(move |args| {
                let agent: IcmpPing = serde_json::from_value(args)?;
                Ok(Plugin {
                    agent: Some(Arc::new(agent.with_engine(engine.clone()))),
                    transport: None,
                })
            }),
        ));
    }

    registrations
}
