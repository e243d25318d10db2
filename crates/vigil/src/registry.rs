//! Capability registry: plugin identifiers mapped to constructors.
//!
//! Plugins are registered from an explicit startup list. Each registration
//! declares which capabilities (agent, transport) its product satisfies and
//! how to describe its editable parameters, so callers can enumerate check
//! types without a hand-maintained schema.

use crate::checkers::Agent;
use crate::transport::Transport;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate plugin id '{0}'")]
    Duplicate(String),

    #[error("unknown plugin id '{0}'")]
    Unknown(String),

    #[error("plugin '{id}' does not provide the {capability} capability")]
    Lacks { id: String, capability: Capability },

    #[error("invalid arguments for '{id}': {source}")]
    InvalidArguments {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A single editable parameter of a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: String,

    pub description: String,

    #[serde(rename = "enumValues")]
    pub enum_values: Vec<String>,
}

impl Parameter {
    pub fn new(name: &str, kind: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            description: description.to_string(),
            enum_values: Vec::new(),
        }
    }

    /// A parameter restricted to a comma-delimited set of values
    pub fn enumeration(name: &str, description: &str, values: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: "enum".to_string(),
            description: description.to_string(),
            enum_values: values.split(',').map(str::to_string).collect(),
        }
    }
}

/// Self-description of a plugin, as served to front ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub parameters: Vec<Parameter>,
}

/// Static parameter metadata for a plugin type.
///
/// Types embedding shared configuration extend their own list with the
/// embedded type's parameters.
pub trait Describe {
    fn parameters() -> Vec<Parameter>;
}

/// A capability a plugin can provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Agent,
    Transport,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Agent => write!(f, "agent"),
            Capability::Transport => write!(f, "transport"),
        }
    }
}

/// Capability set declared at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    agent: bool,
    transport: bool,
}

impl Capabilities {
    pub const AGENT: Self = Self { agent: true, transport: false };
    pub const TRANSPORT: Self = Self { agent: false, transport: true };
    pub const BOTH: Self = Self { agent: true, transport: true };

    pub fn satisfies(&self, capability: Capability) -> bool {
        match capability {
            Capability::Agent => self.agent,
            Capability::Transport => self.transport,
        }
    }
}

/// A constructed plugin with whichever facets its type provides
#[derive(Clone, Default)]
pub struct Plugin {
    pub agent: Option<Arc<dyn Agent>>,
    pub transport: Option<Arc<dyn Transport>>,
}

/// Turns an arguments document into a plugin instance
pub type Constructor = Arc<dyn Fn(Value) -> Result<Plugin, serde_json::Error> + Send + Sync>;

/// One entry of the startup registration list
#[derive(Clone)]
pub struct Registration {
    id: String,
    capabilities: Capabilities,
    parameters: fn() -> Vec<Parameter>,
    constructor: Constructor,
}

impl Registration {
    pub fn new(
        id: impl Into<String>,
        capabilities: Capabilities,
        parameters: fn() -> Vec<Parameter>,
        constructor: Constructor,
    ) -> Self {
        Self {
            id: id.into(),
            capabilities,
            parameters,
            constructor,
        }
    }

    /// Register a type that is only an agent
    pub fn agent<T>(id: impl Into<String>) -> Self
    where
        T: Agent + Describe + DeserializeOwned + 'static,
    {
        Self::new(
            id,
            Capabilities::AGENT,
            T::parameters,
            Arc::new(|args| {
                let agent: T = serde_json::from_value(args)?;
                Ok(Plugin {
                    agent: Some(Arc::new(agent)),
                    transport: None,
                })
            }),
        )
    }

    /// Register a type that is only a transport
    pub fn transport<T>(id: impl Into<String>) -> Self
    where
        T: Transport + Describe + DeserializeOwned + 'static,
    {
        Self::new(
            id,
            Capabilities::TRANSPORT,
            T::parameters,
            Arc::new(|args| {
                let transport: T = serde_json::from_value(args)?;
                Ok(Plugin {
                    agent: None,
                    transport: Some(Arc::new(transport)),
                })
            }),
        )
    }

    /// Register a type serving as both agent and transport
    pub fn agent_and_transport<T>(id: impl Into<String>) -> Self
    where
        T: Agent + Transport + Describe + DeserializeOwned + 'static,
    {
        Self::new(
            id,
            Capabilities::BOTH,
            T::parameters,
            Arc::new(|args| {
                let value = Arc::new(serde_json::from_value::<T>(args)?);
                Ok(Plugin {
                    agent: Some(value.clone() as Arc<dyn Agent>),
                    transport: Some(value as Arc<dyn Transport>),
                })
            }),
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn describe(&self) -> Description {
        Description {
            parameters: (self.parameters)(),
        }
    }

    /// Construct a plugin from its arguments; `null` is treated as `{}`
    pub fn construct(&self, args: Value) -> Result<Plugin, serde_json::Error> {
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };
        (self.constructor)(args)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Process-wide plugin table, immutable once startup is done
#[derive(Debug, Default)]
pub struct Registry {
    plugins: HashMap<String, Registration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a startup list, failing on the first duplicate
    pub fn from_registrations(
        registrations: impl IntoIterator<Item = Registration>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for registration in registrations {
            registry.register(registration)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, registration: Registration) -> Result<(), RegistryError> {
        if self.plugins.contains_key(registration.id()) {
            return Err(RegistryError::Duplicate(registration.id));
        }

        debug!(id = registration.id(), capabilities = ?registration.capabilities, "Registered plugin");
        self.plugins.insert(registration.id.clone(), registration);
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Option<&Registration> {
        self.plugins.get(id)
    }

    pub fn describe(&self, id: &str) -> Option<Description> {
        self.resolve(id).map(Registration::describe)
    }

    /// Descriptions of every plugin providing `capability`, or all plugins for `None`
    pub fn list_available(&self, capability: Option<Capability>) -> BTreeMap<String, Description> {
        self.plugins
            .values()
            .filter(|r| capability.is_none_or(|c| r.capabilities.satisfies(c)))
            .map(|r| (r.id.clone(), r.describe()))
            .collect()
    }

    fn build(&self, id: &str, args: Value) -> Result<Plugin, RegistryError> {
        let registration = self
            .resolve(id)
            .ok_or_else(|| RegistryError::Unknown(id.to_string()))?;

        registration
            .construct(args)
            .map_err(|source| RegistryError::InvalidArguments {
                id: id.to_string(),
                source,
            })
    }

    /// Construct the agent registered under `id`
    pub fn build_agent(&self, id: &str, args: Value) -> Result<Arc<dyn Agent>, RegistryError> {
        self.build(id, args)?.agent.ok_or_else(|| RegistryError::Lacks {
            id: id.to_string(),
            capability: Capability::Agent,
        })
    }

    /// Construct the transport registered under `id`
    pub fn build_transport(&self, id: &str, args: Value) -> Result<Arc<dyn Transport>, RegistryError> {
        self.build(id, args)?.transport.ok_or_else(|| RegistryError::Lacks {
            id: id.to_string(),
            capability: Capability::Transport,
        })
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
