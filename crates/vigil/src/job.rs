//! Jobs: an agent bound to its arguments and timeout.
//!
//! The persisted form names the agent by registry identifier. Decoding
//! resolves that identifier first, since the arguments can only be decoded
//! once the concrete agent type is known.

use crate::checkers::Agent;
use crate::registry::{Registry, RegistryError};
use crate::transport::Transport;
use crate::types::{CheckResult, Request};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

/// Used when a job carries no timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Extra time an agent gets to report its own timeout before it is cut off
pub const GRACE_PERIOD: Duration = Duration::from_millis(250);

/// Job decoding errors
#[derive(Debug, Error)]
pub enum JobError {
    #[error("agentId not found")]
    MissingAgentId,

    #[error("arguments not found")]
    MissingArguments,

    #[error("unknown agentId '{0}'")]
    UnknownAgent(String),

    #[error("'{0}' is not an agent")]
    NotAnAgent(String),

    #[error("invalid arguments for '{agent}': {source}")]
    InvalidArguments {
        agent: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed job document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Registry(RegistryError),
}

impl From<RegistryError> for JobError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Unknown(id) => JobError::UnknownAgent(id),
            RegistryError::Lacks { id, .. } => JobError::NotAnAgent(id),
            RegistryError::InvalidArguments { id, source } => JobError::InvalidArguments { agent: id, source },
            e @ RegistryError::Duplicate(_) => JobError::Registry(e),
        }
    }
}

/// Persisted form of a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(default, with = "humantime_serde")]
    pub timeout: Duration,

    /// `None` only when the key is absent; an explicit `null` is kept
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl JobDocument {
    pub fn new(agent_id: impl Into<String>, timeout: Duration, arguments: Value) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            timeout,
            arguments: Some(arguments),
        }
    }
}

/// A decoded, runnable job
#[derive(Clone)]
pub struct Job {
    agent_id: String,
    timeout: Duration,
    arguments: Value,
    agent: Arc<dyn Agent>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("agent_id", &self.agent_id)
            .field("timeout", &self.timeout)
            .field("arguments", &self.arguments)
            .finish()
    }
}

impl Job {
    /// Resolve the agent and decode its arguments
    pub fn from_document(registry: &Registry, document: &JobDocument) -> Result<Self, JobError> {
        let agent_id = document.agent_id.as_deref().ok_or(JobError::MissingAgentId)?;

        if registry.resolve(agent_id).is_none() {
            return Err(JobError::UnknownAgent(agent_id.to_string()));
        }

        let arguments = document.arguments.clone().ok_or(JobError::MissingArguments)?;
        let agent = match &arguments {
            Value::Null => registry.build_agent(agent_id, Value::Object(Default::default()))?,
            arguments => registry.build_agent(agent_id, arguments.clone())?,
        };

        Ok(Self {
            agent_id: agent_id.to_string(),
            timeout: document.timeout,
            arguments,
            agent,
        })
    }

    /// Decode a JSON job document
    pub fn decode(registry: &Registry, json: &str) -> Result<Self, JobError> {
        let document: JobDocument = serde_json::from_str(json)?;
        Self::from_document(registry, &document)
    }

    pub fn document(&self) -> JobDocument {
        JobDocument::new(self.agent_id.clone(), self.timeout, self.arguments.clone())
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// The configured timeout, or [`DEFAULT_TIMEOUT`] when unset
    pub fn timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.timeout
        }
    }

    /// Run the agent once.
    ///
    /// The result's duration is always the wall-clock time measured here.
    pub async fn run(&self, transport: &dyn Transport) -> CheckResult {
        let start = Instant::now();
        let request = Request {
            timeout: self.timeout(),
        };

        let outcome = tokio::time::timeout(request.timeout + GRACE_PERIOD, self.agent.run(transport, &request)).await;

        let mut result = match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(agent = %self.agent_id, timeout = ?request.timeout, "Agent overran its timeout");
                CheckResult::failed(format!("{} did not finish within {:?}", self.agent_id, request.timeout))
            }
        };

        result.duration = start.elapsed();
        result
    }
}
