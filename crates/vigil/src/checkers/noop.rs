use super::Agent;
use crate::registry::{Describe, Parameter};
use crate::transport::{Connection, ExecOutput, FileReader, Transport, TransportError};
use crate::types::{CheckResult, Request};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;

/// Does nothing, successfully. Doubles as a transport that reaches nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoopPlugin {
    #[serde(default, with = "humantime_serde")]
    pub delay: Duration,
}

impl Describe for NoopPlugin {
    fn parameters() -> Vec<Parameter> {
        vec![Parameter::new("delay", "duration", "Amount of time to do nothing")]
    }
}

#[async_trait]
impl Agent for NoopPlugin {
    async fn run(&self, _transport: &dyn Transport, _request: &Request) -> CheckResult {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        CheckResult::ok("noop ;-)")
    }
}

#[async_trait]
impl Transport for NoopPlugin {
    async fn exec(&self, _command: &str, _args: &[String]) -> Result<ExecOutput, TransportError> {
        Ok(ExecOutput {
            code: Some(0),
            ..ExecOutput::default()
        })
    }

    async fn dial(&self, _network: &str, _address: &str) -> Result<Box<dyn Connection>, TransportError> {
        Err(TransportError::Unsupported("dial"))
    }

    async fn read_file(&self, _path: &str) -> Result<FileReader, TransportError> {
        Ok(Box::new(io::Cursor::new(Vec::new())))
    }
}
