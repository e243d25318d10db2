//! Transport for the host vigil itself runs on.

use super::{Connection, ExecOutput, FileReader, Transport, TransportError};
use crate::registry::{Describe, Parameter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Local process execution, network and filesystem access
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalTransport {}

impl Describe for LocalTransport {
    fn parameters() -> Vec<Parameter> {
        Vec::new()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn exec(&self, command: &str, args: &[String]) -> Result<ExecOutput, TransportError> {
        debug!(command, ?args, "Executing local command");

        let output = Command::new(command)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TransportError::Spawn {
                command: command.to_string(),
                source,
            })?;

        Ok(output.into())
    }

    async fn dial(&self, network: &str, address: &str) -> Result<Box<dyn Connection>, TransportError> {
        match network {
            "tcp" | "tcp4" | "tcp6" => {
                let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(address))
                    .await
                    .map_err(|_| TransportError::ConnectTimeout(address.to_string()))??;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            "unix" => {
                let stream = tokio::net::UnixStream::connect(address).await?;
                Ok(Box::new(stream))
            }
            other => Err(TransportError::UnsupportedNetwork(other.to_string())),
        }
    }

    async fn read_file(&self, path: &str) -> Result<FileReader, TransportError> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(file))
    }
}
