//! Transports: how an agent reaches the host it checks.

mod local;
pub mod ssh;

pub use local::LocalTransport;
pub use ssh::{SshOptions, SshTarget, SshTransport};

use async_trait::async_trait;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("exit status {code}: {stderr}")]
    ExitStatus { code: i32, stderr: String },

    #[error("terminated by signal")]
    Signaled,

    #[error("unsupported network '{0}'")]
    UnsupportedNetwork(String),

    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),

    #[error("invalid ssh target '{0}'")]
    InvalidTarget(String),

    #[error("connecting to {0} timed out")]
    ConnectTimeout(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// Turn a non-zero exit into an error
    pub fn check(self) -> Result<Self, TransportError> {
        match self.code {
            Some(0) => Ok(self),
            Some(code) => Err(TransportError::ExitStatus {
                code,
                stderr: self.stderr_text(),
            }),
            None => Err(TransportError::Signaled),
        }
    }
}

impl From<std::process::Output> for ExecOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// A bidirectional byte stream opened through a transport
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Connection for T {}

/// Readable contents of a remote file
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Capability set for reaching a host
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a command to completion
    async fn exec(&self, command: &str, args: &[String]) -> Result<ExecOutput, TransportError>;

    /// Open a connection from the host's point of view
    async fn dial(&self, network: &str, address: &str) -> Result<Box<dyn Connection>, TransportError>;

    /// Open a file on the host for reading
    async fn read_file(&self, path: &str) -> Result<FileReader, TransportError>;
}
