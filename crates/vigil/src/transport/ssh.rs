//! SSH transport built on the system `ssh` client.
//!
//! Connection reuse and authentication are left to the client's own
//! configuration (`~/.ssh/config`, agent, `ControlMaster`). vigil only runs
//! it in batch mode so a missing key fails fast instead of prompting.

use super::{Connection, ExecOutput, FileReader, Transport, TransportError};
use crate::registry::{Describe, Parameter};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

fn default_port() -> u16 {
    22
}

/// A destination or login name the client would parse as an option
fn is_option_like(value: &str) -> bool {
    value.starts_with('-')
}

fn destination<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = String::deserialize(deserializer)?;
    if is_option_like(&value) {
        return Err(serde::de::Error::custom(format!("invalid ssh target '{}'", value)));
    }
    Ok(value)
}

/// Where and as whom to connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTarget {
    #[serde(deserialize_with = "destination")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default, deserialize_with = "destination")]
    pub username: String,
}

impl SshTarget {
    /// Reject targets the client would read as options
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.host.is_empty() || is_option_like(&self.host) || is_option_like(&self.username) {
            return Err(TransportError::InvalidTarget(self.host.clone()));
        }
        Ok(())
    }
}

impl Describe for SshTarget {
    fn parameters() -> Vec<Parameter> {
        vec![
            Parameter::new("host", "string", "The host to connect to"),
            Parameter::new("port", "uint16", "The SSH port"),
            Parameter::new("username", "string", "The user to log in as"),
        ]
    }
}

/// Client settings shared by every SSH plugin instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    pub binary: PathBuf,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ssh"),
            identity_file: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Reach a host over SSH
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshTransport {
    #[serde(flatten)]
    pub target: SshTarget,

    #[serde(skip)]
    pub options: SshOptions,
}

impl Describe for SshTransport {
    fn parameters() -> Vec<Parameter> {
        SshTarget::parameters()
    }
}

impl SshTransport {
    pub fn new(target: SshTarget, options: SshOptions) -> Self {
        Self { target, options }
    }

    /// Client arguments: common options, then `extra`, then the destination.
    ///
    /// The destination always follows `--`.
    pub(crate) fn client_args(&self, extra: &[&str]) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)),
            "-p".to_string(),
            self.target.port.to_string(),
        ];

        if let Some(identity) = &self.options.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }

        if !self.target.username.is_empty() {
            args.push("-l".to_string());
            args.push(self.target.username.clone());
        }

        args.extend(extra.iter().map(|arg| arg.to_string()));
        args.push("--".to_string());
        args.push(self.target.host.clone());
        args
    }

    fn command(&self, extra: &[&str]) -> Result<Command, TransportError> {
        self.target.validate()?;

        let mut command = Command::new(&self.options.binary);
        command.args(self.client_args(extra)).kill_on_drop(true);
        Ok(command)
    }

    /// Run a shell command line on the remote host
    pub async fn run_remote(&self, command_line: &str) -> Result<ExecOutput, TransportError> {
        debug!(
            host = %self.target.host,
            port = self.target.port,
            username = %self.target.username,
            command = command_line,
            "Executing remote command"
        );

        let output = self
            .command(&[])?
            .arg(command_line)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| TransportError::Spawn {
                command: self.options.binary.display().to_string(),
                source,
            })?;

        Ok(output.into())
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn exec(&self, command: &str, args: &[String]) -> Result<ExecOutput, TransportError> {
        let mut line = shell_quote(command);
        for arg in args {
            line.push(' ');
            line.push_str(&shell_quote(arg));
        }
        self.run_remote(&line).await
    }

    async fn dial(&self, network: &str, address: &str) -> Result<Box<dyn Connection>, TransportError> {
        if !matches!(network, "tcp" | "tcp4" | "tcp6") {
            return Err(TransportError::UnsupportedNetwork(network.to_string()));
        }

        debug!(address, host = %self.target.host, "Dialing through SSH");

        let mut child = self
            .command(&["-W", address])?
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: self.options.binary.display().to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| io::Error::other("ssh stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("ssh stdout unavailable"))?;

        Ok(Box::new(SshTunnel {
            _child: child,
            stdin,
            stdout,
        }))
    }

    async fn read_file(&self, path: &str) -> Result<FileReader, TransportError> {
        let output = self.exec("cat", &[path.to_string()]).await?.check()?;
        Ok(Box::new(io::Cursor::new(output.stdout)))
    }
}

/// Stdio forwarding session opened with `ssh -W`
struct SshTunnel {
    _child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl AsyncRead for SshTunnel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for SshTunnel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}

/// Quote a word for a POSIX shell
pub(crate) fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));

    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_defaults_port() {
        let target: SshTarget = serde_json::from_str(r#"{"host": "db1", "username": "ops"}"#).unwrap();
        assert_eq!(target.port, 22);
    }

    #[test]
    fn test_client_args() {
        let transport = SshTransport::new(
            SshTarget {
                host: "db1.example.com".to_string(),
                port: 2222,
                username: "monitor".to_string(),
            },
            SshOptions {
                identity_file: Some(PathBuf::from("/etc/vigil/id_ed25519")),
                ..SshOptions::default()
            },
        );

        let args = transport.client_args(&[]);
        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=10",
                "-p",
                "2222",
                "-i",
                "/etc/vigil/id_ed25519",
                "-l",
                "monitor",
                "--",
                "db1.example.com",
            ]
        );

        let args = transport.client_args(&["-W", "10.0.0.1:5432"]);
        assert_eq!(&args[args.len() - 4..], ["-W", "10.0.0.1:5432", "--", "db1.example.com"]);
    }

    #[test]
    fn test_option_like_target_rejected() {
        let err = serde_json::from_str::<SshTarget>(r#"{"host": "-oProxyCommand=touch /tmp/x"}"#).unwrap_err();
        assert!(err.to_string().contains("invalid ssh target"), "{err}");

        let err = serde_json::from_str::<SshTarget>(r#"{"host": "db1", "username": "-oProxyCommand=id"}"#).unwrap_err();
        assert!(err.to_string().contains("invalid ssh target"), "{err}");

        assert!(serde_json::from_str::<SshTarget>(r#"{"host": "db-1", "username": "ops-team"}"#).is_ok());
    }

    #[tokio::test]
    async fn test_option_like_target_never_spawns() {
        // Constructed directly, bypassing deserialization
        let transport = SshTransport::new(
            SshTarget {
                host: "-oProxyCommand=touch /tmp/vigil-ssh-target".to_string(),
                port: 22,
                username: String::new(),
            },
            SshOptions {
                binary: PathBuf::from("/nonexistent/ssh"),
                ..SshOptions::default()
            },
        );

        let result = transport.run_remote("uptime").await;
        assert!(matches!(result, Err(TransportError::InvalidTarget(_))));

        let result = transport.dial("tcp", "10.0.0.1:22").await;
        assert!(matches!(result, Err(TransportError::InvalidTarget(_))));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/bin/pidof"), "/bin/pidof");
        assert_eq!(shell_quote("nginx worker"), "'nginx worker'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_flattened_parameters() {
        let names: Vec<_> = SshTransport::parameters().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["host", "port", "username"]);
    }

    #[tokio::test]
    async fn test_dial_rejects_udp() {
        let transport = SshTransport::new(
            SshTarget {
                host: "db1".to_string(),
                port: 22,
                username: String::new(),
            },
            SshOptions::default(),
        );
        let result = transport.dial("udp", "10.0.0.1:53").await;
        assert!(matches!(result, Err(TransportError::UnsupportedNetwork(_))));
    }
}
