use super::Agent;
use crate::measurement::Measurements;
use crate::registry::{Describe, Parameter};
use crate::transport::{SshOptions, SshTarget, SshTransport, Transport};
use crate::types::{CheckResult, Request};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::time::timeout;

/// Run a command line over SSH and report its output
///
/// The command connects on its own, so the transport it is handed is
/// ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshCommand {
    #[serde(flatten)]
    pub target: SshTarget,

    #[serde(default)]
    pub command: String,

    #[serde(skip)]
    pub options: SshOptions,
}

impl Describe for SshCommand {
    fn parameters() -> Vec<Parameter> {
        let mut parameters = SshTarget::parameters();
        parameters.push(Parameter::new("command", "string", "The command line to run"));
        parameters
    }
}

#[async_trait]
impl Agent for SshCommand {
    async fn run(&self, _transport: &dyn Transport, request: &Request) -> CheckResult {
        let start = Instant::now();
        let ssh = SshTransport::new(self.target.clone(), self.options.clone());

        let outcome = timeout(request.timeout, ssh.run_remote(&self.command)).await;
        let time = Measurements::new().with("time", start.elapsed());

        match outcome {
            Ok(Ok(output)) => match output.check() {
                Ok(output) => CheckResult::ok(output.stdout_text().trim()).with_measurements(time),
                Err(e) => CheckResult::failed(e.to_string()).with_measurements(time),
            },
            Ok(Err(e)) => CheckResult::failed(e.to_string()).with_measurements(time),
            Err(_) => CheckResult::failed(format!("timeout [{}]", self.target.host)).with_measurements(time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::NoopPlugin;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_parameters_flatten_target() {
        let names: Vec<_> = SshCommand::parameters().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["host", "port", "username", "command"]);
    }

    #[test]
    fn test_deserialize_flattened() {
        let agent: SshCommand = serde_json::from_str(
            r#"{"host": "db1", "username": "ops", "command": "uptime"}"#,
        )
        .unwrap();
        assert_eq!(agent.target.host, "db1");
        assert_eq!(agent.target.port, 22);
        assert_eq!(agent.command, "uptime");
    }

    #[test]
    fn test_option_like_host_rejected() {
        let result = serde_json::from_str::<SshCommand>(
            r#"{"host": "-oProxyCommand=touch /tmp/vigil", "command": "uptime"}"#,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_client_fails() {
        let agent = SshCommand {
            target: SshTarget {
                host: "db1".to_string(),
                port: 22,
                username: String::new(),
            },
            command: "uptime".to_string(),
            options: SshOptions {
                binary: PathBuf::from("/nonexistent/ssh"),
                ..SshOptions::default()
            },
        };
        let request = Request {
            timeout: Duration::from_secs(1),
        };

        let result = agent.run(&NoopPlugin::default(), &request).await;
        assert!(!result.is_ok());
        assert!(result.text.contains("/nonexistent/ssh"), "{}", result.text);
    }
}
