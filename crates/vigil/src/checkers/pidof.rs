use super::Agent;
use crate::measurement::Measurements;
use crate::registry::{Describe, Parameter};
use crate::transport::Transport;
use crate::types::{CheckResult, Request};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const PIDOF: &str = "/bin/pidof";

/// Look up the PIDs of a named process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PidOf {
    #[serde(default)]
    pub process_name: String,
}

impl Describe for PidOf {
    fn parameters() -> Vec<Parameter> {
        vec![Parameter::new("processName", "string", "The processname to look up")]
    }
}

#[async_trait]
impl Agent for PidOf {
    async fn run(&self, transport: &dyn Transport, _request: &Request) -> CheckResult {
        let output = match transport.exec(PIDOF, &[self.process_name.clone()]).await {
            Ok(output) => output,
            Err(e) => return CheckResult::failed(e.to_string()),
        };

        // pidof exits 1 without output when nothing matches
        if output.code == Some(1) && output.stdout.is_empty() {
            return CheckResult::failed(format!("{} is not running", self.process_name))
                .with_measurements(Measurements::new().with("count", 0));
        }

        let output = match output.check() {
            Ok(output) => output,
            Err(e) => return CheckResult::failed(e.to_string()),
        };

        let stdout = output.stdout_text();
        let pids = stdout.trim();
        let count = pids.split_whitespace().count();

        CheckResult::ok(format!("{} has PID(s) {}", self.process_name, pids))
            .with_measurements(Measurements::new().with("count", count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ExecOutput, MockTransport};
    use std::time::Duration;

    fn request() -> Request {
        Request {
            timeout: Duration::from_secs(1),
        }
    }

    fn pidof(name: &str) -> PidOf {
        PidOf {
            process_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_pidof_found() {
        let mut transport = MockTransport::new();
        transport
            .expect_exec()
            .withf(|command, args| command == PIDOF && args.len() == 1 && args[0] == "nginx")
            .times(1)
            .returning(|_, _| {
                Ok(ExecOutput {
                    stdout: b"4312 4311 1022\n".to_vec(),
                    stderr: Vec::new(),
                    code: Some(0),
                })
            });

        let result = pidof("nginx").run(&transport, &request()).await;

        assert!(result.is_ok());
        assert_eq!(result.text, "nginx has PID(s) 4312 4311 1022");
        assert_eq!(result.measurement("count"), Some(3.0));
    }

    #[tokio::test]
    async fn test_pidof_not_running() {
        let mut transport = MockTransport::new();
        transport.expect_exec().returning(|_, _| {
            Ok(ExecOutput {
                code: Some(1),
                ..ExecOutput::default()
            })
        });

        let result = pidof("sshd").run(&transport, &request()).await;

        assert!(!result.is_ok());
        assert_eq!(result.text, "sshd is not running");
        assert_eq!(result.measurement("count"), Some(0.0));
    }

    #[tokio::test]
    async fn test_pidof_exec_failure() {
        let mut transport = MockTransport::new();
        transport.expect_exec().returning(|_, _| {
            Ok(ExecOutput {
                stdout: Vec::new(),
                stderr: b"permission denied\n".to_vec(),
                code: Some(126),
            })
        });

        let result = pidof("sshd").run(&transport, &request()).await;

        assert!(!result.is_ok());
        assert_eq!(result.text, "exit status 126: permission denied");
    }
}
