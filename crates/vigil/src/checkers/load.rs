use super::Agent;
use crate::measurement::Measurements;
use crate::registry::{Describe, Parameter};
use crate::transport::{Transport, TransportError};
use crate::types::{CheckResult, Request};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

const LOADAVG: &str = "/proc/loadavg";

/// Read the system load average
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Load {}

impl Describe for Load {
    fn parameters() -> Vec<Parameter> {
        Vec::new()
    }
}

#[derive(Debug, Default, PartialEq)]
struct LoadAverage {
    load1: f64,
    load5: f64,
    load15: f64,
    active_tasks: i64,
    tasks: i64,
}

/// Parse `/proc/loadavg`. Malformed fields read as zero.
fn parse_loadavg(contents: &str) -> LoadAverage {
    let mut load = LoadAverage::default();

    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 {
            continue;
        }

        load.load1 = fields[0].parse().unwrap_or_default();
        load.load5 = fields[1].parse().unwrap_or_default();
        load.load15 = fields[2].parse().unwrap_or_default();

        if let Some((active, total)) = fields[3].split_once('/') {
            load.active_tasks = active.parse().unwrap_or_default();
            load.tasks = total.parse().unwrap_or_default();
        }
    }

    load
}

#[async_trait]
impl Agent for Load {
    async fn run(&self, transport: &dyn Transport, _request: &Request) -> CheckResult {
        let mut contents = String::new();
        let read = match transport.read_file(LOADAVG).await {
            Ok(mut reader) => reader.read_to_string(&mut contents).await.map_err(TransportError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = read {
            return CheckResult::failed(e.to_string());
        }

        let load = parse_loadavg(&contents);
        let measurements = Measurements::new()
            .with("load1", load.load1)
            .with("load5", load.load5)
            .with("load15", load.load15)
            .with("activeTasks", load.active_tasks)
            .with("tasks", load.tasks);

        CheckResult::ok(format!(
            "{:.2} {:.2} {:.2} {}/{}",
            load.load1, load.load5, load.load15, load.active_tasks, load.tasks
        ))
        .with_measurements(measurements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{FileReader, MockTransport};
        use std::io::Cursor;
    use std::time::Duration;

    fn request() -> Request {
        Request {
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_parse_loadavg() {
        let load = parse_loadavg("0.52 0.58 0.59 2/1013 123456\n");
        assert_eq!(
            load,
            LoadAverage {
                load1: 0.52,
                load5: 0.58,
                load15: 0.59,
                active_tasks: 2,
                tasks: 1013,
            }
        );

        assert_eq!(parse_loadavg("garbage"), LoadAverage::default());
    }

    #[tokio::test]
    async fn test_load_through_transport() {
        let mut transport = MockTransport::new();
        transport
            .expect_read_file()
            .withf(|path| path == LOADAVG)
            .times(1)
            .returning(|_| Ok(Box::new(Cursor::new(b"1.5 0.25 0.125 3/456 789\n".to_vec())) as FileReader));

        let result = Load {}.run(&transport, &request()).await;

        assert!(result.is_ok());
        assert_eq!(result.text, "1.50 0.25 0.12 3/456");
        assert_eq!(result.measurement("load1"), Some(1.5));
        assert_eq!(result.measurement("activeTasks"), Some(3.0));
        assert_eq!(result.measurement("tasks"), Some(456.0));
    }

    #[tokio::test]
    async fn test_load_read_failure() {
        let mut transport = MockTransport::new();
        transport
            .expect_read_file()
            .returning(|_| Err(TransportError::Unsupported("read_file")));

        let result = Load {}.run(&transport, &request()).await;

        assert!(!result.is_ok());
        assert_eq!(result.text, "read_file is not supported by this transport");
    }
}
