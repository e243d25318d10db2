use super::Agent;
use crate::measurement::Measurements;
use crate::registry::{Describe, Parameter};
use crate::transport::Transport;
use crate::types::{CheckResult, Request};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

/// Issue a GET request and report the status code
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Http {
    #[serde(default)]
    pub url: String,

    #[serde(skip)]
    client: reqwest::Client,
}

impl Http {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl Describe for Http {
    fn parameters() -> Vec<Parameter> {
        vec![Parameter::new("url", "string", "The URL to request")]
    }
}

#[async_trait]
impl Agent for Http {
    async fn run(&self, _transport: &dyn Transport, request: &Request) -> CheckResult {
        let start = Instant::now();

        match self.client.get(&self.url).timeout(request.timeout).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!(url = %self.url, status, duration_ms = start.elapsed().as_millis(), "HTTP request done");

                let measurements = Measurements::new()
                    .with("time", start.elapsed())
                    .with("status", status);
                CheckResult::ok(format!("returned {}", status)).with_measurements(measurements)
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "HTTP request failed");
                CheckResult::failed(e.to_string())
                    .with_measurements(Measurements::new().with("time", start.elapsed()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::NoopPlugin;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_http_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            stream
                .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
        });

        let http = Http::new(format!("http://{}/health", addr));
        let request = Request {
            timeout: Duration::from_secs(2),
        };
        let result = http.run(&NoopPlugin::default(), &request).await;

        assert!(result.is_ok());
        assert_eq!(result.text, "returned 503");
        assert_eq!(result.measurement("status"), Some(503.0));
        assert!(result.measurement("time").is_some());
    }

    #[tokio::test]
    async fn test_http_connection_refused() {
        let http = Http::new("http://127.0.0.1:1/health");
        let request = Request {
            timeout: Duration::from_millis(500),
        };
        let result = http.run(&NoopPlugin::default(), &request).await;

        assert!(!result.is_ok());
        assert!(result.measurement("time").is_some());
        assert!(result.measurement("status").is_none());
    }
}
