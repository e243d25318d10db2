use super::Agent;
use crate::measurement::Measurements;
use crate::registry::{Describe, Parameter};
use crate::transport::Transport;
use crate::types::{CheckResult, Request};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Instant;
use tokio::time::timeout;
use tracing::debug;

/// Resolve a name using the system resolver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dns {
    #[serde(default)]
    pub target: String,

    #[serde(default)]
    pub record_type: String,
}

impl Describe for Dns {
    fn parameters() -> Vec<Parameter> {
        vec![
            Parameter::new("target", "string", "The name to resolve"),
            Parameter::enumeration("recordType", "The record type to lookup", "A,AAAA,A*"),
        ]
    }
}

impl Dns {
    fn accepts(&self, ip: &IpAddr) -> Option<bool> {
        match self.record_type.as_str() {
            "" | "A*" => Some(true),
            "A" => Some(ip.is_ipv4()),
            "AAAA" => Some(ip.is_ipv6()),
            _ => None,
        }
    }
}

#[async_trait]
impl Agent for Dns {
    async fn run(&self, _transport: &dyn Transport, request: &Request) -> CheckResult {
        if !matches!(self.record_type.as_str(), "" | "A*" | "A" | "AAAA") {
            return CheckResult::failed(format!("method '{}' not supported", self.record_type));
        }

        let start = Instant::now();
        let lookup = timeout(request.timeout, tokio::net::lookup_host((self.target.as_str(), 0))).await;
        let time = Measurements::new().with("time", start.elapsed());

        let addrs = match lookup {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => return CheckResult::failed(e.to_string()).with_measurements(time),
            Err(_) => return CheckResult::failed("timeout").with_measurements(time),
        };

        let mut entries: Vec<IpAddr> = addrs
            .map(|addr| addr.ip())
            .filter(|ip| self.accepts(ip).unwrap_or(false))
            .collect();
        entries.dedup();

        debug!(target = %self.target, count = entries.len(), "Resolved");

        if entries.is_empty() {
            CheckResult::failed("no addresses").with_measurements(time)
        } else {
            CheckResult::ok(format!("{} addresses", entries.len())).with_measurements(time)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::NoopPlugin;
    use crate::types::Status;
    use std::time::Duration;

    fn request() -> Request {
        Request {
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_unsupported_record_type() {
        let dns = Dns {
            target: "localhost".to_string(),
            record_type: "MX".to_string(),
        };
        let result = dns.run(&NoopPlugin::default(), &request()).await;
        assert_eq!(result.status, Status::Failed);
        assert_eq!(result.text, "method 'MX' not supported");
        assert!(result.measurements.is_none());
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let dns = Dns {
            target: "localhost".to_string(),
            record_type: "A*".to_string(),
        };
        let result = dns.run(&NoopPlugin::default(), &request()).await;
        assert!(result.is_ok(), "{}", result.text);
        assert!(result.text.ends_with("addresses"));
        assert!(result.measurement("time").is_some());
    }

    #[test]
    fn test_record_type_filter() {
        let v4: IpAddr = "127.0.0.1".parse().unwrap();
        let v6: IpAddr = "::1".parse().unwrap();

        let a = Dns {
            record_type: "A".to_string(),
            ..Dns::default()
        };
        assert_eq!(a.accepts(&v4), Some(true));
        assert_eq!(a.accepts(&v6), Some(false));

        let any = Dns::default();
        assert_eq!(any.accepts(&v6), Some(true));
    }

    #[test]
    fn test_parameters() {
        let params = Dns::parameters();
        assert_eq!(params.len(), 2);
        assert_eq!(params[1].kind, "enum");
        assert_eq!(params[1].enum_values, vec!["A", "AAAA", "A*"]);
    }
}
