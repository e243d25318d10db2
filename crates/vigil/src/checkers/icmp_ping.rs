use super::Agent;
use crate::icmp::IcmpEngine;
use crate::registry::{Describe, Parameter};
use crate::transport::Transport;
use crate::types::{CheckResult, Request};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Send one ICMPv4 echo request and wait for the reply
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IcmpPing {
    #[serde(default)]
    pub target: String,

    #[serde(skip)]
    pub engine: Option<Arc<IcmpEngine>>,
}

impl IcmpPing {
    pub fn with_engine(mut self, engine: Arc<IcmpEngine>) -> Self {
        self.engine = Some(engine);
        self
    }
}

impl Describe for IcmpPing {
    fn parameters() -> Vec<Parameter> {
        vec![Parameter::new("target", "string", "The host to ping")]
    }
}

#[async_trait]
impl Agent for IcmpPing {
    async fn run(&self, _transport: &dyn Transport, request: &Request) -> CheckResult {
        match &self.engine {
            Some(engine) => engine.ping(&self.target, request.timeout).await,
            None => CheckResult::failed("ICMP engine is not running"),
        }
    }
}
