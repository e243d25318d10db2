//! Check result types.

use crate::measurement::Measurements;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Outcome of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The check passed
    Ok,
    /// The check failed, see the result text
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::Failed => write!(f, "FAILED"),
        }
    }
}

/// Parameters handed to an agent for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// How long the agent may take before reporting failure
    pub timeout: Duration,
}

/// Result of a check
///
/// Produced once per run and never mutated afterwards, except for the
/// duration which the job wrapper stamps with wall-clock time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Status of the check
    pub status: Status,

    /// Human-readable outcome
    pub text: String,

    /// Duration of the check
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Numeric samples collected by the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurements: Option<Measurements>,
}

impl CheckResult {
    /// Create a passing result
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            text: text.into(),
            duration: Duration::ZERO,
            measurements: None,
        }
    }

    /// Create a failed result
    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            status: Status::Failed,
            text: text.into(),
            duration: Duration::ZERO,
            measurements: None,
        }
    }

    /// Attach measurements
    pub fn with_measurements(mut self, measurements: Measurements) -> Self {
        self.measurements = Some(measurements);
        self
    }

    /// Check if the result is passing
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Look up a single measurement
    pub fn measurement(&self, name: &str) -> Option<f64> {
        self.measurements.as_ref().and_then(|m| m.get(name))
    }
}
