//! Monitor documents as stored and served.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use vigil::{CheckResult, JobDocument};

const ID_LEN: usize = 12;

/// Malformed monitor identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid monitor id '{0}'")]
pub struct InvalidId(pub String);

/// Opaque monitor identifier, rendered as 24 lowercase hex characters
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorId([u8; ID_LEN]);

impl MonitorId {
    /// A fresh random identifier
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MonitorId({})", self)
    }
}

impl FromStr for MonitorId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidId(s.to_string());

        if s.len() != ID_LEN * 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let mut bytes = [0u8; ID_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for MonitorId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonitorId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// How to reach the monitored host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDocument {
    #[serde(default)]
    pub name: String,

    pub transport_id: String,

    #[serde(default)]
    pub arguments: Value,
}

impl HostDocument {
    /// Arguments for the transport constructor; missing arguments are an empty object
    pub fn transport_arguments(&self) -> Value {
        match &self.arguments {
            Value::Null => Value::Object(Default::default()),
            arguments => arguments.clone(),
        }
    }
}

/// The editable part of a monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSpec {
    /// Absent means the local host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostDocument>,

    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    pub agent: JobDocument,
}

/// Longest accepted check interval
pub const MAX_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// `from + interval`, clamped to [`MAX_INTERVAL`] and never overflowing
pub fn advance(from: SystemTime, interval: Duration) -> SystemTime {
    from.checked_add(interval.min(MAX_INTERVAL)).unwrap_or(from)
}

fn unix_epoch() -> SystemTime {
    SystemTime::UNIX_EPOCH
}

/// A scheduled check with its timing state and last result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorDocument {
    pub id: MonitorId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostDocument>,

    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    pub agent: JobDocument,

    #[serde(with = "humantime_serde", default = "unix_epoch")]
    pub last_check: SystemTime,

    /// Authoritative due time
    #[serde(with = "humantime_serde", default = "unix_epoch")]
    pub next_check: SystemTime,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<CheckResult>,
}

impl MonitorDocument {
    /// A monitor that has never run
    pub fn new(id: MonitorId, spec: MonitorSpec) -> Self {
        Self {
            id,
            host: spec.host,
            interval: spec.interval,
            agent: spec.agent,
            last_check: SystemTime::UNIX_EPOCH,
            next_check: SystemTime::UNIX_EPOCH,
            last_result: None,
        }
    }

    /// Replace the editable part, keeping timing state
    pub fn apply(&mut self, spec: MonitorSpec) {
        self.host = spec.host;
        self.interval = spec.interval;
        self.agent = spec.agent;
    }
}

/// A change to a monitor's timing state, applied atomically by the store
#[derive(Debug, Clone, PartialEq)]
pub enum TimingUpdate {
    /// Move the due time without running
    Reschedule(SystemTime),
    /// A run started at `tick` finished with `result`
    Completed { tick: SystemTime, result: CheckResult },
}

impl TimingUpdate {
    /// Apply to `monitor`, leaving its editable part alone
    pub fn apply(self, monitor: &mut MonitorDocument) {
        match self {
            TimingUpdate::Reschedule(at) => monitor.next_check = at,
            TimingUpdate::Completed { tick, result } => {
                monitor.last_result = Some(result);
                monitor.last_check = tick;
                monitor.next_check = advance(tick, monitor.interval);
            }
        }
    }
}
