//! Named numeric samples attached to a check result.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::error;

/// A numeric sample before normalisation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Recorded as nanoseconds
    Duration(Duration),
}

impl Sample {
    fn value(self) -> f64 {
        match self {
            Sample::Int(v) => v as f64,
            Sample::UInt(v) => v as f64,
            Sample::Float(v) => v,
            Sample::Duration(d) => d.as_nanos() as f64,
        }
    }
}

macro_rules! sample_from {
    ($variant:ident, $target:ty, $($t:ty),+) => {
        $(impl From<$t> for Sample {
            fn from(v: $t) -> Self {
                Sample::$variant(v as $target)
            }
        })+
    };
}

sample_from!(Int, i64, i8, i16, i32, i64, isize);
sample_from!(UInt, u64, u8, u16, u32, u64, usize);
sample_from!(Float, f64, f32, f64);

impl From<Duration> for Sample {
    fn from(d: Duration) -> Self {
        Sample::Duration(d)
    }
}

/// Loosely typed constructor argument for [`Measurements::from_args`]
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Text(String),
    Bool(bool),
    Sample(Sample),
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Text(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Text(s)
    }
}

impl From<bool> for Arg {
    fn from(b: bool) -> Self {
        Arg::Bool(b)
    }
}

macro_rules! arg_from_sample {
    ($($t:ty),+) => {
        $(impl From<$t> for Arg {
            fn from(v: $t) -> Self {
                Arg::Sample(v.into())
            }
        })+
    };
}

arg_from_sample!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, Duration);

/// Mapping from metric name to sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Measurements(BTreeMap<String, f64>);

impl Measurements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection from alternating name/value arguments.
    ///
    /// Malformed pairs are logged and dropped; the rest are kept.
    pub fn from_args(args: Vec<Arg>) -> Self {
        let mut collection = Self::new();

        if args.len() % 2 != 0 {
            error!(count = args.len(), "Odd number of measurement arguments, dropping trailing entry");
        }

        let mut iter = args.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            match (key, value) {
                (Arg::Text(name), Arg::Sample(sample)) => collection.insert(name, sample),
                (Arg::Text(name), other) => {
                    error!(name = %name, value = ?other, "Unsupported measurement type");
                }
                (other, _) => {
                    error!(key = ?other, "Measurement name must be text");
                }
            }
        }

        collection
    }

    /// Insert or replace a sample
    pub fn insert(&mut self, name: impl Into<String>, sample: impl Into<Sample>) {
        self.0.insert(name.into(), sample.into().value());
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, sample: impl Into<Sample>) -> Self {
        self.insert(name, sample);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl fmt::Display for Measurements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.0 {
            write!(f, "{}:{} ", name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heterogeneous_inputs_normalised() {
        let m = Measurements::new()
            .with("int", 3i32)
            .with("unsigned", 7u64)
            .with("float", 1.5f32)
            .with("time", Duration::from_millis(2));

        assert_eq!(m.get("int"), Some(3.0));
        assert_eq!(m.get("unsigned"), Some(7.0));
        assert_eq!(m.get("float"), Some(1.5));
        assert_eq!(m.get("time"), Some(2_000_000.0));
    }

    #[test]
    fn test_odd_arguments_keep_complete_pairs() {
        let m = Measurements::from_args(vec![
            "time".into(),
            Duration::from_secs(5).into(),
            "bad".into(),
        ]);

        assert_eq!(m.len(), 1);
        assert_eq!(m.get("time"), Some(5e9));
        assert_eq!(m.get("bad"), None);
    }

    #[test]
    fn test_unsupported_value_dropped() {
        let m = Measurements::from_args(vec![
            "status".into(),
            200i32.into(),
            "flag".into(),
            true.into(),
            "label".into(),
            "text".into(),
            "count".into(),
            4usize.into(),
        ]);

        assert_eq!(m.len(), 2);
        assert_eq!(m.get("status"), Some(200.0));
        assert_eq!(m.get("count"), Some(4.0));
    }

    #[test]
    fn test_non_text_key_dropped() {
        let m = Measurements::from_args(vec![1i32.into(), 2i32.into(), "ok".into(), 1i32.into()]);
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("ok"), Some(1.0));
    }

    #[test]
    fn test_serialises_as_object() {
        let m = Measurements::new().with("load1", 0.25f64).with("tasks", 120u64);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json, serde_json::json!({"load1": 0.25, "tasks": 120.0}));
        assert_eq!(m.to_string(), "load1:0.25 tasks:120 ");
    }
}
