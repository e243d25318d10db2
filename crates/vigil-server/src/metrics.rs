//! Prometheus metrics for the vigil daemon.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::fmt;
use std::time::Duration;
use vigil::Status;

/// Labels for check result metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CheckLabels {
    /// Agent identifier (dns, http, icmp4, ...)
    pub agent: String,
    /// ok or failed
    pub status: String,
}

/// Labels for per-agent metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AgentLabels {
    pub agent: String,
}

/// Labels for error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Error type (store, job, transport)
    pub error_type: String,
}

/// Metrics registry with all vigil metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    checks_total: Family<CheckLabels, Counter>,
    check_duration_seconds: Family<AgentLabels, Histogram>,
    monitors: Gauge,
    in_flight: Gauge,
    rescheduled_total: Counter,
    feed_dropped_total: Counter,
    tick_duration_seconds: Histogram,
    errors_total: Family<ErrorLabels, Counter>,
}

impl fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let checks_total = Family::<CheckLabels, Counter>::default();
        registry.register("vigil_checks", "Checks run, by agent and outcome", checks_total.clone());

        let check_duration_seconds = Family::<AgentLabels, Histogram>::new_with_constructor(|| {
            // 1ms to ~16s
            Histogram::new(exponential_buckets(0.001, 2.0, 15))
        });
        registry.register(
            "vigil_check_duration_seconds",
            "Wall-clock duration of checks in seconds",
            check_duration_seconds.clone(),
        );

        let monitors = Gauge::default();
        registry.register("vigil_monitors", "Monitors seen by the last scheduler tick", monitors.clone());

        let in_flight = Gauge::default();
        registry.register("vigil_in_flight", "Checks currently running", in_flight.clone());

        let rescheduled_total = Counter::default();
        registry.register(
            "vigil_rescheduled",
            "Stale monitors rescheduled with jitter",
            rescheduled_total.clone(),
        );

        let feed_dropped_total = Counter::default();
        registry.register(
            "vigil_feed_dropped",
            "Change events dropped because a subscriber buffer was full",
            feed_dropped_total.clone(),
        );

        let tick_duration_seconds = Histogram::new(exponential_buckets(0.0001, 2.0, 12));
        registry.register(
            "vigil_tick_duration_seconds",
            "Scheduler tick duration in seconds",
            tick_duration_seconds.clone(),
        );

        let errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register("vigil_errors", "Errors by type", errors_total.clone());

        Self {
            registry,
            checks_total,
            check_duration_seconds,
            monitors,
            in_flight,
            rescheduled_total,
            feed_dropped_total,
            tick_duration_seconds,
            errors_total,
        }
    }

    /// Record a finished check
    pub fn record_check(&self, agent: &str, status: Status, duration: Duration) {
        let status = match status {
            Status::Ok => "ok",
            Status::Failed => "failed",
        };

        self.checks_total
            .get_or_create(&CheckLabels {
                agent: agent.to_string(),
                status: status.to_string(),
            })
            .inc();

        self.check_duration_seconds
            .get_or_create(&AgentLabels {
                agent: agent.to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    pub fn set_monitors(&self, count: usize) {
        self.monitors.set(count as i64);
    }

    pub fn set_in_flight(&self, count: usize) {
        self.in_flight.set(count as i64);
    }

    pub fn record_rescheduled(&self) {
        self.rescheduled_total.inc();
    }

    pub fn record_feed_dropped(&self) {
        self.feed_dropped_total.inc();
    }

    pub fn record_tick_duration(&self, duration: Duration) {
        self.tick_duration_seconds.observe(duration.as_secs_f64());
    }

    /// Record error by type
    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .get_or_create(&ErrorLabels {
                error_type: error_type.to_string(),
            })
            .inc();
    }

    /// Prometheus text exposition
    pub fn encode(&self) -> Result<String, fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_check() {
        let registry = MetricsRegistry::new();

        registry.record_check("http", Status::Ok, Duration::from_millis(50));
        registry.record_check("http", Status::Failed, Duration::from_millis(100));
        registry.record_check("http", Status::Failed, Duration::from_millis(100));

        let text = registry.encode().unwrap();
        assert!(text.contains(r#"vigil_checks_total{agent="http",status="ok"} 1"#), "{text}");
        assert!(text.contains(r#"vigil_checks_total{agent="http",status="failed"} 2"#), "{text}");
        assert!(text.contains(r#"vigil_check_duration_seconds_count{agent="http"} 3"#), "{text}");
    }

    #[test]
    fn test_gauges() {
        let registry = MetricsRegistry::new();

        registry.set_monitors(10);
        registry.set_monitors(7);
        registry.set_in_flight(3);

        let text = registry.encode().unwrap();
        assert!(text.contains("vigil_monitors 7"));
        assert!(text.contains("vigil_in_flight 3"));
    }

    #[test]
    fn test_counters() {
        let registry = MetricsRegistry::new();

        registry.record_rescheduled();
        registry.record_rescheduled();
        registry.record_feed_dropped();
        registry.record_error("store");
        registry.record_tick_duration(Duration::from_micros(300));

        let text = registry.encode().unwrap();
        assert!(text.contains("vigil_rescheduled_total 2"));
        assert!(text.contains("vigil_feed_dropped_total 1"));
        assert!(text.contains(r#"vigil_errors_total{error_type="store"} 1"#));
        assert!(text.contains("vigil_tick_duration_seconds_count 1"));
    }
}
