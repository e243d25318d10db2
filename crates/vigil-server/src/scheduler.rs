//! Scheduler loop.
//!
//! Every tick re-reads the monitor set from the store and evaluates each
//! monitor independently:
//!
//! - already running: skip, a monitor never has two runs at once
//! - stale (not checked for a long time and deeply overdue): move
//!   `next_check` to a random point within one interval and wait, so a burst
//!   of new or long-dead monitors is spread out instead of fired together
//! - due: claim it and run the job on its own task
//! - otherwise nothing happens
//!
//! A run records its result with `last_check` set to the tick that started it
//! and `next_check` one interval later.

use crate::metrics::MetricsRegistry;
use crate::monitors::Monitors;
use crate::types::{MonitorDocument, MonitorId};
use futures::future::join_all;
use rand::Rng;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use vigil::plugins::DEFAULT_TRANSPORT;
use vigil::{CheckResult, Job, Registry, Status};

/// Thresholds driving the per-monitor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    /// How often the monitor set is polled
    pub tick: Duration,

    /// A monitor is stale once its last check is older than this many intervals...
    pub stale_age_factor: u32,

    /// ...and its due time lies more than this many intervals in the past
    pub stale_overdue_factor: u32,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            stale_age_factor: 2,
            stale_overdue_factor: 1,
        }
    }
}

/// What one tick does with one monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A run is still in progress
    InFlight,
    /// Stale: move `next_check` to the given time without running
    Reschedule(SystemTime),
    /// Due: run now
    Dispatch,
    /// Not due yet
    Idle,
}

/// Evaluate one monitor at `now`.
pub fn decide<R: Rng + ?Sized>(
    policy: &SchedulePolicy,
    monitor: &MonitorDocument,
    now: SystemTime,
    in_flight: bool,
    rng: &mut R,
) -> Decision {
    if in_flight {
        return Decision::InFlight;
    }

    // Not yet due
    let Ok(overdue) = now.duration_since(monitor.next_check) else {
        return Decision::Idle;
    };

    let interval = monitor.interval;
    let age = now.duration_since(monitor.last_check).unwrap_or_default();

    if age > interval.saturating_mul(policy.stale_age_factor)
        && overdue > interval.saturating_mul(policy.stale_overdue_factor)
    {
        let jitter = if interval.is_zero() {
            Duration::ZERO
        } else {
            rng.gen_range(Duration::ZERO..interval)
        };
        return Decision::Reschedule(now.checked_add(jitter).unwrap_or(now));
    }

    Decision::Dispatch
}

/// Identifiers of monitors with a run in progress
#[derive(Debug, Default)]
pub struct InFlight {
    ids: RwLock<HashSet<MonitorId>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as running. Returns `None` if it already is.
    pub fn try_claim(self: &Arc<Self>, id: MonitorId) -> Option<Claim> {
        let mut ids = self.ids.write().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(id) {
            return None;
        }

        Some(Claim {
            set: Arc::clone(self),
            id,
        })
    }

    pub fn contains(&self, id: &MonitorId) -> bool {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    /// Copy of the ids running right now
    pub fn snapshot(&self) -> HashSet<MonitorId> {
        self.ids.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.ids.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Membership in the in-flight set, released on drop
#[derive(Debug)]
pub struct Claim {
    set: Arc<InFlight>,
    id: MonitorId,
}

impl Claim {
    pub fn id(&self) -> MonitorId {
        self.id
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.set
            .ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// What a single tick did
#[derive(Debug, Default)]
pub struct TickReport {
    /// Runs started this tick
    pub dispatched: Vec<(MonitorId, JoinHandle<()>)>,
    pub rescheduled: usize,
    pub skipped_in_flight: usize,
}

impl TickReport {
    /// Wait for every run started by this tick
    pub async fn join(self) {
        join_all(self.dispatched.into_iter().map(|(_, handle)| handle)).await;
    }

    pub fn dispatched_ids(&self) -> Vec<MonitorId> {
        self.dispatched.iter().map(|(id, _)| *id).collect()
    }
}

/// Drives monitor checks
pub struct Scheduler {
    monitors: Arc<Monitors>,
    policy: SchedulePolicy,
    in_flight: Arc<InFlight>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Scheduler {
    pub fn new(monitors: Arc<Monitors>, policy: SchedulePolicy, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        Self {
            monitors,
            policy,
            in_flight: Arc::new(InFlight::new()),
            metrics,
        }
    }

    pub fn policy(&self) -> &SchedulePolicy {
        &self.policy
    }

    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }

    /// Run ticks forever
    pub async fn run(self: Arc<Self>) {
        info!(tick = ?self.policy.tick, "Scheduler started");

        let mut ticker = tokio::time::interval(self.policy.tick.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let started = Instant::now();
            let report = self.tick(SystemTime::now()).await;

            if !report.dispatched.is_empty() || report.rescheduled > 0 {
                debug!(
                    dispatched = report.dispatched.len(),
                    rescheduled = report.rescheduled,
                    in_flight = report.skipped_in_flight,
                    "Tick complete"
                );
            }

            if let Some(metrics) = &self.metrics {
                metrics.record_tick_duration(started.elapsed());
            }
        }
    }

    /// Evaluate every monitor once at `now`.
    ///
    /// Runs are spawned and not awaited; see [`TickReport::join`].
    pub async fn tick(&self, now: SystemTime) -> TickReport {
        let mut report = TickReport::default();

        // Before listing: a run that ends meanwhile has its result missing
        // from the listed copy.
        let running = self.in_flight.snapshot();

        let monitors = match self.monitors.list().await {
            Ok(monitors) => monitors,
            Err(e) => {
                warn!(error = %e, "Failed to load monitors, skipping tick");
                self.record_error("store");
                return report;
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.set_monitors(monitors.len());
        }

        let decisions: Vec<(MonitorDocument, Decision)> = {
            let mut rng = rand::thread_rng();
            monitors
                .into_iter()
                .map(|monitor| {
                    let in_flight = running.contains(&monitor.id);
                    let decision = decide(&self.policy, &monitor, now, in_flight, &mut rng);
                    (monitor, decision)
                })
                .collect()
        };

        for (monitor, decision) in decisions {
            match decision {
                Decision::InFlight => report.skipped_in_flight += 1,
                Decision::Idle => {}
                Decision::Reschedule(at) => {
                    let id = monitor.id;

                    match self.monitors.reschedule(id, at).await {
                        Ok(()) => {
                            debug!(id = %id, "Stale monitor rescheduled");
                            report.rescheduled += 1;
                            if let Some(metrics) = &self.metrics {
                                metrics.record_rescheduled();
                            }
                        }
                        Err(e) => {
                            warn!(id = %id, error = %e, "Failed to reschedule monitor");
                            self.record_error("store");
                        }
                    }
                }
                Decision::Dispatch => {
                    let id = monitor.id;
                    match self.in_flight.try_claim(id) {
                        Some(claim) => {
                            let handle = self.dispatch(monitor, now, claim);
                            report.dispatched.push((id, handle));
                        }
                        None => report.skipped_in_flight += 1,
                    }
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.set_in_flight(self.in_flight.len());
        }

        report
    }

    fn dispatch(&self, monitor: MonitorDocument, tick: SystemTime, claim: Claim) -> JoinHandle<()> {
        let monitors = Arc::clone(&self.monitors);
        let in_flight = Arc::clone(&self.in_flight);
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let id = monitor.id;
            let agent = monitor.agent.agent_id.clone().unwrap_or_default();

            let result = execute(monitors.registry(), &monitor).await;

            let duration_ms = result.duration.as_millis() as u64;
            match result.status {
                Status::Ok => debug!(id = %id, agent = %agent, status = %result.status, duration_ms, text = %result.text, "Check complete"),
                Status::Failed => warn!(id = %id, agent = %agent, status = %result.status, duration_ms, text = %result.text, "Check failed"),
            }

            if let Some(metrics) = &metrics {
                metrics.record_check(&agent, result.status, result.duration);
            }

            if let Err(e) = monitors.record_run(id, result, tick).await {
                warn!(id = %id, error = %e, "Failed to store check result");
                if let Some(metrics) = &metrics {
                    metrics.record_error("store");
                }
            }

            drop(claim);
            if let Some(metrics) = &metrics {
                metrics.set_in_flight(in_flight.len());
            }
        })
    }

    fn record_error(&self, error_type: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_error(error_type);
        }
    }
}

/// Build and run a monitor's job. Problems building it become a failed result.
async fn execute(registry: &Registry, monitor: &MonitorDocument) -> CheckResult {
    let job = match Job::from_document(registry, &monitor.agent) {
        Ok(job) => job,
        Err(e) => return CheckResult::failed(format!("invalid job: {}", e)),
    };

    let transport = match &monitor.host {
        Some(host) => registry.build_transport(&host.transport_id, host.transport_arguments()),
        None => registry.build_transport(DEFAULT_TRANSPORT, json!({})),
    };

    match transport {
        Ok(transport) => job.run(transport.as_ref()).await,
        Err(e) => CheckResult::failed(format!("invalid host: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MonitorSpec;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use vigil::JobDocument;

    const INTERVAL: Duration = Duration::from_secs(60);

    fn monitor(last_check: SystemTime, next_check: SystemTime) -> MonitorDocument {
        let mut monitor = MonitorDocument::new(
            MonitorId::generate(),
            MonitorSpec {
                host: None,
                interval: INTERVAL,
                agent: JobDocument::new("noop", Duration::from_secs(1), json!({})),
            },
        );
        monitor.last_check = last_check;
        monitor.next_check = next_check;
        monitor
    }

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn test_cold_start_is_jittered() {
        let policy = SchedulePolicy::default();
        let mut rng = StdRng::seed_from_u64(7);
        let fresh = monitor(SystemTime::UNIX_EPOCH, SystemTime::UNIX_EPOCH);

        for _ in 0..100 {
            match decide(&policy, &fresh, now(), false, &mut rng) {
                Decision::Reschedule(at) => {
                    assert!(at >= now());
                    assert!(at < now() + INTERVAL);
                }
                other => panic!("expected reschedule, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_due_and_idle() {
        let policy = SchedulePolicy::default();
        let mut rng = StdRng::seed_from_u64(7);
        let recent = now() - INTERVAL;

        // Exactly due
        let m = monitor(recent, now());
        assert_eq!(decide(&policy, &m, now(), false, &mut rng), Decision::Dispatch);

        // Slightly overdue
        let m = monitor(recent, now() - Duration::from_secs(5));
        assert_eq!(decide(&policy, &m, now(), false, &mut rng), Decision::Dispatch);

        // Not yet due
        let m = monitor(recent, now() + Duration::from_secs(5));
        assert_eq!(decide(&policy, &m, now(), false, &mut rng), Decision::Idle);
    }

    #[test]
    fn test_deeply_overdue_but_recent_runs() {
        let policy = SchedulePolicy::default();
        let mut rng = StdRng::seed_from_u64(7);

        // Checked recently, so not stale even though next_check is far behind
        let m = monitor(now() - Duration::from_secs(30), now() - INTERVAL * 5);
        assert_eq!(decide(&policy, &m, now(), false, &mut rng), Decision::Dispatch);

        // Old check, but only slightly overdue
        let m = monitor(now() - INTERVAL * 5, now() - Duration::from_secs(30));
        assert_eq!(decide(&policy, &m, now(), false, &mut rng), Decision::Dispatch);
    }

    #[test]
    fn test_in_flight_wins() {
        let policy = SchedulePolicy::default();
        let mut rng = StdRng::seed_from_u64(7);
        let m = monitor(SystemTime::UNIX_EPOCH, SystemTime::UNIX_EPOCH);

        assert_eq!(decide(&policy, &m, now(), true, &mut rng), Decision::InFlight);
    }

    #[test]
    fn test_configurable_thresholds() {
        let policy = SchedulePolicy {
            stale_age_factor: 10,
            stale_overdue_factor: 10,
            ..SchedulePolicy::default()
        };
        let mut rng = StdRng::seed_from_u64(7);

        let m = monitor(now() - INTERVAL * 5, now() - INTERVAL * 3);
        assert_eq!(decide(&policy, &m, now(), false, &mut rng), Decision::Dispatch);

        let m = monitor(now() - INTERVAL * 20, now() - INTERVAL * 15);
        assert!(matches!(
            decide(&policy, &m, now(), false, &mut rng),
            Decision::Reschedule(_)
        ));
    }

    #[test]
    fn test_oversized_interval_does_not_overflow() {
        let policy = SchedulePolicy::default();
        let mut rng = StdRng::seed_from_u64(7);

        let mut m = monitor(SystemTime::UNIX_EPOCH, SystemTime::UNIX_EPOCH);
        m.interval = Duration::from_secs(u64::MAX);
        // Never stale: age can not exceed twice the interval
        assert_eq!(decide(&policy, &m, now(), false, &mut rng), Decision::Dispatch);

        m.interval = Duration::MAX / 2;
        m.last_check = SystemTime::UNIX_EPOCH;
        let stale = SchedulePolicy {
            stale_age_factor: 0,
            stale_overdue_factor: 0,
            ..policy
        };
        assert!(matches!(
            decide(&stale, &m, now(), false, &mut rng),
            Decision::Reschedule(_)
        ));
    }

    #[test]
    fn test_claim_released_on_drop() {
        let in_flight = Arc::new(InFlight::new());
        let id = MonitorId::generate();

        let claim = in_flight.try_claim(id).unwrap();
        assert_eq!(claim.id(), id);
        assert!(in_flight.contains(&id));
        assert!(in_flight.try_claim(id).is_none());

        drop(claim);
        assert!(!in_flight.contains(&id));
        assert!(in_flight.is_empty());
        assert!(in_flight.try_claim(id).is_some());
    }
}
