// Scheduler decision hot path: one decide() call per monitor per tick

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use vigil::JobDocument;
use vigil_server::scheduler::{InFlight, SchedulePolicy, decide};
use vigil_server::{MonitorDocument, MonitorId, MonitorSpec};

fn monitors(count: usize, now: SystemTime) -> Vec<MonitorDocument> {
    (0..count)
        .map(|i| {
            let mut monitor = MonitorDocument::new(
                MonitorId::generate(),
                MonitorSpec {
                    host: None,
                    interval: Duration::from_secs(60),
                    agent: JobDocument::new("noop", Duration::from_secs(1), json!({})),
                },
            );
            // Mix of idle, due and stale monitors
            match i % 3 {
                0 => monitor.next_check = now + Duration::from_secs(30),
                1 => {
                    monitor.last_check = now - Duration::from_secs(60);
                    monitor.next_check = now - Duration::from_secs(1);
                }
                _ => {}
            }
            monitor
        })
        .collect()
}

fn bench_decide(c: &mut Criterion) {
    let mut group = c.benchmark_group("decide");
    let policy = SchedulePolicy::default();
    let now = SystemTime::now();

    for count in [100usize, 10_000] {
        let set = monitors(count, now);
        let in_flight = Arc::new(InFlight::new());
        let mut rng = StdRng::seed_from_u64(1);

        group.bench_with_input(BenchmarkId::from_parameter(count), &set, |b, set| {
            b.iter(|| {
                for monitor in set {
                    let running = in_flight.contains(&monitor.id);
                    black_box(decide(&policy, black_box(monitor), now, running, &mut rng));
                }
            });
        });
    }

    group.finish();
}

fn bench_claim(c: &mut Criterion) {
    let in_flight = Arc::new(InFlight::new());
    let id = MonitorId::generate();

    c.bench_function("in_flight_claim_release", |b| {
        b.iter(|| {
            let claim = in_flight.try_claim(black_box(id));
            black_box(claim);
        });
    });
}

criterion_group!(benches, bench_decide, bench_claim);
criterion_main!(benches);
