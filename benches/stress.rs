use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use agendar::audit::TracingAudit;
use agendar::engine::{BookingRequest, Engine, EngineError};
use agendar::limits::{MIN_VALID_DATE_MS, ScheduleConfig};
use agendar::model::{Citizen, DAY_MS, Ms};
use agendar::notify::NotifyHub;

const H: Ms = 3_600_000;
const DATE: Ms = MIN_VALID_DATE_MS + 9_500 * DAY_MS;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn citizen(n: u64) -> Citizen {
    Citizen {
        name: format!("Citizen {n}"),
        cpf: format!("{:011}", 10_000_000_000u64 + n),
        phone: None,
        email: None,
        street: None,
        number: None,
        district: None,
        city: None,
    }
}

fn setup_engine() -> Arc<Engine> {
    let dir = std::env::temp_dir().join("agendar_bench");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("stress_{}.wal", Ulid::new()));
    Arc::new(
        Engine::new(
            "bench",
            path,
            ScheduleConfig::default(),
            Arc::new(NotifyHub::new()),
            Arc::new(TracingAudit),
        )
        .unwrap(),
    )
}

/// Spread bookings over many slots: measures uncontended throughput.
async fn bench_spread(engine: Arc<Engine>, locations: &[Ulid], n: u64) {
    let mut handles = Vec::new();
    for i in 0..n {
        let engine = engine.clone();
        let loc = locations[(i % locations.len() as u64) as usize];
        handles.push(tokio::spawn(async move {
            let start = Instant::now();
            let result = engine
                .book(BookingRequest {
                    location: loc,
                    date: DATE + (i as Ms % 30) * DAY_MS,
                    time: (8 + (i as Ms / 30) % 9) * H,
                    citizen: citizen(i),
                    priority: false,
                    notes: None,
                })
                .await;
            (start.elapsed(), result)
        }));
    }

    let mut latencies = Vec::with_capacity(n as usize);
    let mut rejected = 0u64;
    for h in handles {
        let (latency, result) = h.await.unwrap();
        latencies.push(latency);
        if matches!(result, Err(EngineError::SlotUnavailable)) {
            rejected += 1;
        }
    }
    println!("  rejected (capacity): {rejected}");
    print_latency("spread bookings", &mut latencies);
}

/// Hammer one slot: measures the serialized check-and-insert path.
async fn bench_hot_slot(engine: Arc<Engine>, loc: Ulid, n: u64) {
    let mut handles = Vec::new();
    for i in 0..n {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let start = Instant::now();
            let result = engine
                .book(BookingRequest {
                    location: loc,
                    date: DATE + 60 * DAY_MS,
                    time: 9 * H,
                    citizen: citizen(100_000 + i),
                    priority: false,
                    notes: None,
                })
                .await;
            (start.elapsed(), result.is_ok())
        }));
    }

    let mut latencies = Vec::with_capacity(n as usize);
    let mut booked = 0u64;
    for h in handles {
        let (latency, ok) = h.await.unwrap();
        latencies.push(latency);
        if ok {
            booked += 1;
        }
    }
    println!("  booked into hot slot: {booked} (capacity 2 — must be exactly 2)");
    assert_eq!(booked, 2, "overbooking detected");
    print_latency("hot-slot bookings", &mut latencies);
}

/// Cancel/rebook churn exercises the throttle ledger under load.
async fn bench_churn(engine: Arc<Engine>, loc: Ulid, rounds: u64) {
    let mut latencies = Vec::with_capacity(rounds as usize);
    for i in 0..rounds {
        let appt = engine
            .book(BookingRequest {
                location: loc,
                date: DATE + 90 * DAY_MS,
                time: (8 + (i % 9) as Ms) * H,
                citizen: citizen(200_000 + i),
                priority: false,
                notes: None,
            })
            .await
            .expect("churn booking");
        let start = Instant::now();
        engine.cancel(appt.id, "citizen", None).await.expect("churn cancel");
        latencies.push(start.elapsed());
    }
    print_latency("cancellations", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("agendar stress bench");

    let engine = setup_engine();
    let locations: Vec<Ulid> = (0..10).map(|_| Ulid::new()).collect();
    for (i, &loc) in locations.iter().enumerate() {
        let capacity = if i < 5 { 2 } else { 10 };
        engine.register_location(loc, None, Some(capacity)).await.unwrap();
    }

    println!("phase 1: 2000 bookings spread over 10 locations / 30 days");
    bench_spread(engine.clone(), &locations, 2000).await;

    println!("phase 2: 200 concurrent bookings against one slot");
    bench_hot_slot(engine.clone(), locations[0], 200).await;

    println!("phase 3: 500 cancel rounds");
    bench_churn(engine.clone(), locations[9], 500).await;

    println!("done");
}
