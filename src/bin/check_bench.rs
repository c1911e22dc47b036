//! In-process latency probe for the detector hot path.
//!
//! Usage: check_bench [samples_per_thread] [threads]

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use gridwatch::data::{default_thresholds, ThresholdConfig};
use gridwatch::detector::{RealTimeDetector, ThresholdRegistry};
use gridwatch::journal::TransitionQueue;
use gridwatch::stats::StatsAggregator;
use rand::Rng;

/// Centre and half-width of the warning band
fn band(config: &ThresholdConfig) -> (f64, f64) {
    match (config.warning_min, config.warning_max) {
        (Some(min), Some(max)) => ((min + max) / 2.0, (max - min) / 2.0),
        (None, Some(max)) => (max / 2.0, max.abs() / 2.0),
        (Some(min), None) => (min * 1.5, min.abs() / 2.0),
        (None, None) => (0.0, 1.0),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let samples_per_thread: usize = args
        .next()
        .map(|s| s.parse::<usize>())
        .transpose()?
        .unwrap_or(200_000);
    let threads: usize = args
        .next()
        .map(|s| s.parse::<usize>())
        .transpose()?
        .unwrap_or_else(num_cpus::get)
        .max(1);

    let configs = default_thresholds();
    let signals: Vec<(String, f64, f64)> = configs
        .iter()
        .map(|c| {
            let (centre, half) = band(c);
            (c.signal_id.clone(), centre, half)
        })
        .collect();

    let registry = Arc::new(ThresholdRegistry::with_configs(configs)?);
    let queue = Arc::new(TransitionQueue::new(1 << 16));
    let stats = Arc::new(StatsAggregator::new());
    let detector = Arc::new(RealTimeDetector::new(
        registry,
        Arc::clone(&queue),
        Arc::clone(&stats),
    ));

    println!("\n========================================");
    println!("Gridwatch Check Benchmark");
    println!("========================================");
    println!("Signals: {}", signals.len());
    println!("Threads: {}", threads);
    println!("Samples per thread: {}", samples_per_thread);

    let started = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let detector = Arc::clone(&detector);
            let signals = signals.clone();
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let mut rejected = 0usize;
                for i in 0..samples_per_thread {
                    let (signal_id, centre, half) = &signals[i % signals.len()];
                    // Mostly in band, with about one sample in five outside it
                    let jitter: f64 = rng.gen_range(-1.25..1.25);
                    let value = centre + half * jitter;
                    if detector.check(signal_id, value, Utc::now()).is_err() {
                        rejected += 1;
                    }
                }
                rejected
            })
        })
        .collect();

    let mut rejected = 0;
    for handle in handles {
        rejected += handle.join().map_err(|_| "benchmark thread panicked")?;
    }
    let elapsed = started.elapsed();

    let snap = stats.snapshot();
    let total = snap.total_checks;
    let throughput = total as f64 / elapsed.as_secs_f64().max(f64::EPSILON);

    println!("\n--- Results ---");
    println!("  Checks: {} ({} rejected)", total, rejected);
    println!("  Elapsed: {:.2?}", elapsed);
    println!("  Throughput: {:.0} checks/sec", throughput);
    println!("  Avg check: {:.4} ms", snap.avg_check_ms);
    println!("  Max check: {:.4} ms", snap.max_check_ms);
    println!("  Events opened: {}", snap.by_signal.values().sum::<u64>());
    println!("  Recoveries: {}", snap.recoveries);
    println!("  Active now: {}", detector.active_count());
    println!("  Queued transitions: {} ({} dropped)", queue.len(), queue.dropped());

    if snap.max_check_ms > 1.0 {
        println!("\n  Note: max check latency exceeded 1 ms");
    }

    Ok(())
}
