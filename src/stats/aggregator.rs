use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::data::{Severity, TransitionKind, WarningEvent};

/// Running counters fed by the detector hot path and the journal writer.
///
/// Check timing uses plain atomic adds; per-signal counters are only touched
/// on transitions, which are rare compared to checks.
#[derive(Debug)]
pub struct StatsAggregator {
    started: Instant,
    total_checks: AtomicU64,
    total_check_nanos: AtomicU64,
    max_check_nanos: AtomicU64,
    invalid_samples: AtomicU64,
    unknown_signal_checks: AtomicU64,
    by_severity: [AtomicU64; 2],
    by_signal: DashMap<String, u64>,
    recoveries: AtomicU64,
    journal: JournalHealth,
}

#[derive(Debug, Default)]
struct JournalHealth {
    persisted: AtomicU64,
    drains: AtomicU64,
    consecutive_failures: AtomicU64,
    /// Epoch millis of the last successful drain, 0 if none
    last_drain_ms: AtomicI64,
    last_error: Mutex<Option<String>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total_checks: AtomicU64::new(0),
            total_check_nanos: AtomicU64::new(0),
            max_check_nanos: AtomicU64::new(0),
            invalid_samples: AtomicU64::new(0),
            unknown_signal_checks: AtomicU64::new(0),
            by_severity: [AtomicU64::new(0), AtomicU64::new(0)],
            by_signal: DashMap::new(),
            recoveries: AtomicU64::new(0),
            journal: JournalHealth::default(),
        }
    }

    /// Record the latency of one completed check
    pub fn record_check(&self, elapsed: Duration) {
        let nanos = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.total_checks.fetch_add(1, Ordering::Relaxed);
        self.total_check_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_check_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_signal(&self) {
        self.unknown_signal_checks.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a lifecycle transition emitted by the detector
    pub fn record_transition(&self, kind: TransitionKind, event: &WarningEvent) {
        match kind {
            TransitionKind::Opened => {
                self.by_severity[severity_slot(event.severity)].fetch_add(1, Ordering::Relaxed);
                *self.by_signal.entry(event.signal_id.clone()).or_insert(0) += 1;
            }
            TransitionKind::Escalated => {
                self.by_severity[severity_slot(event.severity)].fetch_add(1, Ordering::Relaxed);
            }
            TransitionKind::Recovered => {
                self.recoveries.fetch_add(1, Ordering::Relaxed);
            }
            TransitionKind::Acknowledged => {}
        }
    }

    pub fn record_drain_success(&self, persisted: usize) {
        self.journal
            .persisted
            .fetch_add(persisted as u64, Ordering::Relaxed);
        self.journal.drains.fetch_add(1, Ordering::Relaxed);
        self.journal.consecutive_failures.store(0, Ordering::Relaxed);
        self.journal
            .last_drain_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        *self.journal.last_error.lock() = None;
    }

    pub fn record_drain_failure(&self, error: &str) {
        self.journal.drains.fetch_add(1, Ordering::Relaxed);
        self.journal
            .consecutive_failures
            .fetch_add(1, Ordering::Relaxed);
        *self.journal.last_error.lock() = Some(error.to_string());
    }

    pub fn total_checks(&self) -> u64 {
        self.total_checks.load(Ordering::Relaxed)
    }

    pub fn consecutive_drain_failures(&self) -> u64 {
        self.journal.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Consistent-enough copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let total_checks = self.total_checks.load(Ordering::Relaxed);
        let total_nanos = self.total_check_nanos.load(Ordering::Relaxed);
        let max_nanos = self.max_check_nanos.load(Ordering::Relaxed);
        let uptime = self.started.elapsed().as_secs_f64();

        let by_severity = Severity::ALL
            .iter()
            .map(|s| {
                (
                    s.as_str().to_string(),
                    self.by_severity[severity_slot(*s)].load(Ordering::Relaxed),
                )
            })
            .collect();

        let by_signal = self
            .by_signal
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();

        let last_drain_ms = self.journal.last_drain_ms.load(Ordering::Relaxed);

        StatsSnapshot {
            total_checks,
            avg_check_ms: if total_checks > 0 {
                total_nanos as f64 / total_checks as f64 / 1_000_000.0
            } else {
                0.0
            },
            max_check_ms: max_nanos as f64 / 1_000_000.0,
            checks_per_second: if uptime > 0.0 {
                total_checks as f64 / uptime
            } else {
                0.0
            },
            invalid_samples: self.invalid_samples.load(Ordering::Relaxed),
            unknown_signal_checks: self.unknown_signal_checks.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            by_severity,
            by_signal,
            persisted_transitions: self.journal.persisted.load(Ordering::Relaxed),
            drain_cycles: self.journal.drains.load(Ordering::Relaxed),
            consecutive_drain_failures: self.journal.consecutive_failures.load(Ordering::Relaxed),
            last_drain_at: (last_drain_ms > 0)
                .then(|| Utc.timestamp_millis_opt(last_drain_ms).single())
                .flatten(),
            last_drain_error: self.journal.last_error.lock().clone(),
        }
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn severity_slot(severity: Severity) -> usize {
    match severity {
        Severity::Warning => 0,
        Severity::Critical => 1,
    }
}

/// Point-in-time copy of the aggregator counters
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_checks: u64,
    pub avg_check_ms: f64,
    pub max_check_ms: f64,
    pub checks_per_second: f64,
    pub invalid_samples: u64,
    pub unknown_signal_checks: u64,
    pub recoveries: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_signal: BTreeMap<String, u64>,
    pub persisted_transitions: u64,
    pub drain_cycles: u64,
    pub consecutive_drain_failures: u64,
    pub last_drain_at: Option<DateTime<Utc>>,
    pub last_drain_error: Option<String>,
}
