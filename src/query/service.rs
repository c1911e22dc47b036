//! Read side: active warnings, history and statistics

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::data::WarningEvent;
use crate::detector::RealTimeDetector;
use crate::journal::{EventJournal, TransitionQueue};
use crate::stats::StatsAggregator;
use crate::storage::{HistoryFilter, StoreError};

/// Answers reads without touching the detector's write path.
///
/// Active warnings come from the detector's in-memory table, history only
/// from the store.
pub struct QueryService {
    detector: Arc<RealTimeDetector>,
    journal: Arc<EventJournal>,
    queue: Arc<TransitionQueue>,
    stats: Arc<StatsAggregator>,
}

impl QueryService {
    pub fn new(
        detector: Arc<RealTimeDetector>,
        journal: Arc<EventJournal>,
        queue: Arc<TransitionQueue>,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            detector,
            journal,
            queue,
            stats,
        }
    }

    /// Currently open events, newest first
    pub fn list_active(&self) -> Vec<WarningEvent> {
        self.detector.active_events()
    }

    /// Persisted events matching `filter`, newest first
    pub fn query_historical(&self, filter: &HistoryFilter) -> Result<Vec<WarningEvent>, QueryError> {
        if let (Some(start), Some(end)) = (filter.start_time, filter.end_time) {
            if start > end {
                return Err(QueryError::InvalidRange { start, end });
            }
        }
        Ok(self.journal.store().query(filter)?)
    }

    pub fn get_stats(&self) -> Stats {
        let snap = self.stats.snapshot();

        let layer_status = LayerStatus {
            realtime: "ok",
            storage: if snap.consecutive_drain_failures > 0 {
                "degraded"
            } else {
                "ok"
            },
            stored_events: self.journal.store().len(),
            pending_writes: self.journal.pending_writes(),
            dropped_transitions: self.queue.dropped(),
            persisted_transitions: snap.persisted_transitions,
            drain_cycles: snap.drain_cycles,
            consecutive_failures: snap.consecutive_drain_failures,
            last_drain_at: snap.last_drain_at,
            last_error: snap.last_drain_error,
        };

        Stats {
            active_count: self.detector.active_count(),
            total_checks: snap.total_checks,
            avg_check_ms: snap.avg_check_ms,
            max_check_ms: snap.max_check_ms,
            checks_per_second: snap.checks_per_second,
            invalid_samples: snap.invalid_samples,
            unknown_signal_checks: snap.unknown_signal_checks,
            recoveries: snap.recoveries,
            by_severity: snap.by_severity,
            by_signal: snap.by_signal,
            layer_status,
        }
    }
}

/// Statistics across both layers
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub active_count: usize,
    pub total_checks: u64,
    pub avg_check_ms: f64,
    pub max_check_ms: f64,
    pub checks_per_second: f64,
    pub invalid_samples: u64,
    pub unknown_signal_checks: u64,
    pub recoveries: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_signal: BTreeMap<String, u64>,
    pub layer_status: LayerStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerStatus {
    pub realtime: &'static str,
    /// `ok`, or `degraded` while drain cycles keep failing
    pub storage: &'static str,
    pub stored_events: usize,
    pub pending_writes: usize,
    pub dropped_transitions: u64,
    pub persisted_transitions: u64,
    pub drain_cycles: u64,
    pub consecutive_failures: u64,
    pub last_drain_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("start_time {start} is after end_time {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::Notifier;
    use crate::data::{EventState, Severity, ThresholdConfig};
    use crate::detector::ThresholdRegistry;
    use crate::storage::{EventStore, MemoryEventStore};
    use chrono::TimeZone;
    use std::time::Duration;

    fn service() -> (QueryService, Arc<RealTimeDetector>, Arc<EventJournal>) {
        let config = ThresholdConfig::new("PPA:2", "frequency")
            .with_warning(Some(59.85), Some(60.15))
            .with_critical(Some(59.5), Some(60.5))
            .with_trigger(3, Duration::from_secs(5))
            .with_recovery(2, Duration::from_secs(3));
        let registry = Arc::new(ThresholdRegistry::with_configs(vec![config]).unwrap());
        let queue = Arc::new(TransitionQueue::new(64));
        let stats = Arc::new(StatsAggregator::new());
        let detector = Arc::new(RealTimeDetector::new(
            registry,
            Arc::clone(&queue),
            Arc::clone(&stats),
        ));
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let journal = Arc::new(EventJournal::new(
            Arc::clone(&queue),
            store,
            Arc::clone(&detector),
            Arc::clone(&stats),
            Notifier::disabled(),
            Duration::from_secs(1),
        ));
        let service = QueryService::new(
            Arc::clone(&detector),
            Arc::clone(&journal),
            queue,
            stats,
        );
        (service, detector, journal)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_recovered_event_moves_to_history() {
        let (service, detector, journal) = service();
        for s in 0..3 {
            detector.check("PPA:2", 60.2, at(s)).unwrap();
        }
        assert_eq!(service.list_active().len(), 1);
        journal.flush().unwrap();

        detector.check("PPA:2", 60.0, at(3)).unwrap();
        detector.check("PPA:2", 60.0, at(4)).unwrap();
        assert!(service.list_active().is_empty());

        // Not visible in history until the journal drains
        let before = service.query_historical(&HistoryFilter::default()).unwrap();
        assert_eq!(before[0].state, EventState::Active);

        journal.flush().unwrap();
        let history = service
            .query_historical(&HistoryFilter::default().with_state(EventState::Recovered))
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].duration, Some(4.0));
    }

    #[test]
    fn test_invalid_range_rejected() {
        let (service, _, _) = service();
        let filter = HistoryFilter::default().with_range(Some(at(10)), Some(at(0)));
        assert!(matches!(
            service.query_historical(&filter),
            Err(QueryError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_stats_merge_layers() {
        let (service, detector, journal) = service();
        for s in 0..3 {
            detector.check("PPA:2", 60.2, at(s)).unwrap();
        }
        detector.check("PPA:2", 61.0, at(3)).unwrap();
        detector.check("unknown", 1.0, at(3)).unwrap();
        let _ = detector.check("PPA:2", f64::INFINITY, at(4));

        let stats = service.get_stats();
        assert_eq!(stats.active_count, 1);
        assert_eq!(stats.total_checks, 5);
        assert_eq!(stats.invalid_samples, 1);
        assert_eq!(stats.unknown_signal_checks, 1);
        assert_eq!(stats.by_severity[Severity::Warning.as_str()], 1);
        assert_eq!(stats.by_severity[Severity::Critical.as_str()], 1);
        assert_eq!(stats.by_signal["PPA:2"], 1);
        assert_eq!(stats.layer_status.storage, "ok");
        assert_eq!(stats.layer_status.pending_writes, 2);

        journal.flush().unwrap();
        let stats = service.get_stats();
        assert_eq!(stats.layer_status.pending_writes, 0);
        assert_eq!(stats.layer_status.stored_events, 1);
        assert_eq!(stats.layer_status.persisted_transitions, 2);
    }
}
