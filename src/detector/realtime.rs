//! Latency-critical threshold evaluation

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use serde::Serialize;

use super::registry::ThresholdRegistry;
use super::state::{Outcome, SignalState};
use crate::data::{Sample, Transition, TransitionKind, WarningEvent};
use crate::journal::TransitionQueue;
use crate::stats::StatsAggregator;

/// Result of a single check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub signal_id: String,
    pub outcome: Outcome,
    /// Whether a threshold config existed for the signal
    pub configured: bool,
    /// Lifecycle change caused by this sample, if any
    pub transition: Option<TransitionKind>,
    /// Snapshot of the signal's event after the check, if one is or was open
    pub event: Option<WarningEvent>,
}

/// Evaluates samples against the threshold registry.
///
/// State is sharded per signal: each signal owns a [`SignalState`] behind its
/// own mutex, so checks for different signals never contend and checks for
/// the same signal are serialized.
pub struct RealTimeDetector {
    registry: Arc<ThresholdRegistry>,
    signals: DashMap<String, Arc<Mutex<SignalState>>>,
    /// event_id -> signal_id for open events
    active_index: DashMap<String, String>,
    unknown_signals: DashSet<String>,
    queue: Arc<TransitionQueue>,
    stats: Arc<StatsAggregator>,
}

impl RealTimeDetector {
    pub fn new(
        registry: Arc<ThresholdRegistry>,
        queue: Arc<TransitionQueue>,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        tracing::info!(signals = registry.len(), "Real-time detector initialized");
        Self {
            registry,
            signals: DashMap::new(),
            active_index: DashMap::new(),
            unknown_signals: DashSet::new(),
            queue,
            stats,
        }
    }

    /// Evaluate one sample. Never performs I/O.
    pub fn check(
        &self,
        signal_id: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<CheckResult, DetectorError> {
        let started = Instant::now();

        let sample = Sample::new(signal_id, value, timestamp);
        if let Some(reason) = sample.defect() {
            self.stats.record_invalid();
            return Err(DetectorError::InvalidSample(reason));
        }

        let result = match self.shard(signal_id) {
            Some(shard) => self.evaluate(&shard, signal_id, value, timestamp),
            None => self.unconfigured(signal_id),
        };

        self.stats.record_check(started.elapsed());
        Ok(result)
    }

    pub fn check_sample(&self, sample: &Sample) -> Result<CheckResult, DetectorError> {
        self.check(&sample.signal_id, sample.value, sample.timestamp)
    }

    /// State of a signal, created on first sight if it is configured
    fn shard(&self, signal_id: &str) -> Option<Arc<Mutex<SignalState>>> {
        if let Some(shard) = self.signals.get(signal_id) {
            return Some(shard.value().clone());
        }
        if !self.registry.contains(signal_id) {
            return None;
        }
        let shard = self
            .signals
            .entry(signal_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SignalState::new())));
        Some(shard.value().clone())
    }

    fn evaluate(
        &self,
        shard: &Mutex<SignalState>,
        signal_id: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> CheckResult {
        let mut state = shard.lock();

        // An open episode keeps the config it started with
        let config = match state.active_config() {
            Some(config) => config,
            None => match self.registry.get(signal_id) {
                Ok(config) => config,
                Err(_) => {
                    drop(state);
                    return self.unconfigured(signal_id);
                }
            },
        };

        let observation = state.observe(&config, value, timestamp);

        let event = match &observation.transition {
            Some((kind, event)) => {
                match kind {
                    TransitionKind::Opened => {
                        self.active_index
                            .insert(event.event_id.clone(), signal_id.to_string());
                    }
                    TransitionKind::Recovered => {
                        self.active_index.remove(&event.event_id);
                    }
                    _ => {}
                }
                self.stats.record_transition(*kind, event);
                // Pushed under the signal lock so the queue preserves per-signal order
                self.queue.push(Transition::new(*kind, event.clone()));
                Some(event.clone())
            }
            None => state.active_event().cloned(),
        };

        CheckResult {
            signal_id: signal_id.to_string(),
            outcome: observation.outcome,
            configured: true,
            transition: observation.transition.map(|(kind, _)| kind),
            event,
        }
    }

    fn unconfigured(&self, signal_id: &str) -> CheckResult {
        self.stats.record_unknown_signal();
        if self.unknown_signals.insert(signal_id.to_string()) {
            tracing::warn!(signal_id = %signal_id, "No threshold configured for signal, treating as normal");
        }
        CheckResult {
            signal_id: signal_id.to_string(),
            outcome: Outcome::Normal,
            configured: false,
            transition: None,
            event: None,
        }
    }

    /// Acknowledge an open event in place. Returns the updated copy, or
    /// `None` if `event_id` is not currently active.
    pub fn acknowledge(
        &self,
        event_id: &str,
        user: &str,
        at: DateTime<Utc>,
    ) -> Option<WarningEvent> {
        let signal_id = self.active_index.get(event_id)?.value().clone();
        let shard = self.signals.get(&signal_id).map(|s| s.value().clone())?;

        let mut state = shard.lock();
        let event = state
            .active_event_mut()
            .filter(|e| e.event_id == event_id)?;
        event.acknowledge(user, at);
        let snapshot = event.clone();

        self.queue
            .push(Transition::new(TransitionKind::Acknowledged, snapshot.clone()));

        tracing::info!(event_id = %event_id, user = %user, "Active event acknowledged");
        Some(snapshot)
    }

    /// Copy of every open event, sorted newest first
    pub fn active_events(&self) -> Vec<WarningEvent> {
        let shards: Vec<Arc<Mutex<SignalState>>> =
            self.signals.iter().map(|e| Arc::clone(e.value())).collect();

        let mut events: Vec<WarningEvent> = shards
            .iter()
            .filter_map(|shard| shard.lock().active_event().cloned())
            .collect();
        events.sort_by(|a, b| b.event_start_time.cmp(&a.event_start_time));
        events
    }

    pub fn active_count(&self) -> usize {
        self.active_index.len()
    }

    pub fn registry(&self) -> &Arc<ThresholdRegistry> {
        &self.registry
    }

    /// Carry the latest persisted episode time of each signal into its state,
    /// so samples at or before it cannot open an event with a reused id.
    pub fn seed_watermarks(&self, marks: impl IntoIterator<Item = (String, DateTime<Utc>)>) {
        let mut seeded = 0usize;
        for (signal_id, at) in marks {
            let shard = self
                .signals
                .entry(signal_id)
                .or_insert_with(|| Arc::new(Mutex::new(SignalState::new())))
                .value()
                .clone();
            shard.lock().raise_watermark(at);
            seeded += 1;
        }
        tracing::info!(signals = seeded, "Detector watermarks restored from history");
    }

    /// Forget the "unknown signal" log suppression, e.g. after a threshold reload
    pub fn reset_unknown_signals(&self) {
        self.unknown_signals.clear();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("Invalid sample: {0}")]
    InvalidSample(String),
}
