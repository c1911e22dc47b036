//! Per-signal debounce windows and warning state machine

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::window::TimeWindow;
use crate::data::{
    EventState, Severity, ThresholdConfig, TransitionKind, Violation, ViolationRecord,
    WarningEvent, MAX_WINDOW_RECORDS,
};

/// Result of evaluating one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// In bounds with no open event
    Normal,
    /// Out of bounds, but not enough violations inside the trigger window yet
    Pending,
    /// Out of bounds, but not after the signal's last episode; not counted
    Late,
    /// In bounds while an event is open, not yet recovered
    Normalizing,
    WarningActive,
    CriticalActive,
    /// This sample closed the open event
    Recovered,
}

impl Outcome {
    fn active(severity: Severity) -> Self {
        match severity {
            Severity::Warning => Outcome::WarningActive,
            Severity::Critical => Outcome::CriticalActive,
        }
    }
}

/// The open event of a signal together with the config it was opened under
#[derive(Debug)]
pub struct ActiveEpisode {
    pub event: WarningEvent,
    pub config: Arc<ThresholdConfig>,
}

#[derive(Debug)]
pub struct Observation {
    pub outcome: Outcome,
    /// Lifecycle change and the event snapshot after it, if any
    pub transition: Option<(TransitionKind, WarningEvent)>,
}

impl Observation {
    fn quiet(outcome: Outcome) -> Self {
        Self {
            outcome,
            transition: None,
        }
    }
}

/// Detector state owned by a single signal
#[derive(Debug)]
pub struct SignalState {
    violations: TimeWindow<ViolationRecord>,
    recoveries: TimeWindow<f64>,
    active: Option<ActiveEpisode>,
    /// Time of the last recovery, or of a persisted episode seeded at startup.
    /// A new episode must start strictly after it, which keeps event ids unique.
    watermark: Option<DateTime<Utc>>,
}

impl SignalState {
    pub fn new() -> Self {
        Self {
            violations: TimeWindow::with_capacity(MAX_WINDOW_RECORDS),
            recoveries: TimeWindow::with_capacity(MAX_WINDOW_RECORDS),
            active: None,
            watermark: None,
        }
    }

    /// Move the watermark forward to `at`; never moves it back
    pub fn raise_watermark(&mut self, at: DateTime<Utc>) {
        self.watermark = Some(self.watermark.map_or(at, |mark| mark.max(at)));
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    /// Config captured when the open event started
    pub fn active_config(&self) -> Option<Arc<ThresholdConfig>> {
        self.active.as_ref().map(|a| Arc::clone(&a.config))
    }

    pub fn active_event(&self) -> Option<&WarningEvent> {
        self.active.as_ref().map(|a| &a.event)
    }

    pub fn active_event_mut(&mut self) -> Option<&mut WarningEvent> {
        self.active.as_mut().map(|a| &mut a.event)
    }

    pub fn pending_violations(&self) -> usize {
        self.violations.len()
    }

    /// Evaluate one sample. While an event is open, `config` must be the
    /// episode's captured config.
    pub fn observe(
        &mut self,
        config: &Arc<ThresholdConfig>,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Observation {
        match (config.classify(value), self.active.is_some()) {
            (Some(_), false) if self.watermark.is_some_and(|mark| timestamp <= mark) => {
                tracing::debug!(
                    signal_id = %config.signal_id,
                    timestamp = %timestamp,
                    "Ignoring violation at or before the previous episode"
                );
                Observation::quiet(Outcome::Late)
            }
            (Some(violation), false) => self.on_violation(config, value, timestamp, violation),
            (Some(violation), true) => self.on_active_violation(value, violation),
            (None, true) => self.on_active_normal(timestamp),
            (None, false) => {
                self.violations.prune(timestamp, config.trigger_window);
                Observation::quiet(Outcome::Normal)
            }
        }
    }

    fn on_violation(
        &mut self,
        config: &Arc<ThresholdConfig>,
        value: f64,
        timestamp: DateTime<Utc>,
        violation: Violation,
    ) -> Observation {
        self.recoveries.clear();
        self.violations
            .push(timestamp, ViolationRecord::new(timestamp, value, violation));
        self.violations.prune(timestamp, config.trigger_window);

        if self.violations.len() < config.trigger_count as usize {
            return Observation::quiet(Outcome::Pending);
        }

        let Some(event) = self.open(config, value) else {
            return Observation::quiet(Outcome::Pending);
        };
        self.violations.clear();

        tracing::warn!(
            event_id = %event.event_id,
            signal_id = %event.signal_id,
            severity = %event.severity,
            trigger_value = event.trigger_value,
            "Warning event opened"
        );

        let outcome = Outcome::active(event.severity);
        self.active = Some(ActiveEpisode {
            event: event.clone(),
            config: Arc::clone(config),
        });

        Observation {
            outcome,
            transition: Some((TransitionKind::Opened, event)),
        }
    }

    /// Build the event from the satisfied trigger window
    fn open(&self, config: &ThresholdConfig, value: f64) -> Option<WarningEvent> {
        let records: Vec<&ViolationRecord> = self.violations.iter().map(|(_, r)| r).collect();

        // Latest record of the worst severity seen in the window
        let worst = records
            .iter()
            .copied()
            .fold(None::<&ViolationRecord>, |best, r| match best {
                Some(b) if b.severity > r.severity => Some(b),
                _ => Some(r),
            });
        let max_deviation = records.iter().map(|r| r.deviation).fold(0.0, f64::max);

        let (start, _) = *self.violations.first()?;
        let worst = *worst?;

        Some(WarningEvent {
            event_id: WarningEvent::make_id(&config.signal_id, start),
            signal_id: config.signal_id.clone(),
            signal_type: config.signal_type.clone(),
            severity: worst.severity,
            state: EventState::Active,
            threshold_type: worst.threshold_type,
            threshold_value: worst.threshold,
            trigger_value: value,
            trigger_count: records.len() as u32,
            max_deviation,
            event_start_time: start,
            event_end_time: None,
            duration: None,
            message: config.describe(&worst.violation()),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
        })
    }

    fn on_active_violation(&mut self, value: f64, violation: Violation) -> Observation {
        self.recoveries.clear();

        let Some(episode) = self.active.as_mut() else {
            return Observation::quiet(Outcome::Pending);
        };
        let event = &mut episode.event;

        event.trigger_count = event.trigger_count.saturating_add(1);
        event.max_deviation = event.max_deviation.max(violation.deviation);

        if violation.severity <= event.severity {
            return Observation::quiet(Outcome::active(event.severity));
        }

        event.severity = violation.severity;
        event.threshold_type = violation.threshold_type;
        event.threshold_value = violation.threshold;
        event.message = episode.config.describe(&violation);

        tracing::warn!(
            event_id = %event.event_id,
            severity = %event.severity,
            value,
            "Warning event escalated"
        );

        Observation {
            outcome: Outcome::active(event.severity),
            transition: Some((TransitionKind::Escalated, event.clone())),
        }
    }

    fn on_active_normal(&mut self, timestamp: DateTime<Utc>) -> Observation {
        let Some(episode) = self.active.as_ref() else {
            return Observation::quiet(Outcome::Normal);
        };
        let config = Arc::clone(&episode.config);
        let held_for = (timestamp - episode.event.event_start_time)
            .to_std()
            .unwrap_or_default();

        self.recoveries.push(timestamp, 0.0);
        self.recoveries.prune(timestamp, config.recovery_window);

        if self.recoveries.len() < config.recovery_count as usize
            || held_for < config.min_event_duration
        {
            return Observation::quiet(Outcome::Normalizing);
        }

        let Some(ActiveEpisode { mut event, .. }) = self.active.take() else {
            return Observation::quiet(Outcome::Normal);
        };
        event.recover(timestamp);
        self.violations.clear();
        self.recoveries.clear();
        self.raise_watermark(timestamp);

        tracing::info!(
            event_id = %event.event_id,
            duration_secs = event.duration.unwrap_or_default(),
            "Warning event recovered"
        );

        Observation {
            outcome: Outcome::Recovered,
            transition: Some((TransitionKind::Recovered, event)),
        }
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn at(secs: f64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + (secs * 1000.0) as i64)
            .unwrap()
    }

    fn ppa2() -> Arc<ThresholdConfig> {
        Arc::new(
            ThresholdConfig::new("PPA:2", "frequency")
                .with_warning(Some(59.85), Some(60.15))
                .with_critical(Some(59.5), Some(60.5))
                .with_trigger(3, Duration::from_secs(5))
                .with_recovery(2, Duration::from_secs(3)),
        )
    }

    fn open(state: &mut SignalState, config: &Arc<ThresholdConfig>) -> WarningEvent {
        state.observe(config, 60.2, at(0.0));
        state.observe(config, 60.2, at(1.0));
        let obs = state.observe(config, 60.2, at(2.0));
        match obs.transition {
            Some((TransitionKind::Opened, event)) => event,
            other => panic!("expected open, got {:?}", other),
        }
    }

    #[test]
    fn test_opens_on_third_violation_with_first_start_time() {
        let config = ppa2();
        let mut state = SignalState::new();

        assert_eq!(state.observe(&config, 60.2, at(0.0)).outcome, Outcome::Pending);
        assert_eq!(state.observe(&config, 60.3, at(1.0)).outcome, Outcome::Pending);

        let obs = state.observe(&config, 60.25, at(2.0));
        assert_eq!(obs.outcome, Outcome::WarningActive);

        let (kind, event) = obs.transition.unwrap();
        assert_eq!(kind, TransitionKind::Opened);
        assert_eq!(event.event_start_time, at(0.0));
        assert_eq!(event.event_id, "PPA:2_1700000000000");
        assert_eq!(event.trigger_value, 60.25);
        assert_eq!(event.trigger_count, 3);
        assert!((event.max_deviation - 0.15).abs() < 1e-9);
        assert_eq!(event.threshold_value, 60.15);
    }

    #[test]
    fn test_violations_outside_window_do_not_count() {
        let config = ppa2();
        let mut state = SignalState::new();

        state.observe(&config, 60.2, at(0.0));
        state.observe(&config, 60.2, at(1.0));
        // First two fall out of the 5s window
        let obs = state.observe(&config, 60.2, at(7.0));
        assert_eq!(obs.outcome, Outcome::Pending);
        assert_eq!(state.pending_violations(), 1);
    }

    #[test]
    fn test_exact_bound_is_normal() {
        let config = ppa2();
        let mut state = SignalState::new();

        for s in 0..5 {
            let obs = state.observe(&config, 60.15, at(s as f64));
            assert_eq!(obs.outcome, Outcome::Normal);
        }
        assert!(state.active_event().is_none());
    }

    #[test]
    fn test_open_takes_worst_severity_in_window() {
        let config = ppa2();
        let mut state = SignalState::new();

        state.observe(&config, 61.0, at(0.0));
        state.observe(&config, 60.2, at(1.0));
        let (_, event) = state.observe(&config, 60.2, at(2.0)).transition.unwrap();

        assert_eq!(event.severity, Severity::Critical);
        assert_eq!(event.threshold_value, 60.5);
        assert!(event.message.starts_with("CRITICAL"));
    }

    #[test]
    fn test_escalation_without_second_event_and_no_deescalation() {
        let config = ppa2();
        let mut state = SignalState::new();
        let opened = open(&mut state, &config);

        let obs = state.observe(&config, 60.8, at(3.0));
        assert_eq!(obs.outcome, Outcome::CriticalActive);
        let (kind, escalated) = obs.transition.unwrap();
        assert_eq!(kind, TransitionKind::Escalated);
        assert_eq!(escalated.event_id, opened.event_id);
        assert_eq!(escalated.severity, Severity::Critical);

        // Back inside critical, still outside warning: stays CRITICAL, no transition
        let obs = state.observe(&config, 60.2, at(4.0));
        assert_eq!(obs.outcome, Outcome::CriticalActive);
        assert!(obs.transition.is_none());

        let active = state.active_event().unwrap();
        assert_eq!(active.severity, Severity::Critical);
        assert_eq!(active.trigger_count, 5);
        assert!((active.max_deviation - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_recovery_after_consecutive_normals() {
        let config = ppa2();
        let mut state = SignalState::new();
        open(&mut state, &config);

        assert_eq!(state.observe(&config, 60.0, at(3.0)).outcome, Outcome::Normalizing);
        let obs = state.observe(&config, 60.0, at(4.0));
        assert_eq!(obs.outcome, Outcome::Recovered);

        let (kind, event) = obs.transition.unwrap();
        assert_eq!(kind, TransitionKind::Recovered);
        assert_eq!(event.state, EventState::Recovered);
        assert_eq!(event.event_end_time, Some(at(4.0)));
        assert_eq!(event.duration, Some(4.0));
        assert!(state.active_event().is_none());
    }

    #[test]
    fn test_violation_resets_recovery_progress() {
        let config = ppa2();
        let mut state = SignalState::new();
        open(&mut state, &config);

        state.observe(&config, 60.0, at(3.0));
        state.observe(&config, 60.2, at(3.5));
        assert_eq!(state.observe(&config, 60.0, at(4.0)).outcome, Outcome::Normalizing);
        assert_eq!(state.observe(&config, 60.0, at(5.0)).outcome, Outcome::Recovered);
    }

    #[test]
    fn test_normals_outside_recovery_window_do_not_count() {
        let config = ppa2();
        let mut state = SignalState::new();
        open(&mut state, &config);

        state.observe(&config, 60.0, at(3.0));
        assert_eq!(state.observe(&config, 60.0, at(10.0)).outcome, Outcome::Normalizing);
        assert_eq!(state.observe(&config, 60.0, at(11.0)).outcome, Outcome::Recovered);
    }

    #[test]
    fn test_min_event_duration_holds_recovery() {
        let config = Arc::new(
            ThresholdConfig::clone(&ppa2()).with_min_event_duration(Duration::from_secs(10)),
        );
        let mut state = SignalState::new();
        open(&mut state, &config);

        assert_eq!(state.observe(&config, 60.0, at(3.0)).outcome, Outcome::Normalizing);
        assert_eq!(state.observe(&config, 60.0, at(4.0)).outcome, Outcome::Normalizing);
        assert_eq!(state.observe(&config, 60.0, at(5.0)).outcome, Outcome::Normalizing);
        assert_eq!(state.observe(&config, 60.0, at(9.5)).outcome, Outcome::Normalizing);
        assert_eq!(state.observe(&config, 60.0, at(10.0)).outcome, Outcome::Recovered);
    }

    #[test]
    fn test_new_episode_after_recovery_gets_new_id() {
        let config = ppa2();
        let mut state = SignalState::new();
        let first = open(&mut state, &config);
        state.observe(&config, 60.0, at(3.0));
        state.observe(&config, 60.0, at(4.0));

        state.observe(&config, 60.2, at(10.0));
        state.observe(&config, 60.2, at(11.0));
        let (_, second) = state.observe(&config, 60.2, at(12.0)).transition.unwrap();

        assert_ne!(first.event_id, second.event_id);
        assert_eq!(second.event_start_time, at(10.0));
    }

    #[test]
    fn test_redelivered_samples_do_not_reopen_recovered_episode() {
        let config = ppa2();
        let mut state = SignalState::new();
        let first = open(&mut state, &config);
        state.observe(&config, 60.0, at(3.0));
        state.observe(&config, 60.0, at(4.0));

        for s in [0.0, 1.0, 2.0, 4.0] {
            let obs = state.observe(&config, 60.2, at(s));
            assert_eq!(obs.outcome, Outcome::Late);
            assert!(obs.transition.is_none());
        }
        assert_eq!(state.pending_violations(), 0);

        state.observe(&config, 60.2, at(4.5));
        state.observe(&config, 60.2, at(5.0));
        let (_, second) = state.observe(&config, 60.2, at(6.0)).transition.unwrap();
        assert_eq!(second.event_start_time, at(4.5));
        assert_ne!(second.event_id, first.event_id);
    }

    #[test]
    fn test_seeded_watermark_blocks_earlier_episode() {
        let config = ppa2();
        let mut state = SignalState::new();
        state.raise_watermark(at(2.0));
        state.raise_watermark(at(1.0));
        assert_eq!(state.watermark(), Some(at(2.0)));

        for s in [0.0, 1.0, 2.0] {
            assert_eq!(state.observe(&config, 60.2, at(s)).outcome, Outcome::Late);
        }
        assert!(state.active_event().is_none());
    }

    #[test]
    fn test_oversized_min_event_duration_still_holds() {
        let mut raw = ThresholdConfig::clone(&ppa2());
        raw.min_event_duration = Duration::from_secs(u64::MAX / 2);
        let config = Arc::new(raw);
        let mut state = SignalState::new();
        open(&mut state, &config);

        for s in 3..10 {
            let obs = state.observe(&config, 60.0, at(s as f64));
            assert_eq!(obs.outcome, Outcome::Normalizing);
        }
    }
}
