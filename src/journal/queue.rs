//! Bounded hand-off between the detector and the journal writer

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::data::{Transition, WarningEvent};

/// Bounded transition queue. When full, the oldest queued transition is
/// dropped so the newest state always gets through.
#[derive(Debug)]
pub struct TransitionQueue {
    entries: Mutex<VecDeque<Transition>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl TransitionQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking on anything but the queue mutex
    pub fn push(&self, transition: Transition) {
        let evicted = {
            let mut entries = self.entries.lock();
            let evicted = if entries.len() >= self.capacity {
                entries.pop_front()
            } else {
                None
            };
            entries.push_back(transition);
            evicted
        };

        if let Some(old) = evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                event_id = %old.event.event_id,
                kind = ?old.kind,
                "Journal queue full, dropped oldest transition"
            );
        }
    }

    /// Take everything queued so far
    pub fn drain(&self) -> Vec<Transition> {
        let mut entries = self.entries.lock();
        entries.drain(..).collect()
    }

    /// Apply an acknowledgment to every queued copy of `event_id`.
    /// Returns the newest acknowledged copy, if any was queued.
    pub fn acknowledge(&self, event_id: &str, user: &str, at: DateTime<Utc>) -> Option<WarningEvent> {
        let mut entries = self.entries.lock();
        let mut latest = None;
        for transition in entries.iter_mut().filter(|t| t.event.event_id == event_id) {
            transition.event.acknowledge(user, at);
            latest = Some(transition.event.clone());
        }
        latest
    }

    /// Count transitions discarded outside of `push` (e.g. an oversized retry batch)
    pub fn record_dropped(&self, count: usize) {
        self.dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total transitions dropped since start
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{EventState, Severity, ThresholdType, TransitionKind};

    fn transition(event_id: &str, kind: TransitionKind) -> Transition {
        let now = Utc::now();
        Transition::new(
            kind,
            WarningEvent {
                event_id: event_id.to_string(),
                signal_id: "PPA:2".to_string(),
                signal_type: "frequency".to_string(),
                severity: Severity::Warning,
                state: EventState::Active,
                threshold_type: ThresholdType::Max,
                threshold_value: 60.15,
                trigger_value: 60.2,
                trigger_count: 3,
                max_deviation: 0.05,
                event_start_time: now,
                event_end_time: None,
                duration: None,
                message: String::new(),
                acknowledged: false,
                acknowledged_by: None,
                acknowledged_at: None,
            },
        )
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let queue = TransitionQueue::new(2);
        queue.push(transition("a", TransitionKind::Opened));
        queue.push(transition("b", TransitionKind::Opened));
        queue.push(transition("c", TransitionKind::Opened));

        assert_eq!(queue.dropped(), 1);
        let ids: Vec<String> = queue.drain().into_iter().map(|t| t.event.event_id).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_acknowledge_queued_copies() {
        let queue = TransitionQueue::new(8);
        queue.push(transition("a", TransitionKind::Opened));
        queue.push(transition("b", TransitionKind::Opened));
        queue.push(transition("a", TransitionKind::Recovered));

        let acked = queue.acknowledge("a", "operator", Utc::now()).unwrap();
        assert!(acked.acknowledged);
        assert!(queue.acknowledge("zzz", "operator", Utc::now()).is_none());

        let drained = queue.drain();
        assert!(drained
            .iter()
            .filter(|t| t.event.event_id == "a")
            .all(|t| t.event.acknowledged_by.as_deref() == Some("operator")));
        assert!(!drained[1].event.acknowledged);
    }
}
