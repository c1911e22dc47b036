//! Background writer that moves transitions from the queue into the store

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::queue::TransitionQueue;
use crate::alerts::Notifier;
use crate::data::{Transition, TransitionKind, WarningEvent};
use crate::detector::RealTimeDetector;
use crate::stats::StatsAggregator;
use crate::storage::{EventStore, StoreError};

/// Drains the transition queue into the historical store on a fixed interval.
///
/// A failed write keeps its batch and retries it on the next cycle, ahead of
/// anything queued since. The retry batch is bounded by the queue capacity.
/// Notifications for a persisted batch run in their own task.
pub struct EventJournal {
    queue: Arc<TransitionQueue>,
    store: Arc<dyn EventStore>,
    detector: Arc<RealTimeDetector>,
    stats: Arc<StatsAggregator>,
    notifier: Notifier,
    /// Batch being written or awaiting retry. Only `flush` adds or removes
    /// entries; acknowledgment edits them in place.
    pending: Mutex<Vec<Transition>>,
    pending_len: AtomicUsize,
    flushing: Mutex<()>,
    reported_drops: AtomicU64,
    interval: Duration,
    shutdown: watch::Sender<bool>,
}

impl EventJournal {
    pub fn new(
        queue: Arc<TransitionQueue>,
        store: Arc<dyn EventStore>,
        detector: Arc<RealTimeDetector>,
        stats: Arc<StatsAggregator>,
        notifier: Notifier,
        interval: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queue,
            store,
            detector,
            stats,
            notifier,
            pending: Mutex::new(Vec::new()),
            pending_len: AtomicUsize::new(0),
            flushing: Mutex::new(()),
            reported_drops: AtomicU64::new(0),
            interval,
            shutdown,
        }
    }

    pub fn enqueue(&self, transition: Transition) {
        self.queue.push(transition);
    }

    /// Transitions not yet persisted, queued or awaiting retry
    pub fn pending_writes(&self) -> usize {
        self.pending_len.load(Ordering::Relaxed) + self.queue.len()
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Run one drain cycle. Returns the transitions persisted by this call.
    ///
    /// The store write happens without holding the pending lock, so stats and
    /// acknowledgment never wait on durable I/O.
    pub fn flush(&self) -> Result<Vec<Transition>, JournalError> {
        let _flushing = self.flushing.lock();

        let (batch_len, events) = {
            let mut pending = self.pending.lock();
            pending.extend(self.queue.drain());
            self.report_queue_drops();

            let capacity = self.queue.capacity();
            if pending.len() > capacity {
                let excess = pending.len() - capacity;
                pending.drain(..excess);
                self.queue.record_dropped(excess);
                tracing::warn!(
                    dropped = excess,
                    "Journal retry batch over capacity, dropped oldest transitions"
                );
            }
            self.pending_len.store(pending.len(), Ordering::Relaxed);

            if pending.is_empty() {
                return Ok(Vec::new());
            }
            (pending.len(), latest_snapshots(&pending))
        };

        match self.store.upsert_batch(&events) {
            Ok(()) => {
                let persisted: Vec<Transition> = {
                    let mut pending = self.pending.lock();
                    let persisted = pending.drain(..batch_len).collect();
                    self.pending_len.store(pending.len(), Ordering::Relaxed);
                    persisted
                };
                self.stats.record_drain_success(persisted.len());
                tracing::debug!(
                    transitions = persisted.len(),
                    events = events.len(),
                    "Journal batch persisted"
                );
                Ok(persisted)
            }
            Err(e) => {
                self.stats.record_drain_failure(&e.to_string());
                tracing::error!(
                    error = %e,
                    pending = batch_len,
                    "Journal write failed, batch kept for retry"
                );
                Err(e.into())
            }
        }
    }

    fn report_queue_drops(&self) {
        let dropped = self.queue.dropped();
        let reported = self.reported_drops.swap(dropped, Ordering::Relaxed);
        if dropped > reported {
            tracing::warn!(
                dropped = dropped - reported,
                total = dropped,
                "Journal queue overflowed, oldest transitions were lost"
            );
        }
    }

    /// Acknowledge an event wherever it currently lives: the detector's
    /// active table, the write path, or the store.
    pub fn acknowledge(
        &self,
        event_id: &str,
        user: &str,
        at: DateTime<Utc>,
    ) -> Result<WarningEvent, JournalError> {
        if let Some(event) = self.detector.acknowledge(event_id, user, at) {
            return Ok(event);
        }

        // Holding the pending lock keeps a concurrent flush from moving the
        // event between the checks below. A flush only removes its batch after
        // the store has it.
        let mut pending = self.pending.lock();

        let queued = self.queue.acknowledge(event_id, user, at);
        let mut retrying = None;
        for transition in pending.iter_mut().filter(|t| t.event.event_id == event_id) {
            transition.event.acknowledge(user, at);
            retrying = Some(transition.event.clone());
        }
        if let Some(event) = &retrying {
            // The copy in `pending` may already be mid-write
            self.queue
                .push(Transition::new(TransitionKind::Acknowledged, event.clone()));
        }
        if let Some(event) = queued.or(retrying) {
            tracing::info!(event_id = %event_id, user = %user, "Unpersisted event acknowledged");
            return Ok(event);
        }

        let mut event = self
            .store
            .get(event_id)?
            .ok_or_else(|| JournalError::EventNotFound(event_id.to_string()))?;
        drop(pending);

        event.acknowledge(user, at);
        self.queue
            .push(Transition::new(TransitionKind::Acknowledged, event.clone()));

        tracing::info!(event_id = %event_id, user = %user, "Historical event acknowledged");
        Ok(event)
    }

    /// Start the background drain loop
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            tracing::info!("Event journal started with interval {:?}", self.interval);

            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while !*shutdown.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.drain_cycle().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            // Final flush so nothing accepted before shutdown is lost
            if let Some(notifications) = self.drain_cycle().await {
                if time::timeout(SHUTDOWN_NOTIFY_GRACE, notifications).await.is_err() {
                    tracing::warn!("Final notifications still pending at shutdown");
                }
            }
            tracing::info!(pending = self.pending_writes(), "Event journal stopped");
        })
    }

    /// Flush on the blocking pool, then hand persisted transitions to a
    /// separate notification task.
    async fn drain_cycle(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let journal = Arc::clone(self);
        let persisted = match tokio::task::spawn_blocking(move || journal.flush()).await {
            Ok(Ok(persisted)) => persisted,
            // Already logged and counted by flush
            Ok(Err(_)) => return None,
            Err(e) => {
                tracing::error!(error = %e, "Journal flush task failed");
                return None;
            }
        };
        if persisted.is_empty() || !self.notifier.is_enabled() {
            return None;
        }

        let journal = Arc::clone(self);
        Some(tokio::spawn(async move {
            journal.notifier.notify_batch(&persisted).await;
        }))
    }

    /// Signal the drain loop to flush once more and exit
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

const SHUTDOWN_NOTIFY_GRACE: Duration = Duration::from_secs(5);

/// Last snapshot per event, in order of first appearance
fn latest_snapshots(transitions: &[Transition]) -> Vec<WarningEvent> {
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut events: Vec<WarningEvent> = Vec::with_capacity(transitions.len());
    for transition in transitions {
        match slots.get(transition.event.event_id.as_str()) {
            Some(&slot) => events[slot] = transition.event.clone(),
            None => {
                slots.insert(transition.event.event_id.as_str(), events.len());
                events.push(transition.event.clone());
            }
        }
    }
    events
}

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
