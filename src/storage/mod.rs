//! Historical layer: durable store of warning event snapshots
//!
//! Events are keyed by `event_id`; writing the same id again replaces the
//! earlier snapshot, so replaying a batch is harmless.

pub mod file;
pub mod memory;

pub use file::FileEventStore;
pub use memory::MemoryEventStore;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::data::{EventState, Severity, WarningEvent};

/// Default and maximum number of rows returned by a historical query
pub const DEFAULT_QUERY_LIMIT: usize = 100;
pub const MAX_QUERY_LIMIT: usize = 10_000;

/// Trait for historical event stores
pub trait EventStore: Send + Sync {
    /// Insert or replace each event by `event_id`
    fn upsert_batch(&self, events: &[WarningEvent]) -> Result<(), StoreError>;

    fn get(&self, event_id: &str) -> Result<Option<WarningEvent>, StoreError>;

    /// Events matching `filter`, newest first
    fn query(&self, filter: &HistoryFilter) -> Result<Vec<WarningEvent>, StoreError>;

    /// Latest recorded episode time per signal: the end of a recovered
    /// event, or the start of one still active.
    fn watermarks(&self) -> Result<HashMap<String, DateTime<Utc>>, StoreError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Historical query filter. All predicates are optional and combine with AND.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryFilter {
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub signal_id: Option<String>,
    #[serde(default)]
    pub state: Option<EventState>,
    /// Inclusive lower bound on `event_start_time`
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `event_start_time`
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_QUERY_LIMIT
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            severity: None,
            signal_id: None,
            state: None,
            start_time: None,
            end_time: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl HistoryFilter {
    pub fn with_signal(mut self, signal_id: impl Into<String>) -> Self {
        self.signal_id = Some(signal_id.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_state(mut self, state: EventState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_range(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, event: &WarningEvent) -> bool {
        if let Some(severity) = self.severity {
            if event.severity != severity {
                return false;
            }
        }
        if let Some(signal_id) = &self.signal_id {
            if &event.signal_id != signal_id {
                return false;
            }
        }
        if let Some(state) = self.state {
            if event.state != state {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if event.event_start_time < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if event.event_start_time > end {
                return false;
            }
        }
        true
    }

    /// Limit clamped to `1..=MAX_QUERY_LIMIT`
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_QUERY_LIMIT)
    }
}

/// Filter, sort newest first and truncate. Shared by the store implementations.
pub(crate) fn select<'a, I>(events: I, filter: &HistoryFilter) -> Vec<WarningEvent>
where
    I: Iterator<Item = &'a WarningEvent>,
{
    let mut selected: Vec<WarningEvent> = events.filter(|e| filter.matches(e)).cloned().collect();
    selected.sort_by(|a, b| {
        b.event_start_time
            .cmp(&a.event_start_time)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
    selected.truncate(filter.effective_limit());
    selected
}

pub(crate) fn latest_per_signal<'a, I>(events: I) -> HashMap<String, DateTime<Utc>>
where
    I: Iterator<Item = &'a WarningEvent>,
{
    let mut marks: HashMap<String, DateTime<Utc>> = HashMap::new();
    for event in events {
        let at = event.event_end_time.unwrap_or(event.event_start_time);
        marks
            .entry(event.signal_id.clone())
            .and_modify(|mark| *mark = (*mark).max(at))
            .or_insert(at);
    }
    marks
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
