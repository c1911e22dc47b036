//! In-process event store, used for tests and `GRIDWATCH_DATA_DIR=memory`

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{latest_per_signal, select, EventStore, HistoryFilter, StoreError};
use crate::data::WarningEvent;

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: RwLock<HashMap<String, WarningEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn upsert_batch(&self, events: &[WarningEvent]) -> Result<(), StoreError> {
        let mut stored = self.events.write();
        for event in events {
            stored.insert(event.event_id.clone(), event.clone());
        }
        Ok(())
    }

    fn get(&self, event_id: &str) -> Result<Option<WarningEvent>, StoreError> {
        Ok(self.events.read().get(event_id).cloned())
    }

    fn query(&self, filter: &HistoryFilter) -> Result<Vec<WarningEvent>, StoreError> {
        Ok(select(self.events.read().values(), filter))
    }

    fn watermarks(&self) -> Result<HashMap<String, DateTime<Utc>>, StoreError> {
        Ok(latest_per_signal(self.events.read().values()))
    }

    fn len(&self) -> usize {
        self.events.read().len()
    }
}
