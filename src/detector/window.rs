use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// Fixed-capacity, time-ordered record window.
///
/// When full, pushing evicts the oldest record. Records are pruned by age
/// relative to the timestamp of the newest sample.
#[derive(Debug)]
pub struct TimeWindow<T> {
    entries: VecDeque<(DateTime<Utc>, T)>,
    capacity: usize,
}

impl<T> TimeWindow<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, timestamp: DateTime<Utc>, record: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((timestamp, record));
    }

    /// Drop records older than `window` before `now`. A record exactly
    /// `window` old is kept, and nothing is dropped if the cutoff falls
    /// outside the representable range.
    pub fn prune(&mut self, now: DateTime<Utc>, window: std::time::Duration) {
        let Some(cutoff) = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| now.checked_sub_signed(w))
        else {
            return;
        };
        while let Some((ts, _)) = self.entries.front() {
            if *ts < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn first(&self) -> Option<&(DateTime<Utc>, T)> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(DateTime<Utc>, T)> {
        self.entries.iter()
    }
}
