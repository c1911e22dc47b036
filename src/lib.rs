//! Gridwatch: two-layer threshold monitoring for streaming grid measurements
//!
//! Samples `(signal_id, value, timestamp)` are checked against per-signal
//! threshold bands by an in-memory detector that never blocks on I/O.
//! Warning lifecycle changes are handed to a background journal which
//! persists them in batches and serves history and statistics.
//!
//! # Features
//!
//! - **Debounced detection**: N violations inside a time window open an event
//! - **Consecutive recovery**: M in-band samples inside a window close it
//! - **Severity escalation**: WARNING events escalate to CRITICAL in place
//! - **Per-signal sharding**: checks for different signals never contend
//! - **Durable history**: append-only JSON-lines journal with idempotent upserts
//! - **Notifications**: persisted transitions fan out to log and webhooks
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::Utc;
//! use gridwatch::data::default_thresholds;
//! use gridwatch::detector::{RealTimeDetector, ThresholdRegistry};
//! use gridwatch::journal::TransitionQueue;
//! use gridwatch::stats::StatsAggregator;
//!
//! let registry = Arc::new(ThresholdRegistry::with_configs(default_thresholds()).unwrap());
//! let queue = Arc::new(TransitionQueue::new(1024));
//! let detector = RealTimeDetector::new(registry, queue, Arc::new(StatsAggregator::new()));
//!
//! let result = detector.check("PMU_frequency", 60.3, Utc::now()).unwrap();
//! println!("Outcome: {:?}", result.outcome);
//! ```

pub mod alerts;
pub mod api;
pub mod data;
pub mod detector;
pub mod journal;
pub mod query;
pub mod stats;
pub mod storage;

// Re-export commonly used types
pub use data::{Sample, Severity, ThresholdConfig, WarningEvent};
pub use detector::{CheckResult, Outcome, RealTimeDetector, ThresholdRegistry};
pub use journal::EventJournal;
pub use query::{QueryService, Stats};
pub use storage::{EventStore, StoreError};
