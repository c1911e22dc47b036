//! Performance and transition counters for both layers

pub mod aggregator;

pub use aggregator::{StatsAggregator, StatsSnapshot};
