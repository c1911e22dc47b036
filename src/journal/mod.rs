//! Write path from the real-time layer to the historical store
//!
//! The detector pushes transitions onto a bounded [`TransitionQueue`]; the
//! [`EventJournal`] drains it on an interval off the hot path.

pub mod queue;
pub mod writer;

pub use queue::TransitionQueue;
pub use writer::{EventJournal, JournalError};
