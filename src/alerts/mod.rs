//! Notifications for persisted warning transitions
//!
//! After the journal persists a batch, each opened, escalated or recovered
//! event is announced to the configured targets (log and webhooks).

pub mod config;
pub mod notifier;

pub use config::{NotifyConfig, NotifyTarget};
pub use notifier::{Notifier, NotifierError};
