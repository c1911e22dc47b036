//! Warning event lifecycle types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::threshold::Violation;

/// Severity of a threshold violation. Ordered so that escalation is `>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 2] = [Severity::Warning, Severity::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WARNING" => Ok(Severity::Warning),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// Lifecycle state of a warning event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventState {
    Active,
    Recovered,
}

impl std::str::FromStr for EventState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(EventState::Active),
            "RECOVERED" => Ok(EventState::Recovered),
            other => Err(format!("unknown event state '{}'", other)),
        }
    }
}

/// Which side of the band was breached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdType {
    Min,
    Max,
}

/// One out-of-bounds sample held in a signal's trigger window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViolationRecord {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub severity: Severity,
    pub threshold_type: ThresholdType,
    pub threshold: f64,
    pub deviation: f64,
}

impl ViolationRecord {
    pub fn new(timestamp: DateTime<Utc>, value: f64, violation: Violation) -> Self {
        Self {
            timestamp,
            value,
            severity: violation.severity,
            threshold_type: violation.threshold_type,
            threshold: violation.threshold,
            deviation: violation.deviation,
        }
    }

    pub fn violation(&self) -> Violation {
        Violation {
            severity: self.severity,
            threshold_type: self.threshold_type,
            threshold: self.threshold,
            deviation: self.deviation,
        }
    }
}

/// A warning episode for one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningEvent {
    pub event_id: String,
    pub signal_id: String,
    pub signal_type: String,
    pub severity: Severity,
    pub state: EventState,
    pub threshold_type: ThresholdType,
    pub threshold_value: f64,
    /// Value of the sample that opened the event
    pub trigger_value: f64,
    /// Violations counted against this event, including those that opened it
    pub trigger_count: u32,
    /// Largest distance past the breached bound seen while active
    pub max_deviation: f64,
    pub event_start_time: DateTime<Utc>,
    #[serde(default)]
    pub event_end_time: Option<DateTime<Utc>>,
    /// Seconds between start and end, set on recovery
    #[serde(default)]
    pub duration: Option<f64>,
    pub message: String,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl WarningEvent {
    /// Deterministic id for the episode of `signal_id` starting at `start`
    pub fn make_id(signal_id: &str, start: DateTime<Utc>) -> String {
        format!("{}_{}", signal_id, start.timestamp_millis())
    }

    pub fn is_active(&self) -> bool {
        self.state == EventState::Active
    }

    /// Record an acknowledgment. Independent of lifecycle state.
    pub fn acknowledge(&mut self, user: &str, at: DateTime<Utc>) {
        self.acknowledged = true;
        self.acknowledged_by = Some(user.to_string());
        self.acknowledged_at = Some(at);
    }

    /// Close the event at `end`
    pub fn recover(&mut self, end: DateTime<Utc>) {
        let duration = (end - self.event_start_time).num_milliseconds() as f64 / 1000.0;
        self.state = EventState::Recovered;
        self.event_end_time = Some(end);
        self.duration = Some(duration);
        self.message
            .push_str(&format!(" | Recovered after {:.1}s", duration));
    }
}

/// Kind of lifecycle change handed from the detector to the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Opened,
    Escalated,
    Recovered,
    Acknowledged,
}

/// Snapshot of an event at the moment it changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub kind: TransitionKind,
    pub event: WarningEvent,
}

impl Transition {
    pub fn new(kind: TransitionKind, event: WarningEvent) -> Self {
        Self { kind, event }
    }
}
