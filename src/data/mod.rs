pub mod event;
pub mod sample;
pub mod threshold;

pub use event::{
    EventState, Severity, ThresholdType, Transition, TransitionKind, ViolationRecord, WarningEvent,
};
pub use sample::Sample;
pub use threshold::{
    default_thresholds, load_thresholds, ConfigError, ThresholdConfig, Violation,
    MAX_WINDOW_RECORDS,
};
