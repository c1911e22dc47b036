//! Real-time layer: threshold registry, per-signal state and the detector

pub mod realtime;
pub mod registry;
pub mod state;
pub mod window;

pub use realtime::{CheckResult, DetectorError, RealTimeDetector};
pub use registry::{RegistryError, ThresholdRegistry};
pub use state::{Outcome, SignalState};
pub use window::TimeWindow;
