//! Threshold configuration types

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::event::{Severity, ThresholdType};

/// Capacity of the per-signal trigger and recovery windows.
pub const MAX_WINDOW_RECORDS: usize = 128;

/// Longest accepted trigger or recovery window.
pub const MAX_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-signal threshold definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Signal identifier (e.g. "PPA:2")
    pub signal_id: String,
    /// Kind of measurement: "frequency", "voltage", "current", ...
    pub signal_type: String,
    #[serde(default)]
    pub warning_min: Option<f64>,
    #[serde(default)]
    pub warning_max: Option<f64>,
    #[serde(default)]
    pub critical_min: Option<f64>,
    #[serde(default)]
    pub critical_max: Option<f64>,
    /// Violations required inside `trigger_window` before an event opens
    #[serde(default = "default_trigger_count")]
    pub trigger_count: u32,
    #[serde(with = "duration_secs", default = "default_trigger_window")]
    pub trigger_window: Duration,
    /// Consecutive normal samples required inside `recovery_window` to recover
    #[serde(default = "default_recovery_count")]
    pub recovery_count: u32,
    #[serde(with = "duration_secs", default = "default_recovery_window")]
    pub recovery_window: Duration,
    /// Minimum time an event stays active before it may recover
    #[serde(with = "duration_secs", default)]
    pub min_event_duration: Duration,
}

fn default_trigger_count() -> u32 {
    3
}

fn default_trigger_window() -> Duration {
    Duration::from_secs(5)
}

fn default_recovery_count() -> u32 {
    2
}

fn default_recovery_window() -> Duration {
    Duration::from_secs(3)
}

impl ThresholdConfig {
    /// Create a config with no bounds and the default debounce parameters
    pub fn new(signal_id: impl Into<String>, signal_type: impl Into<String>) -> Self {
        Self {
            signal_id: signal_id.into(),
            signal_type: signal_type.into(),
            warning_min: None,
            warning_max: None,
            critical_min: None,
            critical_max: None,
            trigger_count: default_trigger_count(),
            trigger_window: default_trigger_window(),
            recovery_count: default_recovery_count(),
            recovery_window: default_recovery_window(),
            min_event_duration: Duration::ZERO,
        }
    }

    pub fn with_warning(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.warning_min = min;
        self.warning_max = max;
        self
    }

    pub fn with_critical(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.critical_min = min;
        self.critical_max = max;
        self
    }

    pub fn with_trigger(mut self, count: u32, window: Duration) -> Self {
        self.trigger_count = count;
        self.trigger_window = window;
        self
    }

    pub fn with_recovery(mut self, count: u32, window: Duration) -> Self {
        self.recovery_count = count;
        self.recovery_window = window;
        self
    }

    pub fn with_min_event_duration(mut self, duration: Duration) -> Self {
        self.min_event_duration = duration;
        self
    }

    /// Check the structural invariants of this config
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            signal_id: self.signal_id.clone(),
            reason,
        };

        if self.signal_id.trim().is_empty() {
            return Err(invalid("signal_id must not be empty".to_string()));
        }

        for (name, bound) in [
            ("warning_min", self.warning_min),
            ("warning_max", self.warning_max),
            ("critical_min", self.critical_min),
            ("critical_max", self.critical_max),
        ] {
            if let Some(v) = bound {
                if !v.is_finite() {
                    return Err(invalid(format!("{} must be finite, got {}", name, v)));
                }
            }
        }

        if let (Some(min), Some(max)) = (self.warning_min, self.warning_max) {
            if min > max {
                return Err(invalid(format!("warning_min {} > warning_max {}", min, max)));
            }
        }
        if let (Some(min), Some(max)) = (self.critical_min, self.critical_max) {
            if min > max {
                return Err(invalid(format!(
                    "critical_min {} > critical_max {}",
                    min, max
                )));
            }
        }

        for (name, count) in [
            ("trigger_count", self.trigger_count),
            ("recovery_count", self.recovery_count),
        ] {
            if count == 0 || count as usize > MAX_WINDOW_RECORDS {
                return Err(invalid(format!(
                    "{} must be in 1..={}, got {}",
                    name, MAX_WINDOW_RECORDS, count
                )));
            }
        }

        for (name, window) in [
            ("trigger_window", self.trigger_window),
            ("recovery_window", self.recovery_window),
        ] {
            if window.is_zero() || window > MAX_WINDOW {
                return Err(invalid(format!(
                    "{} must be positive and at most {:?}, got {:?}",
                    name, MAX_WINDOW, window
                )));
            }
        }

        if self.min_event_duration > MAX_WINDOW {
            return Err(invalid(format!(
                "min_event_duration must be at most {:?}, got {:?}",
                MAX_WINDOW, self.min_event_duration
            )));
        }

        // The warning band must sit inside the critical band, so a value
        // within the warning bounds is never critical
        if let (Some(warning), Some(critical)) = (self.warning_min, self.critical_min) {
            if warning < critical {
                return Err(invalid(format!(
                    "warning_min {} < critical_min {}",
                    warning, critical
                )));
            }
        }
        if let (Some(warning), Some(critical)) = (self.warning_max, self.critical_max) {
            if warning > critical {
                return Err(invalid(format!(
                    "warning_max {} > critical_max {}",
                    warning, critical
                )));
            }
        }

        Ok(())
    }

    /// Classify a value against the bounds. Critical bounds are checked
    /// first; a value exactly on a bound is inside it.
    pub fn classify(&self, value: f64) -> Option<Violation> {
        let checks = [
            (Severity::Critical, ThresholdType::Min, self.critical_min),
            (Severity::Critical, ThresholdType::Max, self.critical_max),
            (Severity::Warning, ThresholdType::Min, self.warning_min),
            (Severity::Warning, ThresholdType::Max, self.warning_max),
        ];

        checks
            .into_iter()
            .find_map(|(severity, threshold_type, bound)| {
                let threshold = bound?;
                let deviation = match threshold_type {
                    ThresholdType::Min => threshold - value,
                    ThresholdType::Max => value - threshold,
                };
                (deviation > 0.0).then_some(Violation {
                    severity,
                    threshold_type,
                    threshold,
                    deviation,
                })
            })
    }

    /// Human-readable description of a violation
    pub fn describe(&self, violation: &Violation) -> String {
        match violation.threshold_type {
            ThresholdType::Min => format!(
                "{}: {} below {} (deviation: -{:.2})",
                violation.severity, self.signal_type, violation.threshold, violation.deviation
            ),
            ThresholdType::Max => format!(
                "{}: {} above {} (deviation: +{:.2})",
                violation.severity, self.signal_type, violation.threshold, violation.deviation
            ),
        }
    }
}

/// Result of classifying an out-of-bounds value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Violation {
    pub severity: Severity,
    pub threshold_type: ThresholdType,
    /// The bound that was breached
    pub threshold: f64,
    /// Distance past the breached bound, always positive
    pub deviation: f64,
}

/// Load and validate a JSON array of threshold configs from disk
pub fn load_thresholds(path: impl AsRef<Path>) -> Result<Vec<ThresholdConfig>, ConfigError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })?;

    let configs: Vec<ThresholdConfig> =
        serde_json::from_slice(&data).map_err(|e| ConfigError::Parse(e.to_string()))?;

    for config in &configs {
        config.validate()?;
    }

    Ok(configs)
}

/// Built-in thresholds for the common PMU signals
pub fn default_thresholds() -> Vec<ThresholdConfig> {
    vec![
        ThresholdConfig::new("PMU_frequency", "frequency")
            .with_warning(Some(59.9), Some(60.1))
            .with_critical(Some(59.8), Some(60.2))
            .with_trigger(3, Duration::from_secs(5))
            .with_recovery(2, Duration::from_secs(3))
            .with_min_event_duration(Duration::from_secs(1)),
        // Nominal 199 kV, warning at +/-5%, critical at +/-10%
        ThresholdConfig::new("PMU_voltage_a_mag", "voltage")
            .with_warning(Some(190_000.0), Some(208_000.0))
            .with_critical(Some(180_000.0), Some(220_000.0))
            .with_trigger(3, Duration::from_secs(5))
            .with_recovery(2, Duration::from_secs(3))
            .with_min_event_duration(Duration::from_secs(1)),
        ThresholdConfig::new("PMU_rocof", "ROCOF")
            .with_warning(Some(-0.5), Some(0.5))
            .with_critical(Some(-1.0), Some(1.0))
            .with_trigger(2, Duration::from_secs(3))
            .with_recovery(2, Duration::from_secs(2))
            .with_min_event_duration(Duration::from_millis(500)),
        ThresholdConfig::new("PPA:2", "frequency")
            .with_warning(Some(59.85), Some(60.15))
            .with_critical(Some(59.5), Some(60.5))
            .with_trigger(3, Duration::from_secs(5))
            .with_recovery(2, Duration::from_secs(3)),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid threshold config for '{signal_id}': {reason}")]
    Invalid { signal_id: String, reason: String },

    #[error("Failed to read threshold file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse threshold file: {0}")]
    Parse(String),
}

/// Durations as fractional seconds, e.g. `"trigger_window": 5.0`
mod duration_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frequency() -> ThresholdConfig {
        ThresholdConfig::new("PPA:2", "frequency")
            .with_warning(Some(59.85), Some(60.15))
            .with_critical(Some(59.5), Some(60.5))
    }

    #[test]
    fn test_classify_boundaries_are_inside() {
        let config = frequency();

        assert!(config.classify(60.0).is_none());
        assert!(config.classify(60.15).is_none());
        assert!(config.classify(59.85).is_none());

        let v = config.classify(60.5).unwrap();
        assert_eq!(v.severity, Severity::Warning);
    }

    #[test]
    fn test_classify_severity_and_side() {
        let config = frequency();

        let v = config.classify(60.2).unwrap();
        assert_eq!(v.severity, Severity::Warning);
        assert_eq!(v.threshold_type, ThresholdType::Max);
        assert_eq!(v.threshold, 60.15);
        assert!((v.deviation - 0.05).abs() < 1e-9);

        let v = config.classify(59.0).unwrap();
        assert_eq!(v.severity, Severity::Critical);
        assert_eq!(v.threshold_type, ThresholdType::Min);
        assert_eq!(v.threshold, 59.5);
        assert!((v.deviation - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_classify_missing_bounds() {
        let config = ThresholdConfig::new("rocof", "ROCOF").with_warning(None, Some(0.5));

        assert!(config.classify(-100.0).is_none());
        assert_eq!(config.classify(0.6).unwrap().severity, Severity::Warning);
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        assert!(frequency().validate().is_ok());

        let inverted = frequency().with_warning(Some(61.0), Some(59.0));
        assert!(matches!(inverted.validate(), Err(ConfigError::Invalid { .. })));

        let zero_count = frequency().with_trigger(0, Duration::from_secs(5));
        assert!(zero_count.validate().is_err());

        let zero_window = frequency().with_recovery(2, Duration::ZERO);
        assert!(zero_window.validate().is_err());

        let nan = frequency().with_critical(Some(f64::NAN), None);
        assert!(nan.validate().is_err());

        let empty = ThresholdConfig::new("  ", "frequency");
        assert!(empty.validate().is_err());

        let long_hold = frequency().with_min_event_duration(MAX_WINDOW + Duration::from_secs(1));
        assert!(long_hold.validate().is_err());
        let max_hold = frequency().with_min_event_duration(MAX_WINDOW);
        assert!(max_hold.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_warning_band_inside_critical() {
        let wide_warning = frequency().with_warning(Some(59.85), Some(61.0));
        assert!(matches!(
            wide_warning.validate(),
            Err(ConfigError::Invalid { .. })
        ));

        let low_warning = frequency().with_warning(Some(59.0), Some(60.15));
        assert!(low_warning.validate().is_err());

        // Equal bounds, and a side with only one of the two, are accepted
        let touching = frequency().with_warning(Some(59.5), Some(60.5));
        assert!(touching.validate().is_ok());
        let one_sided = frequency().with_critical(None, Some(60.5));
        assert!(one_sided.validate().is_ok());
    }

    #[test]
    fn test_describe_message() {
        let config = frequency();
        let v = config.classify(60.25).unwrap();
        assert_eq!(
            config.describe(&v),
            "WARNING: frequency above 60.15 (deviation: +0.10)"
        );
    }

    #[test]
    fn test_json_durations_as_seconds() {
        let json = r#"{
            "signal_id": "PPA:2",
            "signal_type": "frequency",
            "warning_max": 60.15,
            "trigger_count": 3,
            "trigger_window": 5.0,
            "recovery_count": 2,
            "recovery_window": 1.5
        }"#;

        let config: ThresholdConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.trigger_window, Duration::from_secs(5));
        assert_eq!(config.recovery_window, Duration::from_millis(1500));
        assert_eq!(config.min_event_duration, Duration::ZERO);
        assert_eq!(config.warning_min, None);

        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back["trigger_window"], serde_json::json!(5.0));
    }

    #[test]
    fn test_load_thresholds_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("thresholds.json");
        std::fs::write(&path, serde_json::to_vec(&default_thresholds()).unwrap()).unwrap();

        let loaded = load_thresholds(&path).unwrap();
        assert_eq!(loaded, default_thresholds());

        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(load_thresholds(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_default_thresholds_are_valid() {
        for config in default_thresholds() {
            config.validate().unwrap();
        }
    }
}
