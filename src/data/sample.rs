use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest accepted sample time, 9999-12-31T23:59:59.999Z
const MAX_SAMPLE_MILLIS: i64 = 253_402_300_799_999;

/// A single measurement delivered by the upstream sample source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub signal_id: String,
    pub value: f64,
    /// Defaults to the time of arrival when omitted
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(signal_id: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            signal_id: signal_id.into(),
            value,
            timestamp,
        }
    }

    /// Reason this sample cannot be evaluated, if any
    pub fn defect(&self) -> Option<String> {
        if self.signal_id.trim().is_empty() {
            return Some("missing signal_id".to_string());
        }
        if !self.value.is_finite() {
            return Some(format!(
                "non-finite value {} for signal '{}'",
                self.value, self.signal_id
            ));
        }
        let millis = self.timestamp.timestamp_millis();
        if !(0..=MAX_SAMPLE_MILLIS).contains(&millis) {
            return Some(format!(
                "timestamp {} out of range for signal '{}'",
                self.timestamp.to_rfc3339(),
                self.signal_id
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defects() {
        let now = Utc::now();
        assert!(Sample::new("PPA:2", 60.0, now).defect().is_none());
        assert!(Sample::new("", 60.0, now).defect().is_some());
        assert!(Sample::new("PPA:2", f64::NAN, now).defect().is_some());
        assert!(Sample::new("PPA:2", f64::INFINITY, now).defect().is_some());
    }

    #[test]
    fn test_timestamp_range() {
        assert!(Sample::new("PPA:2", 70.0, DateTime::<Utc>::MIN_UTC)
            .defect()
            .is_some());
        assert!(Sample::new("PPA:2", 70.0, DateTime::<Utc>::MAX_UTC)
            .defect()
            .is_some());
        let epoch = chrono::TimeZone::timestamp_opt(&Utc, 0, 0).unwrap();
        assert!(Sample::new("PPA:2", 70.0, epoch).defect().is_none());
    }

    #[test]
    fn test_timestamp_defaults_to_now() {
        let before = Utc::now();
        let sample: Sample = serde_json::from_str(r#"{"signal_id":"PPA:2","value":60.0}"#).unwrap();
        assert!(sample.timestamp >= before);
    }
}
