//! Live Data Samples
//!
//! The single record produced per tick and the range its value is drawn
//! from.
//!
//! # Wire Format
//!
//! ```json
//! {"value": 93.41, "timestamp": "2026-10-19T10:00:00.123Z"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DomainError;

/// Default inclusive lower bound for generated samples.
pub const DEFAULT_MIN: f64 = 90.0;

/// Default exclusive upper bound for generated samples.
pub const DEFAULT_MAX: f64 = 100.0;

// =============================================================================
// Sample Range
// =============================================================================

/// Half-open interval `[min, max)` that samples are drawn from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRange {
    min: f64,
    max: f64,
}

impl SampleRange {
    /// Create a range, rejecting non-finite or unordered bounds.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidRange` unless both bounds are finite,
    /// `min < max`, and the width `max - min` is finite.
    pub fn new(min: f64, max: f64) -> Result<Self, DomainError> {
        if !min.is_finite() || !max.is_finite() || min >= max || !(max - min).is_finite() {
            return Err(DomainError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Inclusive lower bound.
    #[must_use]
    pub const fn min(&self) -> f64 {
        self.min
    }

    /// Exclusive upper bound.
    #[must_use]
    pub const fn max(&self) -> f64 {
        self.max
    }

    /// Whether `value` lies within `[min, max)`.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value < self.max
    }
}

impl Default for SampleRange {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN,
            max: DEFAULT_MAX,
        }
    }
}

// =============================================================================
// Live Data Message
// =============================================================================

/// One sample stamped with the instant it was created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveDataMessage {
    /// Sampled value.
    pub value: f64,
    /// Creation instant.
    pub timestamp: DateTime<Utc>,
}

impl LiveDataMessage {
    /// Create a new message.
    #[must_use]
    pub const fn new(value: f64, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn default_range_is_ninety_to_hundred() {
        let range = SampleRange::default();
        assert_eq!(range.min(), 90.0);
        assert_eq!(range.max(), 100.0);
    }

    #[test]
    fn range_rejects_unordered_bounds() {
        assert!(SampleRange::new(10.0, 10.0).is_err());
        assert!(SampleRange::new(11.0, 10.0).is_err());
    }

    #[test]
    fn range_rejects_non_finite_bounds() {
        assert!(SampleRange::new(f64::NAN, 1.0).is_err());
        assert!(SampleRange::new(0.0, f64::INFINITY).is_err());
        assert!(SampleRange::new(f64::NEG_INFINITY, 0.0).is_err());
        assert!(SampleRange::new(-f64::MAX, f64::MAX).is_err());
    }

    #[test]
    fn range_is_half_open() {
        let range = SampleRange::new(0.0, 1.0).unwrap();
        assert!(range.contains(0.0));
        assert!(range.contains(0.999_999));
        assert!(!range.contains(1.0));
        assert!(!range.contains(-0.000_001));
    }

    #[test]
    fn message_serializes_with_rfc3339_timestamp() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap();
        let message = LiveDataMessage::new(93.5, ts);

        let json = serde_json::to_value(message).unwrap();
        assert_eq!(json["value"], 93.5);
        assert_eq!(json["timestamp"], "2026-10-19T10:00:00Z");
    }

    #[test]
    fn message_json_round_trips() {
        let json = r#"{"value":91.25,"timestamp":"2026-10-19T10:00:00.500Z"}"#;
        let message: LiveDataMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.value, 91.25);
        assert_eq!(message.timestamp.timestamp_subsec_millis(), 500);
    }
}
