//! Metric Record - one logged value in a run's metric history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Metric Record represents a single metric data point.
///
/// A run keeps every value logged under a key; nothing is overwritten.
/// The value that filters and summaries see is the latest one, ordered by
/// `step` and then by logging order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    key: String,
    #[serde(deserialize_with = "nan_from_null")]
    value: f64,
    step: u64,
    timestamp: DateTime<Utc>,
}

impl MetricRecord {
    /// Create a new metric record stamped with the current time.
    ///
    /// # Arguments
    ///
    /// * `key` - Metric name (e.g., "rmse", "r2")
    /// * `value` - Metric value
    /// * `step` - Training step or epoch number
    #[must_use]
    pub fn new(key: impl Into<String>, value: f64, step: u64) -> Self {
        Self {
            key: key.into(),
            value,
            step,
            timestamp: Utc::now(),
        }
    }

    /// Create a builder for constructing a metric record with optional fields.
    #[must_use]
    pub fn builder(key: impl Into<String>, value: f64) -> MetricRecordBuilder {
        MetricRecordBuilder::new(key, value)
    }

    /// Get the metric key/name.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the metric value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Get the step/epoch number.
    #[must_use]
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// Get the timestamp when the metric was recorded.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// JSON has no NaN; `serde_json` writes non-finite floats as `null`.
fn nan_from_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Builder for `MetricRecord`.
#[derive(Debug)]
pub struct MetricRecordBuilder {
    key: String,
    value: f64,
    step: u64,
    timestamp: DateTime<Utc>,
}

impl MetricRecordBuilder {
    /// Create a new builder with required fields; step defaults to 0.
    #[must_use]
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
            step: 0,
            timestamp: Utc::now(),
        }
    }

    /// Set the step.
    #[must_use]
    pub const fn step(mut self, step: u64) -> Self {
        self.step = step;
        self
    }

    /// Set a custom timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build the `MetricRecord`.
    #[must_use]
    pub fn build(self) -> MetricRecord {
        MetricRecord {
            key: self.key,
            value: self.value,
            step: self.step,
            timestamp: self.timestamp,
        }
    }
}
