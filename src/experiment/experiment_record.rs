//! Experiment Record - named group of runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Experiment Record represents a tracked experiment.
///
/// Every run belongs to exactly one experiment. Names are unique within a
/// tracker; IDs are assigned by the tracker as increasing decimal strings,
/// with `"0"` reserved for the default experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentRecord {
    experiment_id: String,
    name: String,
    created_at: DateTime<Utc>,
    config: Option<serde_json::Value>,
}

impl ExperimentRecord {
    /// Name of the experiment runs land in when none is configured
    pub const DEFAULT_NAME: &'static str = "Default";

    /// ID of the default experiment
    pub const DEFAULT_ID: &'static str = "0";

    /// Create a new experiment record with the given ID and name.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: name.into(),
            created_at: Utc::now(),
            config: None,
        }
    }

    /// The default experiment
    #[must_use]
    pub fn default_experiment() -> Self {
        Self::new(Self::DEFAULT_ID, Self::DEFAULT_NAME)
    }

    /// Attach a free-form JSON configuration (e.g. dataset paths).
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the experiment configuration, if any.
    #[must_use]
    pub const fn config(&self) -> Option<&serde_json::Value> {
        self.config.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_experiment() {
        let record = ExperimentRecord::default_experiment();
        assert_eq!(record.experiment_id(), "0");
        assert_eq!(record.name(), "Default");
        assert!(record.config().is_none());
    }

    #[test]
    fn test_with_config() {
        let config = serde_json::json!({"train_path": "/splits/train"});
        let record = ExperimentRecord::new("1", "airbnb-lr").with_config(config.clone());
        assert_eq!(record.config(), Some(&config));
    }
}
