//! Run Record - one tracked execution of a training procedure

use super::{ArtifactRecord, MetricRecord};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run is open and accepts parameters, metrics and artifacts.
    Running,
    /// Run completed successfully.
    Finished,
    /// Run failed with an error.
    Failed,
    /// Run was cancelled by user or system.
    Killed,
}

impl RunStatus {
    /// Upper-case status name used in filters (`attributes.status = 'FINISHED'`)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Killed => "KILLED",
        }
    }

    /// Whether the run is sealed in this status
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run Record represents a single execution inside an experiment.
///
/// Parameters are write-once, metrics append-only, tags overwritable.
/// Once sealed with a terminal status the record rejects every mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    run_id: String,
    experiment_id: String,
    run_name: String,
    status: RunStatus,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    params: BTreeMap<String, String>,
    metrics: BTreeMap<String, Vec<MetricRecord>>,
    tags: BTreeMap<String, String>,
    artifacts: BTreeMap<String, ArtifactRecord>,
}

impl RunRecord {
    /// Create a running record started now.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        experiment_id: impl Into<String>,
        run_name: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            experiment_id: experiment_id.into(),
            run_name: run_name.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            tags: BTreeMap::new(),
            artifacts: BTreeMap::new(),
        }
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the parent experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the run name.
    #[must_use]
    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// Get the current run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Whether the run is sealed
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.status.is_terminal()
    }

    /// Get the start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Get the end timestamp, if the run is sealed.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// All parameters
    #[must_use]
    pub const fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// One parameter value
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// All tags
    #[must_use]
    pub const fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// One tag value
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Every value logged under `key`, in logging order.
    #[must_use]
    pub fn metric_history(&self, key: &str) -> &[MetricRecord] {
        self.metrics.get(key).map_or(&[], Vec::as_slice)
    }

    /// Latest value of a metric: highest step, last logged on ties.
    #[must_use]
    pub fn latest_metric(&self, key: &str) -> Option<f64> {
        latest(self.metric_history(key))
    }

    /// Latest value of every metric
    #[must_use]
    pub fn latest_metrics(&self) -> BTreeMap<String, f64> {
        self.metrics
            .iter()
            .filter_map(|(key, history)| latest(history).map(|value| (key.clone(), value)))
            .collect()
    }

    /// Artifact logged at `artifact_path`
    #[must_use]
    pub fn artifact(&self, artifact_path: &str) -> Option<&ArtifactRecord> {
        self.artifacts.get(artifact_path)
    }

    /// All artifacts, ordered by path
    pub fn artifacts(&self) -> impl Iterator<Item = &ArtifactRecord> {
        self.artifacts.values()
    }

    /// Record a parameter.
    ///
    /// # Errors
    /// `DuplicateParam` if the key is already set, `RunSealed` after sealing
    pub fn log_param(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = self.writable_key(key.into())?;
        if self.params.contains_key(&key) {
            return Err(Error::DuplicateParam {
                run_id: self.run_id.clone(),
                key,
            });
        }
        self.params.insert(key, value.into());
        Ok(())
    }

    /// Append a metric value; repeated keys keep every value.
    ///
    /// # Errors
    /// `RunSealed` after sealing
    pub fn log_metric(&mut self, metric: MetricRecord) -> Result<()> {
        let key = self.writable_key(metric.key().to_string())?;
        self.metrics.entry(key).or_default().push(metric);
        Ok(())
    }

    /// Set or replace a tag.
    ///
    /// # Errors
    /// `RunSealed` after sealing
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = self.writable_key(key.into())?;
        self.tags.insert(key, value.into());
        Ok(())
    }

    /// Attach an artifact record, replacing one at the same path.
    ///
    /// # Errors
    /// `RunSealed` after sealing
    pub fn add_artifact(&mut self, artifact: ArtifactRecord) -> Result<()> {
        self.ensure_open()?;
        self.artifacts
            .insert(artifact.artifact_path().to_string(), artifact);
        Ok(())
    }

    /// Seal the run with a terminal status.
    ///
    /// # Errors
    /// `RunSealed` if already sealed, `InvalidInput` for `Running`
    pub fn seal(&mut self, status: RunStatus) -> Result<()> {
        self.ensure_open()?;
        if !status.is_terminal() {
            return Err(Error::InvalidInput(
                "a run can only be sealed with FINISHED, FAILED or KILLED".to_string(),
            ));
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Flattened view used by run search.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            experiment_id: self.experiment_id.clone(),
            run_name: self.run_name.clone(),
            status: self.status,
            start_time: self.started_at,
            end_time: self.ended_at,
            params: self.params.clone(),
            metrics: self.latest_metrics(),
            tags: self.tags.clone(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::RunSealed(self.run_id.clone()));
        }
        Ok(())
    }

    fn writable_key(&self, key: String) -> Result<String> {
        self.ensure_open()?;
        if key.trim().is_empty() {
            return Err(Error::InvalidInput("keys must not be empty".to_string()));
        }
        Ok(key)
    }
}

fn latest(history: &[MetricRecord]) -> Option<f64> {
    history
        .iter()
        .fold(None::<&MetricRecord>, |best, metric| match best {
            Some(best) if best.step() > metric.step() => Some(best),
            _ => Some(metric),
        })
        .map(MetricRecord::value)
}

/// One row of a run search result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// Run ID
    pub run_id: String,
    /// Parent experiment ID
    pub experiment_id: String,
    /// Run name
    pub run_name: String,
    /// Status at search time
    pub status: RunStatus,
    /// Start timestamp
    pub start_time: DateTime<Utc>,
    /// End timestamp, if sealed
    pub end_time: Option<DateTime<Utc>>,
    /// Parameters
    pub params: BTreeMap<String, String>,
    /// Latest value of each metric
    pub metrics: BTreeMap<String, f64>,
    /// Tags
    pub tags: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_starts_running() {
        let run = RunRecord::new("run-1", "0", "lr_model");
        assert_eq!(run.status(), RunStatus::Running);
        assert!(run.ended_at().is_none());
        assert!(!run.is_sealed());
    }

    #[test]
    fn test_duplicate_param() {
        let mut run = RunRecord::new("run-1", "0", "lr_model");
        run.log_param("lr", "0.1").unwrap();

        let err = run.log_param("lr", "0.2").unwrap_err();
        assert!(matches!(err, Error::DuplicateParam { ref key, .. } if key == "lr"));
        assert_eq!(run.param("lr"), Some("0.1"));
    }

    #[test]
    fn test_metric_history_and_latest() {
        let mut run = RunRecord::new("run-1", "0", "lr_model");
        run.log_metric(MetricRecord::new("rmse", 5.2, 0)).unwrap();
        run.log_metric(MetricRecord::new("rmse", 4.8, 0)).unwrap();
        run.log_metric(MetricRecord::new("loss", 0.3, 2)).unwrap();
        run.log_metric(MetricRecord::new("loss", 0.9, 1)).unwrap();

        assert_eq!(run.metric_history("rmse").len(), 2);
        assert_eq!(run.latest_metric("rmse"), Some(4.8));
        assert_eq!(run.latest_metric("loss"), Some(0.3));
        assert_eq!(run.latest_metric("r2"), None);
    }

    #[test]
    fn test_sealed_run_rejects_writes() {
        let mut run = RunRecord::new("run-1", "0", "lr_model");
        run.seal(RunStatus::Finished).unwrap();

        assert!(run.ended_at().is_some());
        assert!(matches!(run.log_param("a", "1"), Err(Error::RunSealed(_))));
        assert!(matches!(
            run.log_metric(MetricRecord::new("m", 1.0, 0)),
            Err(Error::RunSealed(_))
        ));
        assert!(matches!(run.seal(RunStatus::Failed), Err(Error::RunSealed(_))));
    }

    #[test]
    fn test_seal_requires_terminal_status() {
        let mut run = RunRecord::new("run-1", "0", "lr_model");
        assert!(matches!(run.seal(RunStatus::Running), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_summary_flattens_latest_metrics() {
        let mut run = RunRecord::new("run-1", "0", "lr_model");
        run.log_param("label", "price").unwrap();
        run.set_tag("team", "pricing").unwrap();
        run.log_metric(MetricRecord::new("r2", 0.4, 0)).unwrap();

        let summary = run.summary();
        assert_eq!(summary.params["label"], "price");
        assert_eq!(summary.tags["team"], "pricing");
        assert!((summary.metrics["r2"] - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(RunStatus::Finished.to_string(), "FINISHED");
        assert_eq!(
            serde_json::to_string(&RunStatus::Killed).unwrap(),
            "\"KILLED\""
        );
    }
}
