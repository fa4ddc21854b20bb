//! Run tracker: scoped runs over an [`ExperimentStore`]

use super::{
    validate_artifact_path, ArtifactRecord, ArtifactSource, ExperimentRecord, ExperimentStore,
    MetricRecord, RunArtifactUri, RunRecord, RunStatus, RunSummary,
};
use crate::config::WorkspaceConfig;
use crate::query::{QueryExecutor, RunQuery};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::sync::Arc;
use uuid::Uuid;

/// Creates runs in an active experiment and searches them.
///
/// `RunTracker` is `Send + Sync`; several threads may log to different runs
/// of the same tracker.
#[derive(Debug)]
pub struct RunTracker {
    store: ExperimentStore,
    experiment_id: String,
}

impl RunTracker {
    /// In-memory tracker using the default experiment.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            store: ExperimentStore::new(),
            experiment_id: ExperimentRecord::DEFAULT_ID.to_string(),
        }
    }

    /// Tracker for `config`: opens the tracking directory if one is set and
    /// selects (creating if needed) the configured experiment.
    ///
    /// # Errors
    /// Returns `Io`/`Json` if the tracking directory cannot be loaded
    pub fn new(config: &WorkspaceConfig) -> Result<Self> {
        let store = match config.tracking_dir() {
            Some(dir) => ExperimentStore::open(dir)?,
            None => ExperimentStore::new(),
        };
        let mut tracker = Self {
            store,
            experiment_id: ExperimentRecord::DEFAULT_ID.to_string(),
        };
        tracker.set_experiment(config.experiment_name())?;
        Ok(tracker)
    }

    /// Underlying store
    #[must_use]
    pub const fn store(&self) -> &ExperimentStore {
        &self.store
    }

    /// The experiment new runs are created in.
    ///
    /// # Errors
    /// `InvalidInput` if the active experiment vanished from the store
    pub fn experiment(&self) -> Result<ExperimentRecord> {
        self.store.get_experiment(&self.experiment_id).ok_or_else(|| {
            Error::InvalidInput(format!("experiment {} does not exist", self.experiment_id))
        })
    }

    /// Make `name` the active experiment, creating it if absent.
    ///
    /// # Errors
    /// `InvalidInput` if the name is empty
    pub fn set_experiment(&mut self, name: &str) -> Result<ExperimentRecord> {
        let experiment = match self.store.get_experiment_by_name(name) {
            Some(existing) => existing,
            None => self.store.create_experiment(name, None)?,
        };
        self.experiment_id = experiment.experiment_id().to_string();
        tracing::debug!(experiment_id = %self.experiment_id, name = name, "active experiment");
        Ok(experiment)
    }

    /// Create a new experiment without selecting it.
    ///
    /// # Errors
    /// `InvalidInput` if the name is empty or taken
    pub fn create_experiment(
        &self,
        name: &str,
        config: Option<serde_json::Value>,
    ) -> Result<ExperimentRecord> {
        self.store.create_experiment(name, config)
    }

    /// Look up an experiment by name
    #[must_use]
    pub fn get_experiment_by_name(&self, name: &str) -> Option<ExperimentRecord> {
        self.store.get_experiment_by_name(name)
    }

    /// All experiments
    #[must_use]
    pub fn experiments(&self) -> Vec<ExperimentRecord> {
        self.store.experiments()
    }

    /// Start a run in the active experiment.
    ///
    /// The returned handle seals the run exactly once: explicitly through
    /// [`RunHandle::end`], or on drop (`FINISHED`, or `FAILED` while a panic
    /// unwinds).
    ///
    /// # Errors
    /// `InvalidInput` if the active experiment no longer exists
    pub fn start_run(&self, run_name: &str) -> Result<RunHandle<'_>> {
        let run_id = Uuid::new_v4().simple().to_string();
        let run = RunRecord::new(&run_id, &self.experiment_id, run_name);
        self.store.add_run(run)?;

        tracing::info!(
            run_id = %run_id,
            experiment_id = %self.experiment_id,
            run_name = run_name,
            "started run"
        );
        Ok(RunHandle {
            tracker: self,
            run_id,
            sealed: false,
        })
    }

    /// Run `body` inside a new run, sealing it `FINISHED` when the body
    /// returns `Ok` and `FAILED` when it returns `Err`.
    ///
    /// # Errors
    /// The body's error, or a tracker error converted into `E`
    pub fn run<T, E, F>(&self, run_name: &str, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&RunHandle<'_>) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let handle = self.start_run(run_name)?;
        match body(&handle) {
            Ok(value) => {
                handle.end(RunStatus::Finished)?;
                Ok(value)
            }
            Err(err) => {
                let run_id = handle.run_id().to_string();
                if let Err(seal_err) = handle.end(RunStatus::Failed) {
                    tracing::warn!(run_id = %run_id, error = %seal_err, "could not seal failed run");
                }
                Err(err)
            }
        }
    }

    /// Fetch a run, including runs persisted by other processes.
    ///
    /// # Errors
    /// `RunNotFound` for unknown IDs
    pub fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        self.store.get_run(run_id)
    }

    /// Search the active experiment with a filter expression, newest first.
    ///
    /// # Errors
    /// `ParseError` if the expression is malformed
    pub fn search_runs(&self, filter: &str) -> Result<Vec<RunSummary>> {
        self.search_runs_with(&RunQuery::new().filter(filter)?)
    }

    /// Search with full query options. An empty experiment scope searches the
    /// active experiment.
    ///
    /// # Errors
    /// Currently infallible; kept fallible for stores that read from disk
    pub fn search_runs_with(&self, query: &RunQuery) -> Result<Vec<RunSummary>> {
        let scope = if query.experiment_scope().is_empty() {
            vec![self.experiment_id.clone()]
        } else {
            query.experiment_scope().to_vec()
        };

        let runs = self
            .store
            .runs_for_experiments(&scope)
            .iter()
            .map(RunRecord::summary)
            .collect();
        let found = QueryExecutor::new().execute(query, runs);

        tracing::debug!(experiments = ?scope, matched = found.len(), "searched runs");
        Ok(found)
    }

    /// Bytes of a `runs:/<run_id>/<path>` artifact.
    ///
    /// # Errors
    /// - `InvalidInput` for malformed URIs
    /// - `RunNotFound` / `ArtifactNotFound` if nothing is stored there
    pub fn load_artifact(&self, uri: &str) -> Result<Arc<[u8]>> {
        let uri: RunArtifactUri = uri.parse()?;
        self.store.artifact_bytes(uri.run_id(), uri.artifact_path())
    }

    /// Deserialize a JSON artifact, e.g. logged model coefficients.
    ///
    /// # Errors
    /// Same as [`RunTracker::load_artifact`], plus `Json` if the content does
    /// not deserialize into `T`
    pub fn load_json<T: DeserializeOwned>(&self, uri: &str) -> Result<T> {
        let bytes = self.load_artifact(uri)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Handle to an open run.
///
/// Dropping the handle seals the run; there is no way to leave a run open
/// after its scope ends.
#[derive(Debug)]
pub struct RunHandle<'t> {
    tracker: &'t RunTracker,
    run_id: String,
    sealed: bool,
}

impl RunHandle<'_> {
    /// ID of the run
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Log a parameter; the value is stored in its string form.
    ///
    /// # Errors
    /// `DuplicateParam` if the key is already set in this run
    pub fn log_param(&self, key: &str, value: impl Display) -> Result<()> {
        let value = value.to_string();
        self.tracker
            .store
            .update_run(&self.run_id, |run| run.log_param(key, value.as_str()))?;
        tracing::debug!(run_id = %self.run_id, key = key, value = %value, "logged param");
        Ok(())
    }

    /// Append a metric value at `step` (default 0).
    ///
    /// # Errors
    /// `InvalidInput` for an empty key
    pub fn log_metric(&self, key: &str, value: f64, step: Option<u64>) -> Result<()> {
        let metric = MetricRecord::new(key, value, step.unwrap_or_default());
        self.tracker
            .store
            .update_run(&self.run_id, |run| run.log_metric(metric))?;
        tracing::debug!(run_id = %self.run_id, key = key, value = value, "logged metric");
        Ok(())
    }

    /// Set or replace a tag.
    ///
    /// # Errors
    /// `InvalidInput` for an empty key
    pub fn set_tag(&self, key: &str, value: impl Display) -> Result<()> {
        let value = value.to_string();
        self.tracker
            .store
            .update_run(&self.run_id, |run| run.set_tag(key, value))
    }

    /// Store an artifact at `artifact_path` inside this run. Logging the same
    /// path again replaces the record.
    ///
    /// # Errors
    /// - `InvalidInput` for paths that are empty or contain `.`/`..`
    /// - `Io` if a file source cannot be read
    pub fn log_artifact(&self, source: ArtifactSource, artifact_path: &str) -> Result<ArtifactRecord> {
        let path = validate_artifact_path(artifact_path)?;
        let (kind, bytes) = source.into_bytes()?;
        let record = ArtifactRecord::new(&self.run_id, path, kind, &bytes);
        self.tracker
            .store
            .update_run(&self.run_id, |run| run.add_artifact(record.clone()))?;
        self.tracker.store.put_blob(record.cas_hash(), bytes);

        tracing::debug!(
            run_id = %self.run_id,
            uri = %record.uri(),
            cas_hash = record.cas_hash(),
            size_bytes = record.size_bytes(),
            "logged artifact"
        );
        Ok(record)
    }

    /// Snapshot of the run as logged so far
    ///
    /// # Errors
    /// `RunNotFound` if the run was removed from the store
    pub fn record(&self) -> Result<RunRecord> {
        self.tracker.store.get_run(&self.run_id)
    }

    /// Seal the run with `status` and return the final record.
    ///
    /// # Errors
    /// `InvalidInput` for `RUNNING`; `Io`/`Json` if persisting fails (the
    /// run stays sealed in memory)
    pub fn end(mut self, status: RunStatus) -> Result<RunRecord> {
        // A rejected status leaves the handle open so drop still seals it
        if !status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "cannot end run {} with status {status}",
                self.run_id
            )));
        }
        self.sealed = true;
        self.seal(status)
    }

    fn seal(&self, status: RunStatus) -> Result<RunRecord> {
        let run = self.tracker.store.update_run(&self.run_id, |run| {
            run.seal(status)?;
            Ok(run.clone())
        })?;
        tracing::info!(run_id = %self.run_id, status = %status, "ended run");
        self.tracker.store.persist_run(&run)?;
        Ok(run)
    }
}

impl Drop for RunHandle<'_> {
    fn drop(&mut self) {
        if self.sealed {
            return;
        }
        self.sealed = true;
        let status = if std::thread::panicking() {
            tracing::warn!(run_id = %self.run_id, "run dropped while panicking, marking FAILED");
            RunStatus::Failed
        } else {
            RunStatus::Finished
        };
        if let Err(err) = self.seal(status) {
            tracing::warn!(run_id = %self.run_id, error = %err, "could not seal run on drop");
        }
    }
}
