//! Experiment Store - concurrent storage for experiment tracking data
//!
//! Experiments, runs and artifact content live in concurrent maps. When a
//! tracking directory is configured, sealed runs are also written to disk so
//! another process can load them again:
//!
//! ```text
//! <tracking_dir>/
//! └── <experiment_id>/
//!     ├── meta.json
//!     └── <run_id>/
//!         ├── run.json
//!         └── artifacts/<artifact_path>
//! ```

use super::{validate_artifact_path, ExperimentRecord, RunRecord};
use crate::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const EXPERIMENT_META: &str = "meta.json";
const RUN_META: &str = "run.json";
const ARTIFACTS_DIR: &str = "artifacts";

/// Store for experiments, runs and content-addressed artifact bytes.
///
/// ## Design
///
/// Runs are keyed by ID; mutation goes through [`ExperimentStore::update_run`]
/// which holds the run's entry lock for the duration of the change. Artifact
/// bytes are keyed by their `sha256:` hash, so logging identical content
/// twice stores it once.
#[derive(Debug)]
pub struct ExperimentStore {
    experiments: DashMap<String, ExperimentRecord, FxBuildHasher>,
    experiment_names: DashMap<String, String, FxBuildHasher>,
    runs: DashMap<String, RunRecord, FxBuildHasher>,
    blobs: DashMap<String, Arc<[u8]>, FxBuildHasher>,
    next_experiment_id: AtomicU64,
    tracking_dir: Option<PathBuf>,
}

impl Default for ExperimentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentStore {
    /// Create an in-memory store holding only the default experiment.
    #[must_use]
    pub fn new() -> Self {
        let store = Self::empty(None);
        store.insert_experiment(ExperimentRecord::default_experiment());
        store
    }

    /// Open a store persisted under `dir`, loading experiments and sealed
    /// runs written by earlier processes.
    ///
    /// # Errors
    /// Returns `Io` if the directory cannot be created or read, `Json` if a
    /// metadata file is corrupt
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let store = Self::empty(Some(dir.to_path_buf()));

        for entry in fs::read_dir(dir)? {
            let experiment_dir = entry?.path();
            let meta = experiment_dir.join(EXPERIMENT_META);
            if !meta.is_file() {
                continue;
            }
            let experiment: ExperimentRecord = serde_json::from_slice(&fs::read(&meta)?)?;
            store.insert_experiment(experiment);

            for run_entry in fs::read_dir(&experiment_dir)? {
                let run_meta = run_entry?.path().join(RUN_META);
                if run_meta.is_file() {
                    let run: RunRecord = serde_json::from_slice(&fs::read(&run_meta)?)?;
                    store.runs.insert(run.run_id().to_string(), run);
                }
            }
        }

        if !store.experiments.contains_key(ExperimentRecord::DEFAULT_ID) {
            let default = ExperimentRecord::default_experiment();
            store.persist_experiment(&default)?;
            store.insert_experiment(default);
        }

        tracing::info!(
            dir = %dir.display(),
            experiments = store.experiments.len(),
            runs = store.runs.len(),
            "opened tracking directory"
        );
        Ok(store)
    }

    fn empty(tracking_dir: Option<PathBuf>) -> Self {
        Self {
            experiments: DashMap::with_hasher(FxBuildHasher),
            experiment_names: DashMap::with_hasher(FxBuildHasher),
            runs: DashMap::with_hasher(FxBuildHasher),
            blobs: DashMap::with_hasher(FxBuildHasher),
            next_experiment_id: AtomicU64::new(1),
            tracking_dir,
        }
    }

    fn insert_experiment(&self, experiment: ExperimentRecord) {
        if let Ok(id) = experiment.experiment_id().parse::<u64>() {
            self.next_experiment_id.fetch_max(id + 1, Ordering::SeqCst);
        }
        self.experiment_names.insert(
            experiment.name().to_string(),
            experiment.experiment_id().to_string(),
        );
        self.experiments
            .insert(experiment.experiment_id().to_string(), experiment);
    }

    /// Directory sealed runs are persisted to, if any.
    #[must_use]
    pub fn tracking_dir(&self) -> Option<&Path> {
        self.tracking_dir.as_deref()
    }

    /// Get the number of experiments in the store.
    #[must_use]
    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    /// Get the number of runs in the store.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Create a new experiment with the next free ID.
    ///
    /// # Errors
    /// `InvalidInput` if the name is empty or already taken
    pub fn create_experiment(
        &self,
        name: &str,
        config: Option<serde_json::Value>,
    ) -> Result<ExperimentRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("experiment name must not be empty".to_string()));
        }

        let Entry::Vacant(slot) = self.experiment_names.entry(name.to_string()) else {
            return Err(Error::InvalidInput(format!(
                "experiment '{name}' already exists"
            )));
        };
        let id = self.next_experiment_id.fetch_add(1, Ordering::SeqCst).to_string();
        let mut experiment = ExperimentRecord::new(id.clone(), name);
        if let Some(config) = config {
            experiment = experiment.with_config(config);
        }

        // The name is only claimed once the experiment is on disk
        self.persist_experiment(&experiment)?;
        self.experiments.insert(id.clone(), experiment.clone());
        slot.insert(id);

        tracing::info!(
            experiment_id = experiment.experiment_id(),
            name = experiment.name(),
            "created experiment"
        );
        Ok(experiment)
    }

    /// Get an experiment by ID.
    #[must_use]
    pub fn get_experiment(&self, experiment_id: &str) -> Option<ExperimentRecord> {
        self.experiments.get(experiment_id).map(|e| e.value().clone())
    }

    /// Get an experiment by name.
    #[must_use]
    pub fn get_experiment_by_name(&self, name: &str) -> Option<ExperimentRecord> {
        let id = self.experiment_names.get(name)?.value().clone();
        self.get_experiment(&id)
    }

    /// All experiments ordered by numeric ID.
    #[must_use]
    pub fn experiments(&self) -> Vec<ExperimentRecord> {
        let mut experiments: Vec<ExperimentRecord> =
            self.experiments.iter().map(|e| e.value().clone()).collect();
        experiments.sort_by_key(|e| e.experiment_id().parse::<u64>().unwrap_or(u64::MAX));
        experiments
    }

    /// Add a new run.
    ///
    /// # Errors
    /// `InvalidInput` if the run ID is taken or the experiment is unknown
    pub fn add_run(&self, run: RunRecord) -> Result<()> {
        if !self.experiments.contains_key(run.experiment_id()) {
            return Err(Error::InvalidInput(format!(
                "experiment {} does not exist",
                run.experiment_id()
            )));
        }
        match self.runs.entry(run.run_id().to_string()) {
            Entry::Occupied(_) => Err(Error::InvalidInput(format!(
                "run {} already exists",
                run.run_id()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(run);
                Ok(())
            }
        }
    }

    /// Apply `change` to a run while holding its entry lock.
    ///
    /// # Errors
    /// `RunNotFound` for unknown IDs, otherwise whatever `change` returns
    pub fn update_run<T>(
        &self,
        run_id: &str,
        change: impl FnOnce(&mut RunRecord) -> Result<T>,
    ) -> Result<T> {
        let mut run = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        change(run.value_mut())
    }

    /// Get a run by ID, falling back to the tracking directory for runs
    /// sealed by another store on the same directory.
    ///
    /// # Errors
    /// `RunNotFound` if neither memory nor disk knows the run
    pub fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        if let Some(run) = self.runs.get(run_id) {
            return Ok(run.value().clone());
        }

        let run = self
            .load_persisted_run(run_id)?
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        self.runs.insert(run_id.to_string(), run.clone());
        Ok(run)
    }

    fn load_persisted_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let Some(dir) = &self.tracking_dir else {
            return Ok(None);
        };
        for entry in fs::read_dir(dir)? {
            let run_meta = entry?.path().join(run_id).join(RUN_META);
            if run_meta.is_file() {
                return Ok(Some(serde_json::from_slice(&fs::read(&run_meta)?)?));
            }
        }
        Ok(None)
    }

    /// Runs belonging to any of `experiment_ids`.
    #[must_use]
    pub fn runs_for_experiments(&self, experiment_ids: &[String]) -> Vec<RunRecord> {
        self.runs
            .iter()
            .filter(|run| experiment_ids.iter().any(|id| id == run.experiment_id()))
            .map(|run| run.value().clone())
            .collect()
    }

    /// Store artifact content under its hash.
    pub fn put_blob(&self, cas_hash: &str, bytes: Vec<u8>) {
        self.blobs
            .entry(cas_hash.to_string())
            .or_insert_with(|| Arc::from(bytes));
    }

    /// Whether content with this hash is held in memory.
    #[must_use]
    pub fn has_blob(&self, cas_hash: &str) -> bool {
        self.blobs.contains_key(cas_hash)
    }

    /// Content of the artifact logged at `artifact_path` in a run.
    ///
    /// # Errors
    /// - `RunNotFound` if the run is unknown
    /// - `ArtifactNotFound` if the run has no such artifact or its content
    ///   is gone
    pub fn artifact_bytes(&self, run_id: &str, artifact_path: &str) -> Result<Arc<[u8]>> {
        let run = self.get_run(run_id)?;
        let path = validate_artifact_path(artifact_path)?;
        let missing = || Error::ArtifactNotFound(format!("runs:/{run_id}/{path}"));
        let record = run.artifact(&path).ok_or_else(missing)?;

        if let Some(bytes) = self.blobs.get(record.cas_hash()) {
            return Ok(Arc::clone(bytes.value()));
        }

        let file = self
            .run_dir(run.experiment_id(), run_id)
            .map(|dir| dir.join(ARTIFACTS_DIR).join(&path))
            .filter(|file| file.is_file())
            .ok_or_else(missing)?;
        let bytes: Arc<[u8]> = Arc::from(fs::read(file)?);
        self.blobs
            .insert(record.cas_hash().to_string(), Arc::clone(&bytes));
        Ok(bytes)
    }

    /// Write a sealed run and its artifacts to the tracking directory.
    /// No-op for in-memory stores.
    ///
    /// # Errors
    /// Returns `Io`/`Json` if writing fails
    pub fn persist_run(&self, run: &RunRecord) -> Result<()> {
        let Some(run_dir) = self.run_dir(run.experiment_id(), run.run_id()) else {
            return Ok(());
        };
        let artifacts_dir = run_dir.join(ARTIFACTS_DIR);
        fs::create_dir_all(&artifacts_dir)?;

        for artifact in run.artifacts() {
            let Some(bytes) = self.blobs.get(artifact.cas_hash()) else {
                continue;
            };
            let file = artifacts_dir.join(artifact.artifact_path());
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(file, bytes.value())?;
        }

        fs::write(run_dir.join(RUN_META), serde_json::to_vec_pretty(run)?)?;
        tracing::debug!(run_id = run.run_id(), dir = %run_dir.display(), "persisted run");
        Ok(())
    }

    fn persist_experiment(&self, experiment: &ExperimentRecord) -> Result<()> {
        let Some(dir) = &self.tracking_dir else {
            return Ok(());
        };
        let experiment_dir = dir.join(experiment.experiment_id());
        fs::create_dir_all(&experiment_dir)?;
        fs::write(
            experiment_dir.join(EXPERIMENT_META),
            serde_json::to_vec_pretty(experiment)?,
        )?;
        Ok(())
    }

    fn run_dir(&self, experiment_id: &str, run_id: &str) -> Option<PathBuf> {
        self.tracking_dir
            .as_ref()
            .map(|dir| dir.join(experiment_id).join(run_id))
    }
}
