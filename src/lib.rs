//! # tracklake: Versioned Tables, Run Tracking and a Model Registry
//!
//! **Version**: 0.1.0
//!
//! tracklake is an embedded library for the train/track/register loop of a
//! machine learning workflow:
//!
//! 1. **Versioned tables** ([`storage`]): every write to a table path commits
//!    an immutable snapshot; read any version back ("time travel")
//! 2. **Run tracking** ([`experiment`]): parameters, metrics, tags and
//!    content-addressed artifacts per run, searchable with filter
//!    expressions ([`query`])
//! 3. **Model registry** ([`registry`]): numbered model versions that move
//!    through `None` → `Staging` → `Production` → `Archived`
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Poka-Yoke safety**: runs are sealed by scope, parameters are
//!   write-once, schema changes must be requested per write
//! - **Genchi Genbutsu**: history is never rewritten; every version stays
//!   readable
//! - **Jidoka**: each operation validates before it mutates, so a failed call
//!   leaves no partial state
//!
//! ## Example Usage
//!
//! ```rust
//! use tracklake::experiment::ArtifactSource;
//! use tracklake::registry::Stage;
//! use tracklake::storage::WriteOptions;
//! use tracklake::Workspace;
//! use arrow::array::{Float64Array, RecordBatch};
//! use arrow::datatypes::{DataType, Field, Schema};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let workspace = Workspace::builder().experiment_name("airbnb-lr").build()?;
//!
//! let schema = Arc::new(Schema::new(vec![Field::new("price", DataType::Float64, false)]));
//! let batch = RecordBatch::try_new(schema, vec![Arc::new(Float64Array::from(vec![120.0, 95.5]))])?;
//! let snapshot = workspace.store().write("/splits/train", batch, WriteOptions::overwrite())?;
//!
//! let run = workspace.tracker().start_run("lr_model")?;
//! run.log_param("data_version", snapshot.version())?;
//! run.log_metric("rmse", 5.2, None)?;
//! let model = run.log_artifact(ArtifactSource::Json(serde_json::json!({"coef": [0.4]})), "model")?;
//! drop(run);
//!
//! let version = workspace.registry().register_model(&model.uri(), "airbnb-lr")?;
//! workspace.registry().transition_stage("airbnb-lr", version.version(), Stage::Production)?;
//!
//! let coef: serde_json::Value = workspace.load_json("models:/airbnb-lr/Production")?;
//! assert_eq!(coef["coef"][0], 0.4);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod evaluation;
pub mod experiment;
pub mod query;
pub mod registry;
pub mod storage;

pub use error::{Error, Result};

use config::WorkspaceConfig;
use experiment::RunTracker;
use registry::{DeletePolicy, ModelRegistry, ModelUri};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use storage::VersionedStore;

/// Versioned store, run tracker and model registry wired from one config
#[derive(Debug)]
pub struct Workspace {
    config: WorkspaceConfig,
    store: VersionedStore,
    tracker: RunTracker,
    registry: ModelRegistry,
}

impl Workspace {
    /// Create a new workspace builder
    #[must_use]
    pub fn builder() -> WorkspaceBuilder {
        WorkspaceBuilder::default()
    }

    /// Workspace for an explicit config
    ///
    /// # Errors
    ///
    /// Returns error if the tracking or tables directory cannot be opened
    pub fn new(config: WorkspaceConfig) -> Result<Self> {
        let tracker = RunTracker::new(&config)?;
        let store = match config.tables_dir() {
            Some(dir) => VersionedStore::open(dir)?,
            None => VersionedStore::new(),
        };
        let registry = ModelRegistry::new(*config.registry());
        tracing::info!(
            experiment = config.experiment_name(),
            persistent_runs = config.tracking_dir().is_some(),
            persistent_tables = config.tables_dir().is_some(),
            "opened workspace"
        );
        Ok(Self {
            config,
            store,
            tracker,
            registry,
        })
    }

    /// Configuration the workspace was built from
    #[must_use]
    pub const fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// Versioned table store
    #[must_use]
    pub const fn store(&self) -> &VersionedStore {
        &self.store
    }

    /// Run tracker
    #[must_use]
    pub const fn tracker(&self) -> &RunTracker {
        &self.tracker
    }

    /// Run tracker, for switching the active experiment
    pub fn tracker_mut(&mut self) -> &mut RunTracker {
        &mut self.tracker
    }

    /// Model registry
    #[must_use]
    pub const fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Load artifact bytes by `runs:/` or `models:/` URI.
    ///
    /// # Errors
    ///
    /// Returns error if the URI is malformed or does not resolve to stored
    /// content
    pub fn load_artifact(&self, uri: &str) -> Result<Arc<[u8]>> {
        if uri.starts_with(ModelUri::SCHEME) {
            let source = self.registry.resolve_uri(uri)?;
            tracing::debug!(uri = uri, source = %source, "resolved model uri");
            return self.tracker.load_artifact(&source);
        }
        self.tracker.load_artifact(uri)
    }

    /// Deserialize a JSON artifact by `runs:/` or `models:/` URI.
    ///
    /// # Errors
    ///
    /// Same as [`Workspace::load_artifact`], plus `Json` if the content does
    /// not deserialize into `T`
    pub fn load_json<T: DeserializeOwned>(&self, uri: &str) -> Result<T> {
        let bytes = self.load_artifact(uri)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Workspace builder
#[derive(Debug, Default)]
pub struct WorkspaceBuilder {
    config: WorkspaceConfig,
}

impl WorkspaceBuilder {
    /// Start from a complete config
    #[must_use]
    pub fn config(mut self, config: WorkspaceConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the experiment new runs are created in
    #[must_use]
    pub fn experiment_name(mut self, name: impl Into<String>) -> Self {
        self.config = self.config.with_experiment_name(name);
        self
    }

    /// Persist sealed runs under `dir`
    #[must_use]
    pub fn tracking_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config = self.config.with_tracking_dir(dir);
        self
    }

    /// Persist versioned tables under `dir`
    #[must_use]
    pub fn tables_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config = self.config.with_tables_dir(dir);
        self
    }

    /// Set the registry delete policy (Poka-Yoke default: require archived)
    #[must_use]
    pub fn delete_policy(mut self, policy: DeletePolicy) -> Self {
        let registry = self.config.registry().with_delete_policy(policy);
        self.config = self.config.with_registry(registry);
        self
    }

    /// Build the workspace
    ///
    /// # Errors
    ///
    /// Returns error if the tracking or tables directory cannot be opened
    pub fn build(self) -> Result<Workspace> {
        Workspace::new(self.config)
    }
}
