//! Experiment tracking
//!
//! Runs record the parameters, metrics, tags and artifacts of one training
//! execution. Runs are grouped into experiments and found again with filter
//! expressions (see [`crate::query`]).
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord (1) ──< RunRecord (N)
//!                              │
//!                              ├── params  (write-once)
//!                              ├──< MetricRecord (N) [append-only history]
//!                              ├── tags    (overwritable)
//!                              └──< ArtifactRecord (N) [CAS]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use tracklake::experiment::{ArtifactSource, RunStatus, RunTracker};
//!
//! # fn main() -> tracklake::Result<()> {
//! let tracker = RunTracker::in_memory();
//!
//! let run = tracker.start_run("lr_model")?;
//! run.log_param("label", "price")?;
//! run.log_metric("rmse", 5.2, None)?;
//! let model = run.log_artifact(
//!     ArtifactSource::Json(serde_json::json!({"coef": [0.3]})),
//!     "log-model",
//! )?;
//! let record = run.end(RunStatus::Finished)?;
//!
//! let found = tracker.search_runs("params.label = 'price'")?;
//! assert_eq!(found[0].run_id, record.run_id());
//! assert!(model.uri().starts_with("runs:/"));
//! # Ok(())
//! # }
//! ```

mod artifact_record;
mod experiment_record;
mod metric_record;
mod run_record;
mod store;
mod tracker;

pub(crate) use artifact_record::validate_artifact_path;
pub use artifact_record::{
    content_hash, ArtifactKind, ArtifactRecord, ArtifactSource, RunArtifactUri,
};
pub use experiment_record::ExperimentRecord;
pub use metric_record::{MetricRecord, MetricRecordBuilder};
pub use run_record::{RunRecord, RunStatus, RunSummary};
pub use store::ExperimentStore;
pub use tracker::{RunHandle, RunTracker};
