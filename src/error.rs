//! Error types for tracklake
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// tracklake error types
#[derive(Error, Debug)]
pub enum Error {
    /// Requested snapshot is beyond the table history
    #[error("Version {version} not found for table '{table}' (latest is {latest})")]
    VersionNotFound {
        /// Table path
        table: String,
        /// Requested version
        version: u64,
        /// Latest committed version
        latest: u64,
    },

    /// No table was ever written at this path
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Incoming data does not fit the table schema
    #[error("Schema mismatch: {0}\nPass schema evolution explicitly to add columns")]
    SchemaMismatch(String),

    /// Parameters are write-once per run
    #[error("Parameter '{key}' already logged for run {run_id}")]
    DuplicateParam {
        /// Run that already holds the key
        run_id: String,
        /// Parameter key
        key: String,
    },

    /// Run ID is unknown to the tracker
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Run was already sealed
    #[error("Run {0} is sealed and can no longer be modified")]
    RunSealed(String),

    /// Registered model does not exist
    #[error("Registered model not found: {0}")]
    UnknownModel(String),

    /// Model exists but the version does not
    #[error("Version {version} not found for registered model '{name}'")]
    UnknownVersion {
        /// Registered model name
        name: String,
        /// Requested version
        version: u32,
    },

    /// Deletion refused under the require-archived policy
    #[error("Registered model '{name}' has active versions {active:?}\nArchive or delete them first, or delete with the cascade policy")]
    ModelHasActiveVersions {
        /// Registered model name
        name: String,
        /// Versions not yet archived
        active: Vec<u32>,
    },

    /// Reserved for registries that restrict stage transitions
    #[error("Invalid stage transition for '{name}' v{version}: {from} -> {to}")]
    InvalidStageTransition {
        /// Registered model name
        name: String,
        /// Model version
        version: u32,
        /// Current stage
        from: String,
        /// Requested stage
        to: String,
    },

    /// Stage string outside None/Staging/Production/Archived
    #[error("Invalid stage '{0}': expected one of None, Staging, Production, Archived")]
    InvalidStage(String),

    /// Artifact URI does not resolve to stored content
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    /// Filter expression parse error
    #[error("Filter parse error: {0}")]
    ParseError(String),

    /// Invalid input parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage error (Parquet/Arrow)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
