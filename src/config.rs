//! Workspace configuration
//!
//! All settings are explicit values handed to constructors; nothing is read
//! from ambient session state. Configs deserialize from JSON so a pipeline
//! can keep them next to its data splits.
//!
//! ```rust
//! use tracklake::config::WorkspaceConfig;
//! use tracklake::registry::DeletePolicy;
//!
//! let config = WorkspaceConfig::from_json_str(
//!     r#"{ "experiment_name": "airbnb-lr", "registry": { "delete_policy": "cascade" } }"#,
//! )?;
//! assert_eq!(config.experiment_name(), "airbnb-lr");
//! assert_eq!(config.registry().delete_policy(), DeletePolicy::Cascade);
//! # Ok::<(), tracklake::Error>(())
//! ```

use crate::experiment::ExperimentRecord;
use crate::registry::DeletePolicy;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Model registry settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    delete_policy: DeletePolicy,
}

impl RegistryConfig {
    /// Policy applied by `delete_model`
    #[must_use]
    pub const fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }

    /// Set the delete policy
    #[must_use]
    pub const fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }
}

/// Settings for a [`crate::Workspace`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    experiment_name: String,
    tracking_dir: Option<PathBuf>,
    tables_dir: Option<PathBuf>,
    registry: RegistryConfig,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            experiment_name: ExperimentRecord::DEFAULT_NAME.to_string(),
            tracking_dir: None,
            tables_dir: None,
            registry: RegistryConfig::default(),
        }
    }
}

impl WorkspaceConfig {
    /// Parse a config from JSON; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns `Json` if the document is malformed
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON config file.
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be read, `Json` if it is malformed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Experiment that new runs are created in
    #[must_use]
    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    /// Directory sealed runs are persisted to, if any
    #[must_use]
    pub fn tracking_dir(&self) -> Option<&Path> {
        self.tracking_dir.as_deref()
    }

    /// Directory versioned tables are persisted to, if any
    #[must_use]
    pub fn tables_dir(&self) -> Option<&Path> {
        self.tables_dir.as_deref()
    }

    /// Registry settings
    #[must_use]
    pub const fn registry(&self) -> &RegistryConfig {
        &self.registry
    }

    /// Set the active experiment name
    #[must_use]
    pub fn with_experiment_name(mut self, name: impl Into<String>) -> Self {
        self.experiment_name = name.into();
        self
    }

    /// Persist sealed runs under `dir`
    #[must_use]
    pub fn with_tracking_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tracking_dir = Some(dir.into());
        self
    }

    /// Persist table commits under `dir`
    #[must_use]
    pub fn with_tables_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tables_dir = Some(dir.into());
        self
    }

    /// Replace the registry settings
    #[must_use]
    pub const fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }
}
