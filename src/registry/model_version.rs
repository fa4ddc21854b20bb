//! Registered models and their versions

use super::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Readiness of a model version. Registration is synchronous, so versions
/// are `Ready` as soon as they exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionStatus {
    /// Usable
    #[default]
    Ready,
}

/// One entry in a version's stage log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    from: Stage,
    to: Stage,
    timestamp: DateTime<Utc>,
}

impl StageTransition {
    pub(crate) fn new(from: Stage, to: Stage) -> Self {
        Self {
            from,
            to,
            timestamp: Utc::now(),
        }
    }

    /// Stage before the transition
    #[must_use]
    pub const fn from_stage(&self) -> Stage {
        self.from
    }

    /// Stage after the transition
    #[must_use]
    pub const fn to_stage(&self) -> Stage {
        self.to
    }

    /// When the transition happened
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// A numbered version of a registered model, pointing at a run artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    name: String,
    version: u32,
    source: String,
    run_id: String,
    description: String,
    stage: Stage,
    status: VersionStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    transitions: Vec<StageTransition>,
}

impl ModelVersion {
    pub(crate) fn new(
        name: impl Into<String>,
        version: u32,
        source: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            version,
            source: source.into(),
            run_id: run_id.into(),
            description: String::new(),
            stage: Stage::None,
            status: VersionStatus::Ready,
            created_at: now,
            updated_at: now,
            transitions: Vec::new(),
        }
    }

    /// Registered model name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version number, starting at 1
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Source artifact URI (`runs:/<run_id>/<path>`)
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Run that produced the model
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Free-form description, empty by default
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Current stage
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Readiness
    #[must_use]
    pub const fn status(&self) -> VersionStatus {
        self.status
    }

    /// Registration time
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last stage or description change
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Stage changes, oldest first
    #[must_use]
    pub fn transitions(&self) -> &[StageTransition] {
        &self.transitions
    }

    /// Move to `stage`. Returns false (and changes nothing) if the version is
    /// already there.
    pub(crate) fn set_stage(&mut self, stage: Stage) -> bool {
        if self.stage == stage {
            return false;
        }
        self.transitions.push(StageTransition::new(self.stage, stage));
        self.stage = stage;
        self.updated_at = Utc::now();
        true
    }

    pub(crate) fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
        self.updated_at = Utc::now();
    }
}

/// Named catalog entry grouping ordered model versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredModel {
    name: String,
    description: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    versions: BTreeMap<u32, ModelVersion>,
    next_version: u32,
}

impl RegisteredModel {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: String::new(),
            created_at: now,
            updated_at: now,
            versions: BTreeMap::new(),
            next_version: 1,
        }
    }

    /// Model name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Model-level description
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Creation time
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last change to the model or any of its versions
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Versions ordered by number
    pub fn versions(&self) -> impl Iterator<Item = &ModelVersion> {
        self.versions.values()
    }

    /// One version
    #[must_use]
    pub fn version(&self, version: u32) -> Option<&ModelVersion> {
        self.versions.get(&version)
    }

    /// Number the next registration will receive. Numbers of deleted
    /// versions are never handed out again.
    #[must_use]
    pub const fn next_version(&self) -> u32 {
        self.next_version
    }

    /// Highest-numbered version in `stage`
    #[must_use]
    pub fn latest_in_stage(&self, stage: Stage) -> Option<&ModelVersion> {
        self.versions.values().rev().find(|v| v.stage() == stage)
    }

    /// Highest-numbered version
    #[must_use]
    pub fn latest(&self) -> Option<&ModelVersion> {
        self.versions.values().next_back()
    }

    /// Versions that are not archived, by number
    #[must_use]
    pub fn active_versions(&self) -> Vec<u32> {
        self.versions
            .values()
            .filter(|v| v.stage().is_active())
            .map(ModelVersion::version)
            .collect()
    }

    pub(crate) fn add_version(&mut self, source: &str, run_id: &str) -> ModelVersion {
        let version = ModelVersion::new(&self.name, self.next_version, source, run_id);
        self.next_version += 1;
        self.versions.insert(version.version(), version.clone());
        self.touch();
        version
    }

    pub(crate) fn version_mut(&mut self, version: u32) -> Option<&mut ModelVersion> {
        self.versions.get_mut(&version)
    }

    pub(crate) fn versions_mut(&mut self) -> impl Iterator<Item = &mut ModelVersion> {
        self.versions.values_mut()
    }

    pub(crate) fn remove_version(&mut self, version: u32) -> Option<ModelVersion> {
        let removed = self.versions.remove(&version);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    pub(crate) fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
        self.touch();
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
