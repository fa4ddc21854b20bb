//! Model registry
//!
//! **Catalog of deployable models** (one entry per name):
//! - `register_model` turns a run artifact into the next version of a model
//! - versions move freely between `None`, `Staging`, `Production` and
//!   `Archived`; setting the current stage again changes nothing
//! - deleting a model is governed by an explicit [`DeletePolicy`]
//!
//! Version numbers are assigned under the model's map entry lock, so
//! concurrent registrations of one name receive distinct, dense numbers.
//!
//! ## Example
//!
//! ```rust
//! use tracklake::registry::{ModelRegistry, Stage};
//!
//! # fn main() -> tracklake::Result<()> {
//! let registry = ModelRegistry::default();
//! let v1 = registry.register_model("runs:/4f2a/log-model", "airbnb-lr")?;
//! assert_eq!(v1.version(), 1);
//!
//! registry.transition_stage("airbnb-lr", 1, "production".parse::<Stage>()?)?;
//! assert_eq!(registry.resolve_uri("models:/airbnb-lr/Production")?, "runs:/4f2a/log-model");
//! # Ok(())
//! # }
//! ```

mod model_version;
mod stage;

pub use model_version::{ModelVersion, RegisteredModel, StageTransition, VersionStatus};
pub use stage::Stage;

use crate::config::RegistryConfig;
use crate::experiment::RunArtifactUri;
use crate::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What `delete_model` does with versions that are still active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Refuse unless every remaining version is `Archived`
    #[default]
    RequireArchived,
    /// Delete all versions regardless of stage
    Cascade,
}

/// Which description `update_description` edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionTarget {
    /// The registered model itself
    Model,
    /// One version of it
    Version(u32),
}

/// Version part of a `models:/` URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    /// Explicit number
    Number(u32),
    /// Highest version in the stage
    Stage(Stage),
    /// Highest version overall
    Latest,
}

/// Parsed `models:/<name>/<version|stage|latest>` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelUri {
    name: String,
    selector: VersionSelector,
}

impl ModelUri {
    /// Scheme prefix of model URIs
    pub const SCHEME: &'static str = "models:/";

    /// Registered model name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version selector
    #[must_use]
    pub const fn selector(&self) -> VersionSelector {
        self.selector
    }
}

impl FromStr for ModelUri {
    type Err = Error;

    fn from_str(uri: &str) -> Result<Self> {
        let rest = uri.strip_prefix(Self::SCHEME).ok_or_else(|| {
            Error::InvalidInput(format!("'{uri}' is not a models:/<name>/<version> URI"))
        })?;
        let (name, selector) = rest
            .trim_matches('/')
            .rsplit_once('/')
            .filter(|(name, selector)| !name.is_empty() && !selector.is_empty())
            .ok_or_else(|| {
                Error::InvalidInput(format!("'{uri}' needs both a model name and a version"))
            })?;

        let selector = if selector.eq_ignore_ascii_case("latest") {
            VersionSelector::Latest
        } else if let Ok(number) = selector.parse::<u32>() {
            VersionSelector::Number(number)
        } else {
            VersionSelector::Stage(selector.parse()?)
        };
        Ok(Self {
            name: name.to_string(),
            selector,
        })
    }
}

impl fmt::Display for ModelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.selector {
            VersionSelector::Number(n) => write!(f, "{}{}/{n}", Self::SCHEME, self.name),
            VersionSelector::Stage(stage) => write!(f, "{}{}/{stage}", Self::SCHEME, self.name),
            VersionSelector::Latest => write!(f, "{}{}/latest", Self::SCHEME, self.name),
        }
    }
}

/// Concurrent registry of models keyed by name.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: DashMap<String, RegisteredModel, FxBuildHasher>,
    config: RegistryConfig,
}

impl ModelRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            models: DashMap::with_hasher(FxBuildHasher),
            config,
        }
    }

    /// Registry settings
    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register the artifact at `source_uri` as the next version of `name`,
    /// creating the model on first use.
    ///
    /// # Errors
    /// `InvalidInput` if the name is empty, contains `/` or has surrounding
    /// whitespace, or the URI is not `runs:/<run_id>/<path>`
    pub fn register_model(&self, source_uri: &str, name: &str) -> Result<ModelVersion> {
        let source: RunArtifactUri = source_uri.parse()?;
        let name = validate_name(name)?;

        let version = self
            .models
            .entry(name.to_string())
            .or_insert_with(|| RegisteredModel::new(name))
            .add_version(&source.to_string(), source.run_id());

        tracing::info!(
            model = name,
            version = version.version(),
            source = %source,
            "registered model version"
        );
        Ok(version)
    }

    /// Move a version to `stage`.
    ///
    /// # Errors
    /// `UnknownModel` / `UnknownVersion` if the version does not exist
    pub fn transition_stage(&self, name: &str, version: u32, stage: Stage) -> Result<ModelVersion> {
        self.transition_stage_with(name, version, stage, false)
    }

    /// Move a version to `stage`, optionally archiving the versions currently
    /// in that stage.
    ///
    /// # Errors
    /// - `UnknownModel` / `UnknownVersion` if the version does not exist
    /// - `InvalidInput` if `archive_existing` is set for a stage other than
    ///   `Staging` or `Production`
    pub fn transition_stage_with(
        &self,
        name: &str,
        version: u32,
        stage: Stage,
        archive_existing: bool,
    ) -> Result<ModelVersion> {
        if archive_existing && !matches!(stage, Stage::Staging | Stage::Production) {
            return Err(Error::InvalidInput(format!(
                "archive_existing only applies to Staging and Production, not {stage}"
            )));
        }

        let (from, updated) = self.update_model(name, |model| {
            let target = model
                .version_mut(version)
                .ok_or_else(|| unknown_version(name, version))?;
            let from = target.stage();
            if !target.set_stage(stage) {
                return Ok((from, None));
            }
            let updated = target.clone();

            if archive_existing {
                for other in model.versions_mut() {
                    if other.version() != version && other.stage() == stage {
                        other.set_stage(Stage::Archived);
                        tracing::info!(
                            model = name,
                            version = other.version(),
                            "archived existing version"
                        );
                    }
                }
            }
            model.touch();
            Ok((from, Some(updated)))
        })?;

        match updated {
            Some(updated) => {
                tracing::info!(
                    model = name,
                    version = version,
                    from = %from,
                    stage = %stage,
                    "transitioned model version"
                );
                Ok(updated)
            }
            None => self.get_model_version(name, version),
        }
    }

    /// Replace the description of the model or one of its versions.
    ///
    /// # Errors
    /// `UnknownModel` / `UnknownVersion` if the target does not exist
    pub fn update_description(
        &self,
        name: &str,
        target: DescriptionTarget,
        description: &str,
    ) -> Result<()> {
        self.update_model(name, |model| {
            match target {
                DescriptionTarget::Model => model.set_description(description),
                DescriptionTarget::Version(version) => {
                    model
                        .version_mut(version)
                        .ok_or_else(|| unknown_version(name, version))?
                        .set_description(description);
                    model.touch();
                }
            }
            Ok(())
        })
    }

    /// All versions of `name` by number; empty for unknown names.
    #[must_use]
    pub fn search_versions(&self, name: &str) -> Vec<ModelVersion> {
        self.models
            .get(name)
            .map(|model| model.versions().cloned().collect())
            .unwrap_or_default()
    }

    /// One version.
    ///
    /// # Errors
    /// `UnknownModel` / `UnknownVersion` if it does not exist
    pub fn get_model_version(&self, name: &str, version: u32) -> Result<ModelVersion> {
        let model = self
            .models
            .get(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))?;
        model
            .version(version)
            .cloned()
            .ok_or_else(|| unknown_version(name, version))
    }

    /// A registered model with all its versions.
    ///
    /// # Errors
    /// `UnknownModel` if it does not exist
    pub fn get_registered_model(&self, name: &str) -> Result<RegisteredModel> {
        self.models
            .get(name)
            .map(|model| model.value().clone())
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    /// Highest version in each of `stages` (every stage when empty),
    /// ordered by version.
    ///
    /// # Errors
    /// `UnknownModel` if the model does not exist
    pub fn latest_versions(&self, name: &str, stages: &[Stage]) -> Result<Vec<ModelVersion>> {
        let model = self
            .models
            .get(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))?;
        let stages = if stages.is_empty() { &Stage::ALL[..] } else { stages };

        let mut latest: Vec<ModelVersion> = stages
            .iter()
            .filter_map(|stage| model.latest_in_stage(*stage).cloned())
            .collect();
        latest.sort_by_key(ModelVersion::version);
        latest.dedup_by_key(|v| v.version());
        Ok(latest)
    }

    /// All registered models by name
    #[must_use]
    pub fn list_models(&self) -> Vec<RegisteredModel> {
        let mut models: Vec<RegisteredModel> =
            self.models.iter().map(|m| m.value().clone()).collect();
        models.sort_by(|a, b| a.name().cmp(b.name()));
        models
    }

    /// Delete one version. Its number is not reused.
    ///
    /// # Errors
    /// `UnknownModel` / `UnknownVersion` if it does not exist
    pub fn delete_version(&self, name: &str, version: u32) -> Result<ModelVersion> {
        let removed = self.update_model(name, |model| {
            model
                .remove_version(version)
                .ok_or_else(|| unknown_version(name, version))
        })?;
        tracing::info!(model = name, version = version, "deleted model version");
        Ok(removed)
    }

    /// Delete a model under the configured [`DeletePolicy`].
    ///
    /// # Errors
    /// - `UnknownModel` if it does not exist
    /// - `ModelHasActiveVersions` under `RequireArchived` while any version
    ///   is not archived
    pub fn delete_model(&self, name: &str) -> Result<RegisteredModel> {
        self.delete_model_with(name, self.config.delete_policy())
    }

    /// Delete a model under an explicit policy.
    ///
    /// # Errors
    /// Same as [`ModelRegistry::delete_model`]
    pub fn delete_model_with(&self, name: &str, policy: DeletePolicy) -> Result<RegisteredModel> {
        let Entry::Occupied(entry) = self.models.entry(name.to_string()) else {
            return Err(Error::UnknownModel(name.to_string()));
        };

        if policy == DeletePolicy::RequireArchived {
            let active = entry.get().active_versions();
            if !active.is_empty() {
                return Err(Error::ModelHasActiveVersions {
                    name: name.to_string(),
                    active,
                });
            }
        }

        let (_, model) = entry.remove_entry();
        tracing::info!(model = name, policy = ?policy, "deleted registered model");
        Ok(model)
    }

    /// Resolve a `models:/` URI to the version it currently names.
    ///
    /// # Errors
    /// - `InvalidInput` / `InvalidStage` for malformed URIs
    /// - `UnknownModel` / `UnknownVersion` for missing models or numbers
    /// - `ArtifactNotFound` if no version is in the requested stage
    pub fn resolve_version(&self, uri: &str) -> Result<ModelVersion> {
        let parsed: ModelUri = uri.parse()?;
        let model = self
            .models
            .get(parsed.name())
            .ok_or_else(|| Error::UnknownModel(parsed.name().to_string()))?;

        let found = match parsed.selector() {
            VersionSelector::Number(n) => {
                return model
                    .version(n)
                    .cloned()
                    .ok_or_else(|| unknown_version(parsed.name(), n));
            }
            VersionSelector::Stage(stage) => model.latest_in_stage(stage),
            VersionSelector::Latest => model.latest(),
        };
        found
            .cloned()
            .ok_or_else(|| Error::ArtifactNotFound(uri.to_string()))
    }

    /// Resolve a `models:/` URI to its source `runs:/` URI.
    ///
    /// # Errors
    /// Same as [`ModelRegistry::resolve_version`]
    pub fn resolve_uri(&self, uri: &str) -> Result<String> {
        Ok(self.resolve_version(uri)?.source().to_string())
    }

    /// Apply `change` to a model while holding its entry lock.
    fn update_model<T>(
        &self,
        name: &str,
        change: impl FnOnce(&mut RegisteredModel) -> Result<T>,
    ) -> Result<T> {
        let mut model = self
            .models
            .get_mut(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))?;
        change(model.value_mut())
    }
}

// Names are stored exactly as given, so lookups never need normalizing
fn validate_name(name: &str) -> Result<&str> {
    if name.trim().is_empty() || name.contains('/') || name.trim() != name {
        return Err(Error::InvalidInput(format!(
            "model name '{name}' must be non-empty, contain no '/' and have no surrounding whitespace"
        )));
    }
    Ok(name)
}

fn unknown_version(name: &str, version: u32) -> Error {
    Error::UnknownVersion {
        name: name.to_string(),
        version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_versions(n: u32) -> ModelRegistry {
        let registry = ModelRegistry::default();
        for i in 0..n {
            registry
                .register_model(&format!("runs:/run{i}/model"), "airbnb-lr")
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_register_numbers_versions() {
        let registry = registry_with_versions(2);
        let versions = registry.search_versions("airbnb-lr");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version(), 1);
        assert_eq!(versions[1].version(), 2);
        assert_eq!(versions[1].run_id(), "run1");
        assert_eq!(versions[0].stage(), Stage::None);
    }

    #[test]
    fn test_register_rejects_bad_uri() {
        let registry = ModelRegistry::default();
        for bad in ["s3://bucket/model", "runs:/", "runs:/abc", "runs://model"] {
            assert!(
                matches!(registry.register_model(bad, "m"), Err(Error::InvalidInput(_))),
                "{bad}"
            );
        }
        assert!(registry.list_models().is_empty());
    }

    #[test]
    fn test_register_rejects_padded_names() {
        let registry = ModelRegistry::default();
        for bad in [" airbnb-lr", "airbnb-lr ", "  ", "a/b"] {
            assert!(
                matches!(
                    registry.register_model("runs:/abc/model", bad),
                    Err(Error::InvalidInput(_))
                ),
                "{bad:?}"
            );
        }
        assert!(registry.list_models().is_empty());

        registry.register_model("runs:/abc/model", "airbnb-lr").unwrap();
        registry
            .transition_stage("airbnb-lr", 1, Stage::Staging)
            .unwrap();
        assert_eq!(registry.search_versions("airbnb-lr").len(), 1);
    }

    #[test]
    fn test_transition_shows_in_search() {
        let registry = registry_with_versions(1);
        let v = registry
            .transition_stage("airbnb-lr", 1, Stage::Production)
            .unwrap();
        assert_eq!(v.stage(), Stage::Production);
        assert_eq!(
            registry.search_versions("airbnb-lr")[0].stage(),
            Stage::Production
        );
    }

    #[test]
    fn test_transition_unknown() {
        let registry = registry_with_versions(1);
        assert!(matches!(
            registry.transition_stage("nope", 1, Stage::Staging),
            Err(Error::UnknownModel(_))
        ));
        assert!(matches!(
            registry.transition_stage("airbnb-lr", 9, Stage::Staging),
            Err(Error::UnknownVersion { version: 9, .. })
        ));
    }

    #[test]
    fn test_archive_existing() {
        let registry = registry_with_versions(2);
        registry.transition_stage("airbnb-lr", 1, Stage::Production).unwrap();
        registry
            .transition_stage_with("airbnb-lr", 2, Stage::Production, true)
            .unwrap();

        let versions = registry.search_versions("airbnb-lr");
        assert_eq!(versions[0].stage(), Stage::Archived);
        assert_eq!(versions[1].stage(), Stage::Production);

        assert!(matches!(
            registry.transition_stage_with("airbnb-lr", 1, Stage::Archived, true),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_update_descriptions() {
        let registry = registry_with_versions(1);
        registry
            .update_description("airbnb-lr", DescriptionTarget::Model, "Predicts listing prices")
            .unwrap();
        registry
            .update_description("airbnb-lr", DescriptionTarget::Version(1), "Baseline LR")
            .unwrap();

        let model = registry.get_registered_model("airbnb-lr").unwrap();
        assert_eq!(model.description(), "Predicts listing prices");
        assert_eq!(model.version(1).unwrap().description(), "Baseline LR");
        assert!(registry
            .update_description("airbnb-lr", DescriptionTarget::Version(4), "x")
            .is_err());
    }

    #[test]
    fn test_search_unknown_name_is_empty() {
        assert!(ModelRegistry::default().search_versions("ghost").is_empty());
    }

    #[test]
    fn test_delete_requires_archived() {
        let registry = registry_with_versions(2);
        registry.transition_stage("airbnb-lr", 1, Stage::Archived).unwrap();

        let err = registry.delete_model("airbnb-lr").unwrap_err();
        assert!(matches!(err, Error::ModelHasActiveVersions { ref active, .. } if active == &[2]));

        registry.transition_stage("airbnb-lr", 2, Stage::Archived).unwrap();
        registry.delete_model("airbnb-lr").unwrap();
        assert!(matches!(
            registry.get_registered_model("airbnb-lr"),
            Err(Error::UnknownModel(_))
        ));
    }

    #[test]
    fn test_delete_cascade() {
        let registry = ModelRegistry::new(
            RegistryConfig::default().with_delete_policy(DeletePolicy::Cascade),
        );
        registry.register_model("runs:/a/model", "m").unwrap();
        registry.transition_stage("m", 1, Stage::Production).unwrap();

        let deleted = registry.delete_model("m").unwrap();
        assert_eq!(deleted.versions().count(), 1);
        assert!(registry.list_models().is_empty());
    }

    #[test]
    fn test_delete_version_keeps_numbering() {
        let registry = registry_with_versions(2);
        registry.delete_version("airbnb-lr", 2).unwrap();
        let v = registry.register_model("runs:/run9/model", "airbnb-lr").unwrap();
        assert_eq!(v.version(), 3);
    }

    #[test]
    fn test_latest_versions() {
        let registry = registry_with_versions(3);
        registry.transition_stage("airbnb-lr", 1, Stage::Production).unwrap();
        registry.transition_stage("airbnb-lr", 2, Stage::Staging).unwrap();

        let latest = registry.latest_versions("airbnb-lr", &[]).unwrap();
        let numbers: Vec<u32> = latest.iter().map(ModelVersion::version).collect();
        assert_eq!(numbers, [1, 2, 3]);

        let prod = registry
            .latest_versions("airbnb-lr", &[Stage::Production])
            .unwrap();
        assert_eq!(prod.len(), 1);
        assert_eq!(prod[0].version(), 1);
    }

    #[test]
    fn test_resolve_uri() {
        let registry = registry_with_versions(2);
        registry.transition_stage("airbnb-lr", 1, Stage::Staging).unwrap();

        assert_eq!(registry.resolve_uri("models:/airbnb-lr/2").unwrap(), "runs:/run1/model");
        assert_eq!(registry.resolve_uri("models:/airbnb-lr/staging").unwrap(), "runs:/run0/model");
        assert_eq!(registry.resolve_uri("models:/airbnb-lr/latest").unwrap(), "runs:/run1/model");
        assert!(matches!(
            registry.resolve_uri("models:/airbnb-lr/Production"),
            Err(Error::ArtifactNotFound(_))
        ));
        assert!(matches!(
            registry.resolve_uri("models:/airbnb-lr/Prod"),
            Err(Error::InvalidStage(_))
        ));
    }

    #[test]
    fn test_model_uri_display() {
        let uri: ModelUri = "models:/airbnb-lr/Production".parse().unwrap();
        assert_eq!(uri.selector(), VersionSelector::Stage(Stage::Production));
        assert_eq!(uri.to_string(), "models:/airbnb-lr/Production");
    }

    #[test]
    fn test_concurrent_registration_is_dense() {
        let registry = ModelRegistry::default();
        std::thread::scope(|s| {
            for t in 0..8 {
                let registry = &registry;
                s.spawn(move || {
                    for i in 0..10 {
                        registry
                            .register_model(&format!("runs:/t{t}r{i}/model"), "shared")
                            .unwrap();
                    }
                });
            }
        });

        let numbers: Vec<u32> = registry
            .search_versions("shared")
            .iter()
            .map(ModelVersion::version)
            .collect();
        assert_eq!(numbers, (1..=80).collect::<Vec<_>>());
    }
}
