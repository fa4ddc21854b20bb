//! Versioned table store (Arrow)
//!
//! **Append-Only History** (every write is a snapshot):
//! - Each write to a table path commits a new numbered [`Snapshot`]
//! - `Overwrite` replaces the logical content but never rewrites history
//! - Reading "as of" version N returns exactly what snapshot N committed
//! - Schema evolution is additive only and must be requested per write
//!
//! Snapshots share Arrow buffers with each other, so keeping every version
//! readable costs one batch list per version, not one copy of the data.
//!
//! [`VersionedStore::open`] additionally persists each commit as a Parquet
//! part file plus a JSON log entry, and replays them on the next open.
//!
//! ## Example
//!
//! ```rust
//! use tracklake::storage::{VersionedStore, WriteOptions};
//! use arrow::array::{Float64Array, RecordBatch};
//! use arrow::datatypes::{DataType, Field, Schema};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = Arc::new(Schema::new(vec![Field::new("price", DataType::Float64, false)]));
//! let batch = RecordBatch::try_new(schema, vec![Arc::new(Float64Array::from(vec![120.0, 95.5]))])?;
//!
//! let store = VersionedStore::new();
//! let snapshot = store.write("/splits/train", batch, WriteOptions::overwrite())?;
//! assert_eq!(snapshot.version(), 0);
//!
//! let train = store.read("/splits/train", Some(0))?;
//! assert_eq!(train.num_rows(), 2);
//! # Ok(())
//! # }
//! ```

mod commit_log;
mod dataset;
mod schema;
mod snapshot;

pub use dataset::Dataset;
pub use snapshot::{Snapshot, WriteMode, WriteOptions};

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use schema::{align_batch, resolve_schema};
use std::fs;
use std::path::{Path, PathBuf};

/// One committed version: its history row and the data it made visible.
#[derive(Debug, Clone)]
struct CommittedVersion {
    snapshot: Snapshot,
    data: Dataset,
}

/// Ordered versions of a single table.
#[derive(Debug, Default)]
struct TableLog {
    versions: Vec<CommittedVersion>,
}

impl TableLog {
    fn latest(&self) -> Option<&CommittedVersion> {
        self.versions.last()
    }

    fn latest_version(&self) -> u64 {
        self.versions.len().saturating_sub(1) as u64
    }

    fn get(&self, version: u64) -> Option<&CommittedVersion> {
        usize::try_from(version)
            .ok()
            .and_then(|index| self.versions.get(index))
    }

    /// Validate the write against the latest version and build the next
    /// one. The log itself is not touched.
    fn prepare(&self, table: &str, incoming: &Dataset, options: WriteOptions) -> Result<CommittedVersion> {
        let data = match self.latest() {
            None => incoming.clone(),
            Some(latest) => {
                let schema = resolve_schema(
                    &latest.data.schema(),
                    &incoming.schema(),
                    options.merges_schema(),
                )?;

                let kept: &[_] = match options.mode() {
                    WriteMode::Append => latest.data.batches(),
                    WriteMode::Overwrite => &[],
                };

                let batches = kept
                    .iter()
                    .chain(incoming.batches())
                    .map(|batch| align_batch(batch, &schema))
                    .collect::<Result<Vec<_>>>()?;

                Dataset::try_new(schema, batches)?
            }
        };

        let version = self.versions.len() as u64;
        let snapshot = Snapshot::new(table, version, options, data.schema(), data.num_rows());
        Ok(CommittedVersion { snapshot, data })
    }
}

/// Path-addressed store of versioned tables.
///
/// Thread-safe: each write holds its table's map entry while validating and
/// appending, so snapshot numbers stay dense and unique under concurrent
/// writers. Content is last-write-wins.
#[derive(Debug)]
pub struct VersionedStore {
    tables: DashMap<String, TableLog, FxBuildHasher>,
    root: Option<PathBuf>,
}

impl Default for VersionedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionedStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: DashMap::with_hasher(FxBuildHasher),
            root: None,
        }
    }

    /// Open a store persisted under `dir`, replaying every table committed
    /// there by earlier processes. Later writes are persisted too.
    ///
    /// # Errors
    /// - `Io`/`Parquet`/`Json` if the directory or a commit cannot be read
    /// - `StorageError` if a table's log skips a version
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let store = Self {
            tables: DashMap::with_hasher(FxBuildHasher),
            root: Some(dir.to_path_buf()),
        };

        for (table, commits) in commit_log::load_tables(dir)? {
            let mut log = TableLog::default();
            for (entry, data) in commits {
                if entry.version() != log.versions.len() as u64 {
                    return Err(Error::StorageError(format!(
                        "commit log of '{table}' jumps to version {} after {} commits",
                        entry.version(),
                        log.versions.len()
                    )));
                }
                let mut committed = log.prepare(&table, &data, entry.options())?;
                committed.snapshot = committed.snapshot.with_timestamp(entry.timestamp());
                log.versions.push(committed);
            }
            store.tables.insert(table, log);
        }

        tracing::info!(
            dir = %dir.display(),
            tables = store.tables.len(),
            "opened table directory"
        );
        Ok(store)
    }

    /// Directory commits are persisted to, if any
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Write data to a table, committing a new snapshot.
    ///
    /// The first write to a path creates the table with the data's schema.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the path is empty or `data` holds no batches
    /// - `SchemaMismatch` if the data adds columns without
    ///   [`WriteOptions::merge_schema`], retypes a column, or leaves a
    ///   non-nullable column empty
    /// - `Io`/`Parquet`/`Json` if a persisted store cannot write the commit;
    ///   the snapshot is then not committed
    pub fn write(
        &self,
        path: &str,
        data: impl Into<Dataset>,
        options: WriteOptions,
    ) -> Result<Snapshot> {
        let table = normalize_path(path)?;
        let data = data.into();
        if data.batches().is_empty() {
            return Err(Error::InvalidInput(format!(
                "write to '{table}' carries no record batches"
            )));
        }

        // A table only appears once its first commit succeeded
        let snapshot = match self.tables.entry(table.clone()) {
            Entry::Occupied(mut entry) => self.commit(entry.get_mut(), &table, &data, options)?,
            Entry::Vacant(slot) => {
                let mut log = TableLog::default();
                let snapshot = self.commit(&mut log, &table, &data, options)?;
                slot.insert(log);
                snapshot
            }
        };

        tracing::info!(
            table = %table,
            version = snapshot.version(),
            mode = %snapshot.mode(),
            rows = snapshot.num_rows(),
            "committed table snapshot"
        );
        Ok(snapshot)
    }

    fn commit(
        &self,
        log: &mut TableLog,
        table: &str,
        data: &Dataset,
        options: WriteOptions,
    ) -> Result<Snapshot> {
        let committed = log.prepare(table, data, options)?;
        if let Some(root) = &self.root {
            commit_log::write_commit(root, data, &committed.snapshot)?;
        }
        let snapshot = committed.snapshot.clone();
        log.versions.push(committed);
        Ok(snapshot)
    }

    /// Read a table as of `version` (`None` = latest).
    ///
    /// # Errors
    ///
    /// - `TableNotFound` if nothing was written at `path`
    /// - `VersionNotFound` if `version` is beyond the history
    pub fn read(&self, path: &str, version: Option<u64>) -> Result<Dataset> {
        let table = normalize_path(path)?;
        let log = self
            .tables
            .get(&table)
            .ok_or_else(|| Error::TableNotFound(table.clone()))?;

        let committed = match version {
            None => log.latest(),
            Some(v) => log.get(v),
        }
        .ok_or_else(|| Error::VersionNotFound {
            table: table.clone(),
            version: version.unwrap_or_default(),
            latest: log.latest_version(),
        })?;

        tracing::debug!(table = %table, version = committed.snapshot.version(), "read table");
        Ok(committed.data.clone())
    }

    /// Read the latest snapshot committed at or before `timestamp`.
    ///
    /// # Errors
    ///
    /// - `TableNotFound` if nothing was written at `path`
    /// - `VersionNotFound` if `timestamp` predates the first snapshot
    pub fn read_as_of(&self, path: &str, timestamp: DateTime<Utc>) -> Result<Dataset> {
        let table = normalize_path(path)?;
        let log = self
            .tables
            .get(&table)
            .ok_or_else(|| Error::TableNotFound(table.clone()))?;

        log.versions
            .iter()
            .rev()
            .find(|committed| committed.snapshot.timestamp() <= timestamp)
            .map(|committed| committed.data.clone())
            .ok_or_else(|| Error::VersionNotFound {
                table: table.clone(),
                version: 0,
                latest: log.latest_version(),
            })
    }

    /// Change log of a table, ordered by version ascending.
    ///
    /// # Errors
    /// Returns `TableNotFound` if nothing was written at `path`
    pub fn history(&self, path: &str) -> Result<Vec<Snapshot>> {
        let table = normalize_path(path)?;
        let log = self
            .tables
            .get(&table)
            .ok_or_else(|| Error::TableNotFound(table.clone()))?;

        Ok(log
            .versions
            .iter()
            .map(|committed| committed.snapshot.clone())
            .collect())
    }

    /// Latest committed version of a table.
    ///
    /// # Errors
    /// Returns `TableNotFound` if nothing was written at `path`
    pub fn latest_version(&self, path: &str) -> Result<u64> {
        let table = normalize_path(path)?;
        self.tables
            .get(&table)
            .map(|log| log.latest_version())
            .ok_or(Error::TableNotFound(table))
    }

    /// Whether a table exists at `path`
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        normalize_path(path).is_ok_and(|table| self.tables.contains_key(&table))
    }

    /// Paths of all tables, sorted
    #[must_use]
    pub fn tables(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        paths.sort_unstable();
        paths
    }
}

/// `/t/` and `/t` address the same table.
fn normalize_path(path: &str) -> Result<String> {
    let trimmed = path.trim();
    let stripped = trimmed.trim_end_matches('/');
    if stripped.is_empty() {
        if trimmed.starts_with('/') {
            return Ok("/".to_string());
        }
        return Err(Error::InvalidInput("table path must not be empty".to_string()));
    }
    Ok(stripped.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Float64Array, Int32Array, RecordBatch};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_possible_wrap)]
    #[allow(clippy::cast_precision_loss)]
    fn listings(start: usize, num_rows: usize) -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("price", DataType::Float64, false),
        ]);

        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int32Array::from_iter_values(
                    (start..start + num_rows).map(|i| i as i32),
                )),
                Arc::new(Float64Array::from_iter_values(
                    (start..start + num_rows).map(|i| 50.0 + i as f64),
                )),
            ],
        )
        .unwrap()
    }

    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_possible_wrap)]
    #[allow(clippy::cast_precision_loss)]
    fn listings_with_x(start: usize, num_rows: usize) -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("price", DataType::Float64, false),
            Field::new("x", DataType::Float64, false),
        ]);

        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int32Array::from_iter_values(
                    (start..start + num_rows).map(|i| i as i32),
                )),
                Arc::new(Float64Array::from_iter_values(
                    (start..start + num_rows).map(|i| 50.0 + i as f64),
                )),
                Arc::new(Float64Array::from_iter_values(
                    (start..start + num_rows).map(|i| (i as f64).ln_1p()),
                )),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_first_write_is_version_zero() {
        let store = VersionedStore::new();
        let snapshot = store.write("/t", listings(0, 3), WriteOptions::append()).unwrap();

        assert_eq!(snapshot.version(), 0);
        assert_eq!(snapshot.num_rows(), 3);
        assert_eq!(store.latest_version("/t").unwrap(), 0);
        assert!(store.contains("/t/"));
    }

    #[test]
    fn test_schema_evolution_scenario() {
        let store = VersionedStore::new();
        store.write("/t", listings(0, 3), WriteOptions::overwrite()).unwrap();
        let v1 = store
            .write(
                "/t",
                listings_with_x(3, 2),
                WriteOptions::append().merge_schema(true),
            )
            .unwrap();
        assert_eq!(v1.version(), 1);

        let v0 = store.read("/t", Some(0)).unwrap();
        assert_eq!(v0.num_rows(), 3);
        assert!(!v0.has_column("x"));

        let latest = store.read("/t", Some(1)).unwrap();
        assert_eq!(latest.num_rows(), 5);
        let x = latest.column("x").unwrap();
        assert_eq!(x.null_count(), 3);
        assert!(x.is_null(0) && x.is_null(2) && x.is_valid(3));
    }

    #[test]
    fn test_append_new_column_without_merge_fails() {
        let store = VersionedStore::new();
        store.write("/t", listings(0, 3), WriteOptions::append()).unwrap();

        let err = store
            .write("/t", listings_with_x(3, 2), WriteOptions::append())
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));

        // Failed write leaves history untouched
        assert_eq!(store.history("/t").unwrap().len(), 1);
    }

    #[test]
    fn test_overwrite_keeps_old_versions_readable() {
        let store = VersionedStore::new();
        store.write("/t", listings(0, 3), WriteOptions::append()).unwrap();
        store.write("/t", listings(10, 1), WriteOptions::overwrite()).unwrap();

        assert_eq!(store.read("/t", None).unwrap().num_rows(), 1);
        assert_eq!(store.read("/t", Some(0)).unwrap().num_rows(), 3);
    }

    #[test]
    fn test_version_not_found() {
        let store = VersionedStore::new();
        store.write("/t", listings(0, 3), WriteOptions::append()).unwrap();

        let err = store.read("/t", Some(5)).unwrap_err();
        assert!(matches!(
            err,
            Error::VersionNotFound {
                version: 5,
                latest: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_table() {
        let store = VersionedStore::new();
        assert!(matches!(store.read("/missing", None), Err(Error::TableNotFound(_))));
        assert!(matches!(store.history("/missing"), Err(Error::TableNotFound(_))));
    }

    #[test]
    fn test_empty_write_rejected() {
        let store = VersionedStore::new();
        let empty = Dataset::empty(listings(0, 1).schema());
        let err = store.write("/t", empty, WriteOptions::append()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!store.contains("/t"));
    }

    #[test]
    fn test_history_records_operations() {
        let store = VersionedStore::new();
        store.write("/t", listings(0, 3), WriteOptions::overwrite()).unwrap();
        store
            .write(
                "/t",
                listings_with_x(3, 2),
                WriteOptions::append().merge_schema(true),
            )
            .unwrap();

        let history = store.history("/t").unwrap();
        let versions: Vec<u64> = history.iter().map(Snapshot::version).collect();
        assert_eq!(versions, vec![0, 1]);
        assert_eq!(history[0].operation_parameters()["mode"], "Overwrite");
        assert_eq!(history[1].operation_parameters()["mergeSchema"], "true");
        assert!(history[0].timestamp() <= history[1].timestamp());
        assert_eq!(history[1].schema().fields().len(), 3);
    }

    #[test]
    fn test_read_as_of_timestamp() {
        let store = VersionedStore::new();
        let before = Utc::now() - chrono::Duration::seconds(60);
        store.write("/t", listings(0, 3), WriteOptions::append()).unwrap();
        store.write("/t", listings(3, 3), WriteOptions::append()).unwrap();

        assert_eq!(store.read_as_of("/t", Utc::now()).unwrap().num_rows(), 6);
        assert!(matches!(
            store.read_as_of("/t", before),
            Err(Error::VersionNotFound { .. })
        ));
    }

    #[test]
    fn test_concurrent_writers_get_distinct_versions() {
        let store = VersionedStore::new();
        std::thread::scope(|scope| {
            for i in 0..8 {
                let store = &store;
                scope.spawn(move || {
                    store.write("/t", listings(i, 1), WriteOptions::append()).unwrap();
                });
            }
        });

        let versions: Vec<u64> = store
            .history("/t")
            .unwrap()
            .iter()
            .map(Snapshot::version)
            .collect();
        assert_eq!(versions, (0..8).collect::<Vec<_>>());
        assert_eq!(store.read("/t", None).unwrap().num_rows(), 8);
    }

    #[test]
    fn test_tables_listing_and_path_normalization() {
        let store = VersionedStore::new();
        store.write("/splits/train/", listings(0, 1), WriteOptions::append()).unwrap();
        store.write("/splits/test", listings(0, 1), WriteOptions::append()).unwrap();

        assert_eq!(store.tables(), vec!["/splits/test", "/splits/train"]);
        assert!(store.write("  ", listings(0, 1), WriteOptions::append()).is_err());
    }

    #[test]
    fn test_nulls_in_required_column_are_a_schema_mismatch() {
        let store = VersionedStore::new();
        store.write("/t", listings(0, 2), WriteOptions::append()).unwrap();

        let nullable = Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("price", DataType::Float64, true),
        ]);
        let batch = RecordBatch::try_new(
            Arc::new(nullable),
            vec![
                Arc::new(Int32Array::from(vec![2, 3])),
                Arc::new(Float64Array::from(vec![Some(2.0), None])),
            ],
        )
        .unwrap();

        let err = store.write("/t", batch, WriteOptions::append()).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
        assert_eq!(store.latest_version("/t").unwrap(), 0);
    }

    #[test]
    fn test_persisted_tables_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let history = {
            let store = VersionedStore::open(dir.path()).unwrap();
            store.write("/splits/train", listings(0, 3), WriteOptions::overwrite()).unwrap();
            store
                .write(
                    "/splits/train",
                    listings_with_x(3, 2),
                    WriteOptions::append().merge_schema(true),
                )
                .unwrap();
            store.write("/splits/test", listings(5, 1), WriteOptions::overwrite()).unwrap();
            store.history("/splits/train").unwrap()
        };

        let store = VersionedStore::open(dir.path()).unwrap();
        assert_eq!(store.root(), Some(dir.path()));
        assert_eq!(store.tables(), vec!["/splits/test", "/splits/train"]);

        let v0 = store.read("/splits/train", Some(0)).unwrap();
        assert_eq!(v0.num_rows(), 3);
        assert!(!v0.has_column("x"));

        let v1 = store.read("/splits/train", Some(1)).unwrap();
        assert_eq!(v1.num_rows(), 5);
        assert_eq!(v1.column("x").unwrap().null_count(), 3);

        let reloaded = store.history("/splits/train").unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded[0].timestamp(), history[0].timestamp());
        assert_eq!(reloaded[1].operation_parameters(), history[1].operation_parameters());

        let next = store.write("/splits/train", listings(5, 1), WriteOptions::append()).unwrap();
        assert_eq!(next.version(), 2);
    }

    #[test]
    fn test_unpersistable_path_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionedStore::open(dir.path()).unwrap();

        let err = store
            .write("/splits/../escape", listings(0, 1), WriteOptions::append())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!store.contains("/splits/../escape"));
        assert!(store.tables().is_empty());
    }
}
