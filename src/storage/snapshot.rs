//! Snapshot - one committed entry in a table's history

use arrow::datatypes::SchemaRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How a write combines with the table's current content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteMode {
    /// New rows are added after the existing ones.
    Append,
    /// New rows replace the logical content; older versions stay readable.
    Overwrite,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Append => f.write_str("Append"),
            Self::Overwrite => f.write_str("Overwrite"),
        }
    }
}

/// Options for [`VersionedStore::write`](super::VersionedStore::write).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    mode: WriteMode,
    merge_schema: bool,
}

impl WriteOptions {
    /// Append without schema evolution
    #[must_use]
    pub const fn append() -> Self {
        Self {
            mode: WriteMode::Append,
            merge_schema: false,
        }
    }

    /// Overwrite without schema evolution
    #[must_use]
    pub const fn overwrite() -> Self {
        Self {
            mode: WriteMode::Overwrite,
            merge_schema: false,
        }
    }

    /// Allow additive schema evolution (new nullable columns)
    #[must_use]
    pub const fn merge_schema(mut self, allowed: bool) -> Self {
        self.merge_schema = allowed;
        self
    }

    /// Write mode
    #[must_use]
    pub const fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Whether schema evolution is allowed
    #[must_use]
    pub const fn merges_schema(&self) -> bool {
        self.merge_schema
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self::append()
    }
}

/// Immutable record of a table write.
///
/// Mirrors one row of a `DESCRIBE HISTORY` listing: version, timestamp,
/// operation and operation parameters, plus the schema and row count the
/// table had once the write committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    table: String,
    version: u64,
    timestamp: DateTime<Utc>,
    options: WriteOptions,
    schema: SchemaRef,
    num_rows: usize,
}

impl Snapshot {
    pub(crate) fn new(
        table: impl Into<String>,
        version: u64,
        options: WriteOptions,
        schema: SchemaRef,
        num_rows: usize,
    ) -> Self {
        Self {
            table: table.into(),
            version,
            timestamp: Utc::now(),
            options,
            schema,
            num_rows,
        }
    }

    /// Restore the commit time recorded on disk
    pub(crate) fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Table path the snapshot belongs to
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Snapshot version (0 for the first write)
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Commit timestamp
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Operation name; every commit is a `WRITE`
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        "WRITE"
    }

    /// Write mode of the commit
    #[must_use]
    pub const fn mode(&self) -> WriteMode {
        self.options.mode()
    }

    /// Whether the write allowed schema evolution
    #[must_use]
    pub const fn merges_schema(&self) -> bool {
        self.options.merges_schema()
    }

    /// Operation parameters (`mode`, `mergeSchema`, `partitionBy`)
    #[must_use]
    pub fn operation_parameters(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("mode".to_string(), self.options.mode().to_string()),
            (
                "mergeSchema".to_string(),
                self.options.merges_schema().to_string(),
            ),
            ("partitionBy".to_string(), "[]".to_string()),
        ])
    }

    /// Table schema as of this snapshot
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        SchemaRef::clone(&self.schema)
    }

    /// Table row count as of this snapshot
    #[must_use]
    pub const fn num_rows(&self) -> usize {
        self.num_rows
    }
}
