//! On-disk commit log for versioned tables
//!
//! Layout under the store root, one directory per table path:
//!
//! ```text
//! <root>/splits/train/part-00000.parquet
//! <root>/splits/train/part-00001.parquet
//! <root>/splits/train/_log/00000000000000000000.json
//! <root>/splits/train/_log/00000000000000000001.json
//! ```
//!
//! Each part file holds the rows one write carried, exactly as written. The
//! log entry records how they were committed, so reopening replays the same
//! commits in order. The log entry is written last; a part file without one
//! is ignored and overwritten by the next commit of that version.

use super::{Dataset, Snapshot, WriteMode, WriteOptions};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub(crate) const LOG_DIR: &str = "_log";

/// One committed write as recorded on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CommitEntry {
    table: String,
    version: u64,
    timestamp: DateTime<Utc>,
    mode: WriteMode,
    merge_schema: bool,
    data_file: String,
}

impl CommitEntry {
    pub(crate) const fn version(&self) -> u64 {
        self.version
    }

    pub(crate) const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub(crate) const fn options(&self) -> WriteOptions {
        let options = match self.mode {
            WriteMode::Append => WriteOptions::append(),
            WriteMode::Overwrite => WriteOptions::overwrite(),
        };
        options.merge_schema(self.merge_schema)
    }
}

/// Directory holding `table`'s part files and log.
///
/// # Errors
/// `InvalidInput` for path segments that would leave the root or collide
/// with the log directory
pub(crate) fn table_dir(root: &Path, table: &str) -> Result<PathBuf> {
    let mut dir = root.to_path_buf();
    for segment in table.split('/').filter(|s| !s.is_empty()) {
        if matches!(segment, "." | ".." | LOG_DIR) {
            return Err(Error::InvalidInput(format!(
                "table path '{table}' cannot be stored on disk: segment '{segment}' is reserved"
            )));
        }
        dir.push(segment);
    }
    Ok(dir)
}

/// Write the rows of one commit, then its log entry.
///
/// # Errors
/// Returns `Io`/`Parquet`/`Json` if any file cannot be written
pub(crate) fn write_commit(root: &Path, incoming: &Dataset, snapshot: &Snapshot) -> Result<()> {
    let dir = table_dir(root, snapshot.table())?;
    let log_dir = dir.join(LOG_DIR);
    fs::create_dir_all(&log_dir)?;

    let data_file = format!("part-{:05}.parquet", snapshot.version());
    incoming.write_parquet(dir.join(&data_file))?;

    let entry = CommitEntry {
        table: snapshot.table().to_string(),
        version: snapshot.version(),
        timestamp: snapshot.timestamp(),
        mode: snapshot.mode(),
        merge_schema: snapshot.merges_schema(),
        data_file,
    };
    fs::write(
        log_dir.join(format!("{:020}.json", snapshot.version())),
        serde_json::to_vec_pretty(&entry)?,
    )?;
    tracing::debug!(table = snapshot.table(), version = snapshot.version(), dir = %dir.display(), "persisted commit");
    Ok(())
}

/// Every table found under `root`, with its commits in version order.
///
/// # Errors
/// Returns `Io`/`Parquet`/`Json` if a log entry or part file is unreadable
pub(crate) fn load_tables(root: &Path) -> Result<Vec<(String, Vec<(CommitEntry, Dataset)>)>> {
    let mut log_dirs = Vec::new();
    find_log_dirs(root, &mut log_dirs)?;
    log_dirs.sort();

    let mut tables = Vec::with_capacity(log_dirs.len());
    for log_dir in log_dirs {
        let Some(dir) = log_dir.parent() else {
            continue;
        };

        let mut entries = fs::read_dir(&log_dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.retain(|path| path.extension().is_some_and(|ext| ext == "json"));
        entries.sort();

        let mut commits = Vec::with_capacity(entries.len());
        for path in entries {
            let entry: CommitEntry = serde_json::from_slice(&fs::read(&path)?)?;
            let data = Dataset::load_parquet(dir.join(&entry.data_file))?;
            commits.push((entry, data));
        }

        if let Some((first, _)) = commits.first() {
            tables.push((first.table.clone(), commits));
        }
    }
    Ok(tables)
}

fn find_log_dirs(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if path.file_name().is_some_and(|name| name == LOG_DIR) {
            found.push(path);
        } else {
            find_log_dirs(&path, found)?;
        }
    }
    Ok(())
}
