//! Dataset: an Arrow schema plus the record batches read from a table

use crate::{Error, Result};
use arrow::array::{Array, ArrayRef};
use arrow::compute;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use std::path::Path;
use std::sync::Arc;

/// In-memory tabular data with a single schema.
///
/// Every batch conforms to [`Dataset::schema`]. Batches are reference
/// counted by Arrow, so cloning a dataset never copies column buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Dataset {
    /// Create a dataset, checking that every batch matches `schema`.
    ///
    /// # Errors
    /// Returns `SchemaMismatch` if a batch carries different fields
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        for batch in &batches {
            if batch.schema().fields() != schema.fields() {
                return Err(Error::SchemaMismatch(format!(
                    "batch fields {:?} differ from dataset fields {:?}",
                    batch.schema().fields(),
                    schema.fields()
                )));
            }
        }
        Ok(Self { schema, batches })
    }

    /// Create a dataset from batches, taking the schema of the first one.
    ///
    /// # Errors
    /// Returns `InvalidInput` for an empty batch list, `SchemaMismatch` when
    /// batches disagree on their fields
    pub fn from_batches(batches: Vec<RecordBatch>) -> Result<Self> {
        let schema = batches
            .first()
            .map(RecordBatch::schema)
            .ok_or_else(|| Error::InvalidInput("dataset needs at least one batch".to_string()))?;
        Self::try_new(schema, batches)
    }

    /// Dataset with a schema and no rows
    #[must_use]
    pub const fn empty(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
        }
    }

    /// Load a dataset from a Parquet file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
        use std::fs::File;

        let file = File::open(path.as_ref()).map_err(|e| {
            Error::StorageError(format!(
                "Failed to open Parquet file {}: {e}",
                path.as_ref().display()
            ))
        })?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let schema = Arc::clone(builder.schema());
        let reader = builder.build()?;

        let mut batches = Vec::new();
        for batch in reader {
            batches.push(batch?);
        }

        Self::try_new(schema, batches)
    }

    /// Write the dataset to a single Parquet file
    ///
    /// # Errors
    /// Returns error if the file cannot be created or encoded
    pub fn write_parquet<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use parquet::arrow::ArrowWriter;
        use std::fs::File;

        let file = File::create(path.as_ref())?;
        let mut writer = ArrowWriter::try_new(file, Arc::clone(&self.schema), None)?;
        for batch in &self.batches {
            writer.write(batch)?;
        }
        writer.close()?;
        Ok(())
    }

    /// Dataset schema
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Get all record batches
    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Total number of rows across batches
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Whether the dataset holds no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Whether the schema has a column named `name`
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.schema.index_of(name).is_ok()
    }

    /// Combine all batches into one
    ///
    /// # Errors
    /// Returns error if Arrow fails to concatenate
    pub fn concat(&self) -> Result<RecordBatch> {
        compute::concat_batches(&self.schema, &self.batches)
            .map_err(|e| Error::StorageError(format!("Failed to combine batches: {e}")))
    }

    /// One column, concatenated across batches
    ///
    /// # Errors
    /// Returns `InvalidInput` if the column does not exist
    pub fn column(&self, name: &str) -> Result<ArrayRef> {
        let index = self
            .schema
            .index_of(name)
            .map_err(|_| Error::InvalidInput(format!("Column not found: {name}")))?;

        if self.batches.is_empty() {
            return Ok(arrow::array::new_empty_array(
                self.schema.field(index).data_type(),
            ));
        }

        let parts: Vec<&dyn Array> = self
            .batches
            .iter()
            .map(|batch| batch.column(index).as_ref())
            .collect();
        compute::concat(&parts)
            .map_err(|e| Error::StorageError(format!("Failed to combine column {name}: {e}")))
    }
}

impl TryFrom<Vec<RecordBatch>> for Dataset {
    type Error = Error;

    fn try_from(batches: Vec<RecordBatch>) -> Result<Self> {
        Self::from_batches(batches)
    }
}

impl From<RecordBatch> for Dataset {
    fn from(batch: RecordBatch) -> Self {
        Self {
            schema: batch.schema(),
            batches: vec![batch],
        }
    }
}
