//! Additive schema evolution and batch alignment

use crate::{Error, Result};
use arrow::array::{new_null_array, ArrayRef};
use arrow::datatypes::{FieldRef, Schema, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use std::sync::Arc;

/// Schema a write commits with, given the table's current schema.
///
/// Columns may only be added, never retyped. Added columns are nullable so
/// rows written before them read back as null.
pub(crate) fn resolve_schema(
    current: &SchemaRef,
    incoming: &Schema,
    merge_schema: bool,
) -> Result<SchemaRef> {
    let mut added: Vec<FieldRef> = Vec::new();

    for field in incoming.fields() {
        match current.field_with_name(field.name()) {
            Ok(existing) if existing.data_type() == field.data_type() => {}
            Ok(existing) => {
                return Err(Error::SchemaMismatch(format!(
                    "column '{}' is {} in the table but {} in the write",
                    field.name(),
                    existing.data_type(),
                    field.data_type()
                )));
            }
            Err(_) if merge_schema => {
                added.push(Arc::new(field.as_ref().clone().with_nullable(true)));
            }
            Err(_) => {
                return Err(Error::SchemaMismatch(format!(
                    "column '{}' is not part of the table schema",
                    field.name()
                )));
            }
        }
    }

    if added.is_empty() {
        return Ok(Arc::clone(current));
    }

    let fields: Vec<FieldRef> = current.fields().iter().cloned().chain(added).collect();
    Ok(Arc::new(Schema::new_with_metadata(
        fields,
        current.metadata().clone(),
    )))
}

/// Reorder a batch to `target`, filling absent nullable columns with nulls.
pub(crate) fn align_batch(batch: &RecordBatch, target: &SchemaRef) -> Result<RecordBatch> {
    let source = batch.schema();
    let num_rows = batch.num_rows();

    let columns = target
        .fields()
        .iter()
        .map(|field| match source.index_of(field.name()) {
            Ok(index) => {
                let column = batch.column(index);
                if column.data_type() != field.data_type() {
                    Err(Error::SchemaMismatch(format!(
                        "column '{}' has type {}, expected {}",
                        field.name(),
                        column.data_type(),
                        field.data_type()
                    )))
                } else if !field.is_nullable() && column.null_count() > 0 {
                    Err(Error::SchemaMismatch(format!(
                        "column '{}' is non-nullable in the table but the write has {} nulls",
                        field.name(),
                        column.null_count()
                    )))
                } else {
                    Ok(Arc::clone(column))
                }
            }
            Err(_) if field.is_nullable() => Ok(new_null_array(field.data_type(), num_rows)),
            Err(_) => Err(Error::SchemaMismatch(format!(
                "write is missing non-nullable column '{}'",
                field.name()
            ))),
        })
        .collect::<Result<Vec<ArrayRef>>>()?;

    let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
    Ok(RecordBatch::try_new_with_options(
        Arc::clone(target),
        columns,
        &options,
    )?)
}
