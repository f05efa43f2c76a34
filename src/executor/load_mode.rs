//! C12: Load-Mode Executor (spec.md §4.12).
//!
//! Given `(target_table, source_dataset_name, mode, upsert_keys)`,
//! materializes the source dataset into the target table through the
//! engine adapter (C7) only — no component downstream of this module
//! touches `datafusion::*` or `arrow::*` directly except this one, which
//! already owns that boundary crossing for schema/row manipulation the
//! narrow `SqlEngine` contract itself doesn't expose.

use std::collections::HashMap;
use std::sync::Arc;

use datafusion::arrow::array::{Array, ArrayRef};
use datafusion::arrow::compute::{cast, concat_batches, interleave};
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::scalar::ScalarValue;

use crate::ast::LoadMode;
use crate::engine::{Batch, SqlEngine};
use crate::errors::{Result, SqlFlowError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadMetrics {
    pub rows_inserted: usize,
    pub rows_updated: usize,
    pub final_row_count: usize,
}

pub async fn execute_load_mode(
    engine: &dyn SqlEngine,
    target_table: &str,
    source_dataset_name: &str,
    mode: LoadMode,
    upsert_keys: &[String],
) -> Result<LoadMetrics> {
    match mode {
        LoadMode::Replace => replace(engine, target_table, source_dataset_name).await,
        LoadMode::Append => append(engine, target_table, source_dataset_name).await,
        LoadMode::Upsert => upsert(engine, target_table, source_dataset_name, upsert_keys).await,
    }
}

async fn replace(engine: &dyn SqlEngine, target_table: &str, source_dataset_name: &str) -> Result<LoadMetrics> {
    if engine.table_exists(target_table) {
        engine.drop_table(target_table).await?;
    }
    let rows = engine.query(&format!("SELECT * FROM {source_dataset_name}")).await?;
    let row_count: usize = rows.iter().map(|b| b.num_rows()).sum();
    engine.register_dataset(target_table, rows).await?;
    Ok(LoadMetrics {
        rows_inserted: row_count,
        rows_updated: 0,
        final_row_count: row_count,
    })
}

async fn append(engine: &dyn SqlEngine, target_table: &str, source_dataset_name: &str) -> Result<LoadMetrics> {
    if !engine.table_exists(target_table) {
        return replace(engine, target_table, source_dataset_name).await;
    }

    let source_schema = engine.table_schema(source_dataset_name).await?;
    let target_schema = engine.table_schema(target_table).await?;
    source_schema
        .compatible_for_append(&target_schema)
        .map_err(SqlFlowError::SchemaCompatibilityError)?;

    let target_rows = engine.query(&format!("SELECT * FROM {target_table}")).await?;
    let target_arrow_schema = target_rows
        .first()
        .map(|b| b.schema())
        .unwrap_or_else(|| target_schema.to_arrow());

    let source_rows = engine.query(&format!("SELECT * FROM {source_dataset_name}")).await?;
    let aligned_source: Result<Vec<Batch>> = source_rows
        .iter()
        .map(|b| align_batch_to_schema(b, &target_arrow_schema))
        .collect();
    let aligned_source = aligned_source?;

    let inserted: usize = aligned_source.iter().map(|b| b.num_rows()).sum();
    let mut combined = target_rows;
    combined.extend(aligned_source);
    let final_count: usize = combined.iter().map(|b| b.num_rows()).sum();

    engine.register_dataset(target_table, combined).await?;
    Ok(LoadMetrics {
        rows_inserted: inserted,
        rows_updated: 0,
        final_row_count: final_count,
    })
}

async fn upsert(
    engine: &dyn SqlEngine,
    target_table: &str,
    source_dataset_name: &str,
    upsert_keys: &[String],
) -> Result<LoadMetrics> {
    if upsert_keys.is_empty() {
        return Err(SqlFlowError::UpsertKeyError(
            "UPSERT requires at least one key".to_string(),
        ));
    }
    if !engine.table_exists(target_table) {
        return replace(engine, target_table, source_dataset_name).await;
    }

    let source_schema = engine.table_schema(source_dataset_name).await?;
    let target_schema = engine.table_schema(target_table).await?;
    source_schema
        .compatible_for_append(&target_schema)
        .map_err(SqlFlowError::SchemaCompatibilityError)?;
    for key in upsert_keys {
        let source_col = source_schema.column(key).ok_or_else(|| {
            SqlFlowError::UpsertKeyError(format!("key '{}' not present in source dataset", key))
        })?;
        let target_col = target_schema.column(key).ok_or_else(|| {
            SqlFlowError::UpsertKeyError(format!("key '{}' not present in target table", key))
        })?;
        if !source_col.logical_type.compatible_with(target_col.logical_type) {
            return Err(SqlFlowError::UpsertKeyError(format!(
                "key '{}' has incompatible types between source ({:?}) and target ({:?})",
                key, source_col.logical_type, target_col.logical_type
            )));
        }
    }

    let target_rows = engine.query(&format!("SELECT * FROM {target_table}")).await?;
    let target_arrow_schema = target_rows
        .first()
        .map(|b| b.schema())
        .unwrap_or_else(|| target_schema.to_arrow());
    let target_batch = concat_batches(&target_arrow_schema, &target_rows)?;

    let source_rows = engine.query(&format!("SELECT * FROM {source_dataset_name}")).await?;
    let source_arrow_schema = source_rows
        .first()
        .map(|b| b.schema())
        .unwrap_or_else(|| source_schema.to_arrow());
    let source_batch = concat_batches(&source_arrow_schema, &source_rows)?;

    let merged = merge_upsert(&target_batch, &source_batch, upsert_keys, &target_arrow_schema)?;
    let final_count = merged.num_rows();
    let (rows_inserted, rows_updated) = merged_counts(
        target_batch.num_rows(),
        source_batch.num_rows(),
        &target_batch,
        &source_batch,
        upsert_keys,
    )?;

    engine.register_dataset(target_table, vec![merged]).await?;
    Ok(LoadMetrics {
        rows_inserted,
        rows_updated,
        final_row_count: final_count,
    })
}

fn key_tuple(batch: &RecordBatch, row: usize, keys: &[String]) -> Result<Vec<String>> {
    keys.iter()
        .map(|key| {
            let idx = batch
                .schema()
                .index_of(key)
                .map_err(|_| SqlFlowError::UpsertKeyError(format!("key '{}' not found in batch", key)))?;
            let scalar = ScalarValue::try_from_array(batch.column(idx), row)?;
            Ok(scalar.to_string())
        })
        .collect()
}

fn merged_counts(
    target_len: usize,
    source_len: usize,
    target_batch: &RecordBatch,
    source_batch: &RecordBatch,
    keys: &[String],
) -> Result<(usize, usize)> {
    let mut source_keys: HashMap<Vec<String>, usize> = HashMap::with_capacity(source_len);
    for row in 0..source_len {
        source_keys.insert(key_tuple(source_batch, row, keys)?, row);
    }
    let mut updated = 0usize;
    for row in 0..target_len {
        if source_keys.contains_key(&key_tuple(target_batch, row, keys)?) {
            updated += 1;
        }
    }
    let mut inserted = 0usize;
    let mut target_keys: std::collections::HashSet<Vec<String>> = std::collections::HashSet::with_capacity(target_len);
    for row in 0..target_len {
        target_keys.insert(key_tuple(target_batch, row, keys)?);
    }
    for row in 0..source_len {
        if !target_keys.contains(&key_tuple(source_batch, row, keys)?) {
            inserted += 1;
        }
    }
    Ok((inserted, updated))
}

/// (1) UPDATE target rows whose key tuple matches a source row, pulling
/// every source-present column's value from that source row; (2) INSERT
/// source rows whose key tuple matches no target row. Columns present
/// only in the target schema keep their original target value on
/// matched rows and become null on inserted rows (spec.md §4.12 APPEND
/// rule, reused here since UPSERT shares the same column-superset
/// contract).
fn merge_upsert(
    target: &RecordBatch,
    source: &RecordBatch,
    keys: &[String],
    target_schema: &SchemaRef,
) -> Result<RecordBatch> {
    let mut source_key_to_row: HashMap<Vec<String>, usize> = HashMap::with_capacity(source.num_rows());
    for row in 0..source.num_rows() {
        source_key_to_row.insert(key_tuple(source, row, keys)?, row);
    }

    // For every target row: Some(source_row) if matched, None otherwise.
    let target_match: Vec<Option<usize>> = (0..target.num_rows())
        .map(|row| Ok::<_, SqlFlowError>(source_key_to_row.get(&key_tuple(target, row, keys)?).copied()))
        .collect::<Result<Vec<_>>>()?;

    let mut target_keys: std::collections::HashSet<Vec<String>> =
        std::collections::HashSet::with_capacity(target.num_rows());
    for row in 0..target.num_rows() {
        target_keys.insert(key_tuple(target, row, keys)?);
    }
    let inserted_source_rows: Vec<usize> = (0..source.num_rows())
        .filter(|&row| key_tuple(source, row, keys).map(|k| !target_keys.contains(&k)).unwrap_or(false))
        .collect();

    let total_rows = target.num_rows() + inserted_source_rows.len();
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(target_schema.fields().len());

    for field in target_schema.fields() {
        let name = field.name();
        let source_idx = source.schema().index_of(name).ok();
        let target_idx = target.schema().index_of(name).map_err(|e| {
            SqlFlowError::SchemaCompatibilityError(format!("target missing column '{}': {}", name, e))
        })?;
        let target_array = target.column(target_idx);

        match source_idx {
            None => {
                // Target-only column: keep target value for existing
                // rows, null for brand-new inserted rows.
                let null_tail = datafusion::arrow::array::new_null_array(field.data_type(), inserted_source_rows.len());
                let indices: Vec<(usize, usize)> = (0..target.num_rows())
                    .map(|row| (0usize, row))
                    .chain((0..inserted_source_rows.len()).map(|i| (1usize, i)))
                    .collect();
                let arrays: Vec<&dyn Array> = vec![target_array.as_ref(), null_tail.as_ref()];
                columns.push(interleave(&arrays, &indices)?);
            }
            Some(source_idx) => {
                let raw_source_array = source.column(source_idx);
                let source_array = if raw_source_array.data_type() == field.data_type() {
                    raw_source_array.clone()
                } else {
                    cast(raw_source_array, field.data_type())?
                };
                let indices: Vec<(usize, usize)> = target_match
                    .iter()
                    .enumerate()
                    .map(|(row, matched)| match matched {
                        Some(source_row) => (1usize, *source_row),
                        None => (0usize, row),
                    })
                    .chain(inserted_source_rows.iter().map(|&row| (1usize, row)))
                    .collect();
                let arrays: Vec<&dyn Array> = vec![target_array.as_ref(), source_array.as_ref()];
                columns.push(interleave(&arrays, &indices)?);
            }
        }
    }

    let _ = total_rows;
    Ok(RecordBatch::try_new(target_schema.clone(), columns)?)
}

fn align_batch_to_schema(batch: &RecordBatch, target_schema: &SchemaRef) -> Result<RecordBatch> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(target_schema.fields().len());
    for field in target_schema.fields() {
        match batch.schema().index_of(field.name()) {
            Ok(idx) => {
                let array = batch.column(idx);
                if array.data_type() == field.data_type() {
                    columns.push(array.clone());
                } else {
                    columns.push(cast(array, field.data_type())?);
                }
            }
            Err(_) => {
                columns.push(datafusion::arrow::array::new_null_array(
                    field.data_type(),
                    batch.num_rows(),
                ));
            }
        }
    }
    Ok(RecordBatch::try_new(target_schema.clone(), columns)?)
}
