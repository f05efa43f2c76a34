//! C7: SQL Engine Adapter — narrow interface onto the embedded columnar
//! SQL engine (spec.md §4.7). DataFusion is the engine, matching the
//! teacher's `datafusion = "47"` dependency (SPEC_FULL.md §4.7). No other
//! module references `datafusion::*` directly; everything crosses this
//! boundary as [`crate::schema::Schema`] or [`Batch`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::prelude::SessionContext;

use crate::errors::{Result, SqlFlowError};
use crate::schema::Schema;

pub type Batch = RecordBatch;

/// Where the engine materializes tables. In-memory is ephemeral and
/// per-run; persistent keeps a catalog directory across runs (used by the
/// watermark manager's durable mode, spec.md §4.11).
#[derive(Debug, Clone)]
pub enum EngineMode {
    InMemory,
    Persistent { catalog_dir: PathBuf },
}

/// The contract the rest of the core relies on (spec.md §4.7).
#[async_trait]
pub trait SqlEngine: Send + Sync {
    async fn execute(&self, sql_text: &str) -> Result<()>;
    async fn register_dataset(&self, name: &str, batches: Vec<Batch>) -> Result<()>;
    async fn query(&self, sql_text: &str) -> Result<Vec<Batch>>;
    async fn table_schema(&self, name: &str) -> Result<Schema>;
    async fn drop_table(&self, name: &str) -> Result<()>;
    fn table_exists(&self, name: &str) -> bool;
}

/// DataFusion-backed implementation. `SessionContext` owns its own table
/// catalog; in persistent mode the catalog directory is reserved for
/// future `ListingTable`/`ObjectStore` registration (SPEC_FULL.md §4.7) —
/// not exercised by the reference connectors, which register `MemTable`s
/// either way, but kept as the extension point the mode implies.
pub struct DataFusionEngine {
    ctx: SessionContext,
    #[allow(dead_code)]
    mode: EngineMode,
}

impl DataFusionEngine {
    pub fn new(mode: EngineMode) -> Self {
        Self {
            ctx: SessionContext::new(),
            mode,
        }
    }
}

impl Default for DataFusionEngine {
    fn default() -> Self {
        Self::new(EngineMode::InMemory)
    }
}

#[async_trait]
impl SqlEngine for DataFusionEngine {
    async fn execute(&self, sql_text: &str) -> Result<()> {
        self.ctx.sql(sql_text).await?.collect().await?;
        Ok(())
    }

    async fn register_dataset(&self, name: &str, batches: Vec<Batch>) -> Result<()> {
        let schema = if let Some(first) = batches.first() {
            first.schema()
        } else {
            return Err(SqlFlowError::ExecutionError(format!(
                "cannot register dataset '{}' with zero batches (schema unknown)",
                name
            )));
        };
        let _ = self.ctx.deregister_table(name)?;
        let table = MemTable::try_new(schema, vec![batches])?;
        self.ctx.register_table(name, Arc::new(table))?;
        Ok(())
    }

    async fn query(&self, sql_text: &str) -> Result<Vec<Batch>> {
        let df = self.ctx.sql(sql_text).await?;
        Ok(df.collect().await?)
    }

    async fn table_schema(&self, name: &str) -> Result<Schema> {
        let table = self.ctx.table_provider(name).await?;
        Ok(Schema::from_arrow(&table.schema()))
    }

    async fn drop_table(&self, name: &str) -> Result<()> {
        self.ctx.deregister_table(name)?;
        Ok(())
    }

    fn table_exists(&self, name: &str) -> bool {
        self.ctx.table_exist(name).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::{Int64Array, StringArray};
    use datafusion::arrow::datatypes::{DataType, Field, Schema as ArrowSchema};

    fn sample_batch() -> Batch {
        let schema = Arc::new(ArrowSchema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec!["Alice", "Bob"])),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn registers_dataset_and_queries_it() {
        let engine = DataFusionEngine::default();
        engine.register_dataset("t", vec![sample_batch()]).await.unwrap();
        assert!(engine.table_exists("t"));
        let rows = engine.query("SELECT id, name FROM t ORDER BY id").await.unwrap();
        assert_eq!(rows.iter().map(|b| b.num_rows()).sum::<usize>(), 2);
    }

    #[tokio::test]
    async fn drop_table_removes_it() {
        let engine = DataFusionEngine::default();
        engine.register_dataset("t", vec![sample_batch()]).await.unwrap();
        engine.drop_table("t").await.unwrap();
        assert!(!engine.table_exists("t"));
    }

    #[tokio::test]
    async fn table_schema_reflects_registered_columns() {
        let engine = DataFusionEngine::default();
        engine.register_dataset("t", vec![sample_batch()]).await.unwrap();
        let schema = engine.table_schema("t").await.unwrap();
        assert_eq!(schema.columns.len(), 2);
        assert_eq!(schema.columns[0].name, "id");
    }
}
