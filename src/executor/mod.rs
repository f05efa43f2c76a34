//! C6: Executor (spec.md §4.6).
//!
//! Walks a [`crate::planner::Plan`] in dependency order, dispatching each
//! [`crate::planner::OperationKind`] to the engine, a connector, the
//! resilience envelope, or the watermark store. Cancellation is
//! cooperative — checked between operations and between batches, the
//! same `Arc<AtomicBool>` pattern the retrieval pack uses for query
//! timeouts — so a cancelled run preserves whatever was already
//! committed rather than rolling it back (spec.md §5 "neither error nor
//! success").

pub mod load_mode;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use url::Url;

use crate::ast::{LoadMode, ParamValue};
use crate::connector::{Capability, Connector, ConnectorRegistry};
use crate::engine::{Batch, SqlEngine};
use crate::errors::{Result, SqlFlowError};
use crate::planner::{Operation, OperationKind, Plan};
use crate::validator::ValidationOutcome;
use crate::watermark::WatermarkStore;
use load_mode::{execute_load_mode, LoadMetrics};

/// Cooperative cancellation flag shared between the caller (e.g. a signal
/// handler installed by `src/bin/sqlflow.rs`) and a running [`Executor`].
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What happened to a single [`Operation`] during a run.
#[derive(Debug, Clone)]
pub enum OperationOutcome {
    SourceRegistered { source_name: String },
    Loaded { target_table: String, metrics: LoadMetrics },
    Transformed { target_table: String, metrics: LoadMetrics },
    Exported { destination_uri: String, rows_written: usize },
}

/// Terminal state of a [`Executor::run`] call (spec.md §5: a run is
/// success, a grouped/fatal failure, or — distinctly neither — cancelled
/// with whatever prior operations already committed left in place).
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Completed(Vec<OperationOutcome>),
    Cancelled { completed: Vec<OperationOutcome>, at_operation: usize },
}

/// Drives one validated [`Plan`] to completion against a concrete engine,
/// connector registry, and watermark store.
pub struct Executor<'a> {
    engine: &'a dyn SqlEngine,
    registry: &'a ConnectorRegistry,
    watermark: &'a dyn WatermarkStore,
    validation: &'a ValidationOutcome,
    pipeline_id: String,
    cancellation: CancellationToken,
}

impl<'a> Executor<'a> {
    pub fn new(
        engine: &'a dyn SqlEngine,
        registry: &'a ConnectorRegistry,
        watermark: &'a dyn WatermarkStore,
        validation: &'a ValidationOutcome,
        pipeline_id: impl Into<String>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            engine,
            registry,
            watermark,
            validation,
            pipeline_id: pipeline_id.into(),
            cancellation,
        }
    }

    pub async fn run(&self, plan: &Plan) -> Result<ExecutionOutcome> {
        let mut completed = Vec::with_capacity(plan.operations.len());
        // Connectors are instantiated lazily and cached for the run's
        // duration, scoped to this call's stack frame by ordinary
        // ownership (spec.md §9: no explicit try/finally needed —
        // everything drops when `connectors` goes out of scope).
        let mut connectors: HashMap<String, Arc<dyn Connector>> = HashMap::new();

        for op in &plan.operations {
            if self.cancellation.is_cancelled() {
                return Ok(ExecutionOutcome::Cancelled { completed, at_operation: op.id });
            }
            let outcome = match self.run_operation(op, &mut connectors).await {
                Ok(outcome) => outcome,
                Err(SqlFlowError::Cancelled) => {
                    return Ok(ExecutionOutcome::Cancelled { completed, at_operation: op.id });
                }
                Err(e) => return Err(e),
            };
            completed.push(outcome);
        }

        Ok(ExecutionOutcome::Completed(completed))
    }

    async fn run_operation(
        &self,
        op: &Operation,
        connectors: &mut HashMap<String, Arc<dyn Connector>>,
    ) -> Result<OperationOutcome> {
        match &op.kind {
            OperationKind::SourceDefinition { source_name, connector_type, .. } => {
                let params = self.validation.normalized_sources.get(source_name).ok_or_else(|| {
                    SqlFlowError::ExecutionError(format!(
                        "no normalized parameters recorded for source '{}'",
                        source_name
                    ))
                })?;
                let connector = self.registry.instantiate(connector_type, params)?;
                connectors.insert(source_name.clone(), connector);
                Ok(OperationOutcome::SourceRegistered { source_name: source_name.clone() })
            }

            OperationKind::Load { target_table, source_name, mode, upsert_keys } => {
                let connector = connectors.get(source_name).cloned().ok_or_else(|| {
                    SqlFlowError::ExecutionError(format!(
                        "source '{}' was never registered before its LOAD",
                        source_name
                    ))
                })?;
                let params = self.validation.normalized_sources.get(source_name);
                let metrics = self
                    .load_source_into(target_table, source_name, &connector, params, *mode, upsert_keys)
                    .await?;
                Ok(OperationOutcome::Loaded { target_table: target_table.clone(), metrics })
            }

            OperationKind::Transform { target_table, sql_body, mode, upsert_keys } => {
                let staging = format!("__transform_{}", target_table.to_ascii_lowercase());
                let rows = self.engine.query(sql_body).await?;
                self.engine.register_dataset(&staging, rows).await?;
                let metrics = execute_load_mode(self.engine, target_table, &staging, *mode, upsert_keys).await?;
                self.engine.drop_table(&staging).await.ok();
                Ok(OperationOutcome::Transformed { target_table: target_table.clone(), metrics })
            }

            OperationKind::Export { select_body, destination_uri, connector_type, options } => {
                let normalized = self.validation.normalized_exports.get(&op.line).ok_or_else(|| {
                    SqlFlowError::ExecutionError(format!(
                        "no normalized parameters recorded for export at line {}",
                        op.line
                    ))
                })?;
                // Exports address a URI directly rather than a
                // pre-declared `SOURCE`, so the destination is parsed up
                // front to fail fast on a malformed target before any
                // rows are pulled.
                if Url::parse(destination_uri).is_err() && !destination_uri.starts_with('/') {
                    return Err(SqlFlowError::ExecutionError(format!(
                        "export destination '{}' is neither a URI nor an absolute path",
                        destination_uri
                    )));
                }
                let connector = self.registry.instantiate(connector_type, normalized)?;
                let rows = self.engine.query(select_body).await?;
                let rows_written: usize = rows.iter().map(|b| b.num_rows()).sum();
                let batch_stream: crate::connector::BatchStream =
                    Box::pin(futures::stream::iter(rows.into_iter().map(Ok)));
                // An Export carries no LOAD mode of its own; it always
                // produces a fresh target (spec.md §4.6 Open Question,
                // resolved in SPEC_FULL.md §9: exports default to REPLACE).
                connector.write(batch_stream, LoadMode::Replace, options).await?;
                Ok(OperationOutcome::Exported { destination_uri: destination_uri.clone(), rows_written })
            }
        }
    }

    async fn load_source_into(
        &self,
        target_table: &str,
        source_name: &str,
        connector: &Arc<dyn Connector>,
        source_params: Option<&crate::ast::ParamMap>,
        mode: LoadMode,
        upsert_keys: &[String],
    ) -> Result<LoadMetrics> {
        let object = source_name;
        let sync_mode = source_params.and_then(|p| p.get("sync_mode")).and_then(|v| v.as_str());
        let cursor_field = source_params.and_then(|p| p.get("cursor_field")).and_then(|v| v.as_str());
        let full_refresh = source_params
            .and_then(|p| p.get("full_refresh"))
            .map(|v| matches!(v, ParamValue::Bool(true)))
            .unwrap_or(false);

        let incremental = sync_mode == Some("incremental")
            && cursor_field.is_some()
            && connector.capabilities().contains(Capability::IncrementalRead);

        let batches = if incremental {
            let cursor_field = cursor_field.unwrap();
            let cursor_value = if full_refresh {
                None
            } else {
                self.watermark.get(&self.pipeline_id, source_name, cursor_field)?
            };
            self.drain(connector.read_incremental(object, cursor_field, cursor_value.as_deref(), None).await?)
                .await?
        } else {
            self.drain(connector.read_full(object, None).await?).await?
        };

        let new_watermark = if incremental {
            max_cursor(&batches, connector.as_ref(), cursor_field.unwrap())?
        } else {
            None
        };

        let staging = format!("__load_src_{}", target_table.to_ascii_lowercase());
        if batches.is_empty() {
            let schema = connector.schema(object).await?;
            let empty = datafusion::arrow::record_batch::RecordBatch::new_empty(schema.to_arrow());
            self.engine.register_dataset(&staging, vec![empty]).await?;
        } else {
            self.engine.register_dataset(&staging, batches).await?;
        }

        let metrics = execute_load_mode(self.engine, target_table, &staging, mode, upsert_keys).await?;
        self.engine.drop_table(&staging).await.ok();

        if let Some(new_value) = new_watermark {
            // A strictly-increasing watermark store rejects a regression;
            // a genuinely earlier value here would indicate the connector
            // returned stale data, which should surface loudly.
            self.watermark.set(&self.pipeline_id, source_name, cursor_field.unwrap(), &new_value)?;
        }

        Ok(metrics)
    }

    async fn drain(&self, mut stream: crate::connector::BatchStream) -> Result<Vec<Batch>> {
        let mut batches = Vec::new();
        while let Some(batch) = stream.next().await {
            if self.cancellation.is_cancelled() {
                return Err(SqlFlowError::Cancelled);
            }
            batches.push(batch?);
        }
        Ok(batches)
    }
}

fn max_cursor(batches: &[Batch], connector: &dyn Connector, cursor_field: &str) -> Result<Option<String>> {
    let mut max_value: Option<String> = None;
    for batch in batches {
        if let Some(v) = connector.extract_cursor(batch, cursor_field)? {
            if max_value.as_deref().map(|m| v.as_str() > m).unwrap_or(true) {
                max_value = Some(v);
            }
        }
    }
    Ok(max_value)
}
