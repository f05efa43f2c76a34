//! End-to-end scenarios exercising the full lex → parse → resolve →
//! validate → plan → execute pipeline against the CSV reference
//! connector and the in-memory DataFusion engine.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use datafusion::arrow::array::{Int64Array, StringArray};
use datafusion::arrow::datatypes::{DataType, Field, Schema as ArrowSchema};
use datafusion::arrow::record_batch::RecordBatch;
use futures::stream;

use sqlflow::connector::csv::CsvConnectorFactory;
use sqlflow::connector::resilience::{
    CircuitBreakerConfig, RateLimitStrategy, RateLimiterConfig, ResilienceEnvelope, RetryConfig,
};
use sqlflow::connector::{Capability, CapabilitySet, Connector, ConnectorFactory, ConnectorRegistry};
use sqlflow::engine::DataFusionEngine;
use sqlflow::errors::SqlFlowError;
use sqlflow::executor::{CancellationToken, ExecutionOutcome, Executor};
use sqlflow::planner::plan;
use sqlflow::resolver::{resolve, FsIncludeLoader};
use sqlflow::schema::Schema;
use sqlflow::validator::validate;
use sqlflow::variables::VariableManager;
use sqlflow::watermark::{InMemoryWatermarkStore, WatermarkStore};

fn registry() -> ConnectorRegistry {
    let mut r = ConnectorRegistry::new();
    r.register("CSV", Arc::new(CsvConnectorFactory));
    r
}

async fn run_pipeline(
    source: &str,
    registry: &ConnectorRegistry,
    engine: &DataFusionEngine,
    watermark: &dyn WatermarkStore,
    pipeline_id: &str,
) -> ExecutionOutcome {
    let mut variables = VariableManager::default();
    let loader = FsIncludeLoader::new(".");
    let pipeline = resolve(source, &loader, &mut variables).expect("resolve");
    let outcome = validate(&pipeline, registry);
    assert!(outcome.is_valid(), "expected valid pipeline, got {:?}", outcome.report);
    let compiled = plan(&pipeline).expect("plan");

    let executor = Executor::new(engine, registry, watermark, &outcome, pipeline_id, CancellationToken::new());
    executor.run(&compiled).await.expect("execution")
}

async fn table_rows(engine: &DataFusionEngine, table: &str, order_by: &str) -> Vec<(i64, String)> {
    let rows = engine
        .query(&format!("SELECT id, name FROM {table} ORDER BY {order_by}"))
        .await
        .unwrap();
    let mut out = Vec::new();
    for batch in rows {
        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<datafusion::arrow::array::Int64Array>()
            .unwrap();
        let names = batch
            .column(1)
            .as_any()
            .downcast_ref::<datafusion::arrow::array::StringArray>()
            .unwrap();
        for i in 0..batch.num_rows() {
            out.push((ids.value(i), names.value(i).to_string()));
        }
    }
    out
}

#[tokio::test]
async fn scenario_1_basic_replace() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.csv");
    std::fs::write(&path, "id,name\n1,Alice\n2,Bob\n").unwrap();

    let source = format!(
        r#"SOURCE s TYPE CSV PARAMS {{"path":"{}","has_header":true}};
        LOAD t FROM s;"#,
        path.to_str().unwrap().replace('\\', "/")
    );

    let registry = registry();
    let engine = DataFusionEngine::default();
    let watermark = InMemoryWatermarkStore::new();
    let outcome = run_pipeline(&source, &registry, &engine, &watermark, "p1").await;
    assert!(matches!(outcome, ExecutionOutcome::Completed(_)));

    let rows = table_rows(&engine, "t", "id").await;
    assert_eq!(rows, vec![(1, "Alice".to_string()), (2, "Bob".to_string())]);
}

#[tokio::test]
async fn scenario_2_append_after_replace() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.csv");
    std::fs::write(&a, "id,name\n1,Alice\n2,Bob\n").unwrap();
    let b = dir.path().join("b.csv");
    std::fs::write(&b, "id,name\n3,Carol\n").unwrap();

    let registry = registry();
    let engine = DataFusionEngine::default();
    let watermark = InMemoryWatermarkStore::new();

    let first = format!(
        r#"SOURCE s TYPE CSV PARAMS {{"path":"{}","has_header":true}};
        LOAD t FROM s;"#,
        a.to_str().unwrap().replace('\\', "/")
    );
    run_pipeline(&first, &registry, &engine, &watermark, "p1").await;

    let second = format!(
        r#"SOURCE s2 TYPE CSV PARAMS {{"path":"{}","has_header":true}};
        LOAD t FROM s2 MODE APPEND;"#,
        b.to_str().unwrap().replace('\\', "/")
    );
    run_pipeline(&second, &registry, &engine, &watermark, "p1").await;

    let rows = table_rows(&engine, "t", "id").await;
    assert_eq!(
        rows,
        vec![(1, "Alice".to_string()), (2, "Bob".to_string()), (3, "Carol".to_string())]
    );
}

#[tokio::test]
async fn scenario_3_upsert_inserts_and_updates() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.csv");
    std::fs::write(&a, "id,name\n1,Alice\n2,Bob\n").unwrap();
    let b = dir.path().join("b.csv");
    std::fs::write(&b, "id,name\n2,Bobby\n4,Dan\n").unwrap();

    let registry = registry();
    let engine = DataFusionEngine::default();
    let watermark = InMemoryWatermarkStore::new();

    let first = format!(
        r#"SOURCE s TYPE CSV PARAMS {{"path":"{}","has_header":true}};
        LOAD t FROM s;"#,
        a.to_str().unwrap().replace('\\', "/")
    );
    run_pipeline(&first, &registry, &engine, &watermark, "p1").await;

    let second = format!(
        r#"SOURCE s2 TYPE CSV PARAMS {{"path":"{}","has_header":true}};
        LOAD t FROM s2 MODE UPSERT KEY id;"#,
        b.to_str().unwrap().replace('\\', "/")
    );
    let outcome = run_pipeline(&second, &registry, &engine, &watermark, "p1").await;
    match outcome {
        ExecutionOutcome::Completed(ops) => {
            let loaded = ops
                .into_iter()
                .find_map(|op| match op {
                    sqlflow::executor::OperationOutcome::Loaded { metrics, .. } => Some(metrics),
                    _ => None,
                })
                .unwrap();
            assert_eq!(loaded.rows_inserted, 1);
            assert_eq!(loaded.rows_updated, 1);
        }
        ExecutionOutcome::Cancelled { .. } => panic!("unexpected cancellation"),
    }

    let mut rows = table_rows(&engine, "t", "id").await;
    rows.sort();
    assert_eq!(
        rows,
        vec![
            (1, "Alice".to_string()),
            (2, "Bobby".to_string()),
            (4, "Dan".to_string()),
        ]
    );
}

#[tokio::test]
async fn scenario_4_incremental_advances_watermark_and_skips_old_rows() {
    let dir = tempfile::tempdir().unwrap();
    let initial = dir.path().join("initial.csv");
    std::fs::write(
        &initial,
        "id,name,updated_at\n1,Alice,2024-01-15T12:00:00Z\n2,Bob,2024-01-15T12:10:00Z\n3,Carol,2024-01-15T12:15:00Z\n",
    )
    .unwrap();

    let registry = registry();
    let engine = DataFusionEngine::default();
    let watermark = InMemoryWatermarkStore::new();

    let first = format!(
        r#"SOURCE events TYPE CSV PARAMS {{"path":"{}","has_header":true,"sync_mode":"incremental","cursor_field":"updated_at"}};
        LOAD t FROM events MODE APPEND;"#,
        initial.to_str().unwrap().replace('\\', "/")
    );
    run_pipeline(&first, &registry, &engine, &watermark, "p-incr").await;

    assert_eq!(
        watermark.get("p-incr", "events", "updated_at").unwrap().unwrap(),
        "2024-01-15T12:15:00Z"
    );
    let rows = engine.query("SELECT * FROM t").await.unwrap();
    assert_eq!(rows.iter().map(|b| b.num_rows()).sum::<usize>(), 3);

    let additional = dir.path().join("additional.csv");
    std::fs::write(
        &additional,
        "id,name,updated_at\n4,Dan,2024-01-16T10:00:00Z\n5,Erin,2024-01-16T11:00:00Z\n",
    )
    .unwrap();

    let second = format!(
        r#"SOURCE events TYPE CSV PARAMS {{"path":"{}","has_header":true,"sync_mode":"incremental","cursor_field":"updated_at"}};
        LOAD t FROM events MODE APPEND;"#,
        additional.to_str().unwrap().replace('\\', "/")
    );
    run_pipeline(&second, &registry, &engine, &watermark, "p-incr").await;

    assert_eq!(
        watermark.get("p-incr", "events", "updated_at").unwrap().unwrap(),
        "2024-01-16T11:00:00Z"
    );
    let rows = engine.query("SELECT * FROM t").await.unwrap();
    assert_eq!(rows.iter().map(|b| b.num_rows()).sum::<usize>(), 5);
}

/// A connector whose first two read attempts fail with a retryable
/// runtime error before succeeding, run through a real
/// [`sqlflow::connector::resilience::ResilienceEnvelope`] rather than a
/// mock of one.
struct FlakyConnector {
    envelope: ResilienceEnvelope,
    attempts: Arc<AtomicU32>,
}

#[async_trait::async_trait]
impl Connector for FlakyConnector {
    fn connector_type(&self) -> &str {
        "FLAKY"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new([Capability::Read])
    }

    async fn schema(&self, _object: &str) -> sqlflow::Result<Schema> {
        let arrow_schema = ArrowSchema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, false),
        ]);
        Ok(Schema::from_arrow(&arrow_schema))
    }

    async fn read_full(&self, _object: &str, _columns: Option<&[String]>) -> sqlflow::Result<sqlflow::connector::BatchStream> {
        let attempts = self.attempts.clone();
        let batch = self
            .envelope
            .call(|| {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(SqlFlowError::ConnectorRuntimeError {
                            connector: "FLAKY".to_string(),
                            message: "simulated transient failure".to_string(),
                        })
                    } else {
                        let arrow_schema = Arc::new(ArrowSchema::new(vec![
                            Field::new("id", DataType::Int64, false),
                            Field::new("name", DataType::Utf8, false),
                        ]));
                        let batch = RecordBatch::try_new(
                            arrow_schema,
                            vec![
                                Arc::new(Int64Array::from(vec![1, 2])),
                                Arc::new(StringArray::from(vec!["Alice", "Bob"])),
                            ],
                        )
                        .unwrap();
                        Ok(batch)
                    }
                }
            })
            .await?;
        Ok(Box::pin(stream::iter(vec![Ok(batch)])))
    }
}

struct FlakyConnectorFactory {
    attempts: Arc<AtomicU32>,
}

impl ConnectorFactory for FlakyConnectorFactory {
    fn create(&self, _params: &sqlflow::ast::ParamMap) -> sqlflow::Result<Arc<dyn Connector>> {
        Ok(Arc::new(FlakyConnector {
            envelope: ResilienceEnvelope::new(
                "FLAKY",
                RateLimiterConfig {
                    max_requests_per_minute: 10_000,
                    burst_size: 10_000,
                    strategy: RateLimitStrategy::Wait,
                },
                CircuitBreakerConfig::default(),
                RetryConfig {
                    max_attempts: 5,
                    initial_delay: std::time::Duration::from_millis(1),
                    backoff_multiplier: 2.0,
                },
            ),
            attempts: self.attempts.clone(),
        }))
    }

    fn parameter_schema(&self) -> sqlflow::connector::schema::ParameterSchema {
        sqlflow::connector::schema::ParameterSchema::new(Vec::new())
    }
}

#[tokio::test]
async fn scenario_6_retry_then_success() {
    let attempts = Arc::new(AtomicU32::new(0));
    let mut registry = registry();
    registry.register("FLAKY", Arc::new(FlakyConnectorFactory { attempts: attempts.clone() }));

    let source = r#"SOURCE s TYPE FLAKY PARAMS {}; LOAD t FROM s;"#;
    let engine = DataFusionEngine::default();
    let watermark = InMemoryWatermarkStore::new();
    let outcome = run_pipeline(source, &registry, &engine, &watermark, "p-flaky").await;
    assert!(matches!(outcome, ExecutionOutcome::Completed(_)));

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let rows = table_rows(&engine, "t", "id").await;
    assert_eq!(rows, vec![(1, "Alice".to_string()), (2, "Bob".to_string())]);
}

#[tokio::test]
async fn scenario_5_validation_errors_are_grouped_and_execution_never_runs() {
    let source = r#"
        SOURCE a TYPE MYSQL PARAMS {};
        SOURCE b TYPE CSV PARAMS {"delimiter":","};
        LOAD x FROM nonexistent;
    "#;
    let mut variables = VariableManager::default();
    let loader = FsIncludeLoader::new(".");
    let pipeline = resolve(source, &loader, &mut variables).unwrap();

    let registry = registry();
    let outcome = validate(&pipeline, &registry);
    assert!(!outcome.is_valid());

    let grouped = outcome.report.grouped();
    assert!(grouped.contains_key(&sqlflow::errors::ErrorClass::Connector));
    assert!(grouped.contains_key(&sqlflow::errors::ErrorClass::Parameter));
    assert!(grouped.contains_key(&sqlflow::errors::ErrorClass::Reference));
    assert_eq!(outcome.report.len(), 3);
}
