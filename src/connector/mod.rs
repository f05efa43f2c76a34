//! C8: Connector Contract & Registry (spec.md §4.8).
//!
//! A single [`Connector`] trait replaces the source's inheritance chain
//! (`Connector`/`ExportConnector`/`BidirectionalConnector`, spec.md §9):
//! every method has a default that reports the capability as unsupported,
//! and [`Connector::capabilities`] lets callers probe before calling,
//! rather than downcasting.

pub mod csv;
pub mod rest;
pub mod resilience;
pub mod schema;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::ast::{LoadMode, ParamMap};
use crate::engine::Batch;
use crate::errors::{ErrorClass, ErrorRecord, Result, SqlFlowError};
use crate::schema::Schema;

/// A lazy, pull-based, finite sequence of batches (spec.md §9 "Lazy
/// iterator streams map to a lazy batch sequence trait").
pub type BatchStream = BoxStream<'static, Result<Batch>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Read,
    Write,
    IncrementalRead,
    Discover,
    Health,
    TestConnection,
}

#[derive(Debug, Clone, Default)]
pub struct CapabilitySet(HashSet<Capability>);

impl CapabilitySet {
    pub fn new(caps: impl IntoIterator<Item = Capability>) -> Self {
        Self(caps.into_iter().collect())
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub status: HealthState,
    pub last_success_at: Option<DateTime<Utc>>,
    pub rolling_error_rate: f64,
    pub latency_samples: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct ConnectionTest {
    pub ok: bool,
    pub message: String,
}

fn unsupported(connector_type: &str, capability: &str) -> SqlFlowError {
    SqlFlowError::ConnectorRuntimeError {
        connector: connector_type.to_string(),
        message: format!("capability '{}' is not supported", capability),
    }
}

/// The single connector contract (spec.md §4.8). A *BidirectionalConnector*
/// is simply a connector whose capability set contains both `Read` and
/// `Write` — no separate type is needed.
#[async_trait]
pub trait Connector: Send + Sync {
    fn connector_type(&self) -> &str;
    fn capabilities(&self) -> CapabilitySet;

    async fn schema(&self, _object: &str) -> Result<Schema> {
        Err(unsupported(self.connector_type(), "read"))
    }

    async fn read_full(&self, _object: &str, _columns: Option<&[String]>) -> Result<BatchStream> {
        Err(unsupported(self.connector_type(), "read"))
    }

    async fn write(&self, _batches: BatchStream, _mode: LoadMode, _options: &ParamMap) -> Result<()> {
        Err(unsupported(self.connector_type(), "write"))
    }

    async fn read_incremental(
        &self,
        _object: &str,
        _cursor_field: &str,
        _cursor_value: Option<&str>,
        _columns: Option<&[String]>,
    ) -> Result<BatchStream> {
        Err(unsupported(self.connector_type(), "incremental_read"))
    }

    fn extract_cursor(&self, _batch: &Batch, _cursor_field: &str) -> Result<Option<String>> {
        Err(unsupported(self.connector_type(), "incremental_read"))
    }

    async fn list_objects(&self) -> Result<Vec<String>> {
        Err(unsupported(self.connector_type(), "discover"))
    }

    async fn check_health(&self) -> Result<HealthReport> {
        Err(unsupported(self.connector_type(), "health"))
    }

    async fn test_connection(&self) -> Result<ConnectionTest> {
        Err(unsupported(self.connector_type(), "test_connection"))
    }
}

/// Builds a configured connector instance from normalized parameters.
pub trait ConnectorFactory: Send + Sync {
    fn create(&self, params: &ParamMap) -> Result<Arc<dyn Connector>>;
    fn parameter_schema(&self) -> schema::ParameterSchema;
}

/// Process-wide, read-mostly connector-type → factory map (spec.md §4.8,
/// §5 "registration at startup; runtime reads require no locking").
#[derive(Default)]
pub struct ConnectorRegistry {
    factories: HashMap<String, Arc<dyn ConnectorFactory>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector_type: &str, factory: Arc<dyn ConnectorFactory>) {
        self.factories.insert(connector_type.to_ascii_uppercase(), factory);
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn factory(&self, connector_type: &str) -> Option<&Arc<dyn ConnectorFactory>> {
        self.factories.get(&connector_type.to_ascii_uppercase())
    }

    /// Runs the C9 normalization pipeline against the connector type's
    /// schema, for use by the Validator. Fails with `ConnectorError` only
    /// if the type itself is unknown; otherwise returns the normalized
    /// params plus any `ParameterError` records (never short-circuits —
    /// spec.md §4.4 accumulates).
    pub fn normalize_params(
        &self,
        connector_type: &str,
        line: usize,
        params: &ParamMap,
    ) -> Result<(ParamMap, Vec<ErrorRecord>)> {
        let factory = self.factory(connector_type).ok_or_else(|| {
            SqlFlowError::ConnectorError(format!("unknown connector type '{}'", connector_type))
        })?;
        Ok(factory.parameter_schema().normalize(connector_type, line, params))
    }

    /// Instantiates a connector from already-normalized parameters
    /// (called by the Executor after the Validator has passed).
    pub fn instantiate(&self, connector_type: &str, normalized_params: &ParamMap) -> Result<Arc<dyn Connector>> {
        let factory = self.factory(connector_type).ok_or_else(|| {
            SqlFlowError::ConnectorError(format!("unknown connector type '{}'", connector_type))
        })?;
        factory.create(normalized_params)
    }

    /// Returns only the ConnectorError check, for use by the Validator
    /// when it needs a yes/no without instantiating anything.
    pub fn check_known(&self, connector_type: &str, line: usize) -> Option<ErrorRecord> {
        if self.factory(connector_type).is_some() {
            None
        } else {
            Some(ErrorRecord::new(
                ErrorClass::Connector,
                line,
                format!("unknown connector type '{}'", connector_type),
                vec![format!(
                    "available connector types: {}",
                    self.registered_types().join(", ")
                )],
            ))
        }
    }
}
