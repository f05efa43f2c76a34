//! Reference paginated remote connector (spec.md §1 "REST as the
//! canonical paginated remote connector"). Every HTTP call goes through
//! the C10 resilience envelope; schema inference over the JSON response
//! reuses the teacher's `serde_arrow`-based approach
//! (`utils::schema::infer_schema_from_values`), generalized here to a
//! connector-declared schema instead of a fixed HTTP-payload path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use reqwest::Client;
use serde_arrow::schema::{SchemaLike, TracingOptions};
use serde_json::Value;

use crate::ast::ParamMap;
use crate::connector::resilience::{
    CircuitBreakerConfig, RateLimiterConfig, ResilienceEnvelope, RetryConfig,
};
use crate::connector::schema::{ParamSpec, ParamType, ParameterSchema};
use crate::connector::{BatchStream, Capability, CapabilitySet, Connector, ConnectorFactory};
use crate::engine::Batch;
use crate::errors::{Result, SqlFlowError};
use crate::schema::Schema;

pub struct RestConnector {
    base_url: String,
    data_path: Option<String>,
    page_size: usize,
    client: Client,
    envelope: ResilienceEnvelope,
}

impl RestConnector {
    async fn fetch_page(&self, page: usize) -> Result<Vec<Value>> {
        let url = self.base_url.clone();
        let page_size = self.page_size;
        let client = self.client.clone();
        let data_path = self.data_path.clone();
        self.envelope
            .call(|| {
                let client = client.clone();
                let url = url.clone();
                let data_path = data_path.clone();
                async move {
                    let response = client
                        .get(&url)
                        .query(&[("page", page.to_string()), ("limit", page_size.to_string())])
                        .send()
                        .await
                        .map_err(SqlFlowError::Reqwest)?;
                    if !response.status().is_success() {
                        return Err(SqlFlowError::ConnectorRuntimeError {
                            connector: "REST".to_string(),
                            message: format!("HTTP {} from {}", response.status(), url),
                        });
                    }
                    let body: Value = response.json().await.map_err(SqlFlowError::Reqwest)?;
                    let located = match &data_path {
                        Some(path) => path.split('.').fold(Some(&body), |acc, segment| {
                            acc.and_then(|v| v.get(segment))
                        }),
                        None => Some(&body),
                    };
                    Ok(match located {
                        Some(Value::Array(items)) => items.clone(),
                        Some(other) => vec![other.clone()],
                        None => Vec::new(),
                    })
                }
            })
            .await
    }

    async fn fetch_all_records(&self) -> Result<Vec<Value>> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let records = self.fetch_page(page).await?;
            if records.is_empty() {
                break;
            }
            let got = records.len();
            all.extend(records);
            if got < self.page_size {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    fn records_to_batch(&self, records: &[Value]) -> Result<Batch> {
        if records.is_empty() {
            return Err(SqlFlowError::ExecutionError(
                "REST connector produced zero records; cannot infer a schema".to_string(),
            ));
        }
        let fields = Vec::<datafusion::arrow::datatypes::FieldRef>::from_samples(
            records,
            TracingOptions::default()
                .allow_null_fields(true)
                .coerce_numbers(true)
                .map_as_struct(true),
        )?;
        let arrow_schema = Arc::new(datafusion::arrow::datatypes::Schema::new(fields));
        let arrays = serde_arrow::to_arrow(arrow_schema.fields(), records)?;
        Ok(Batch::try_new(arrow_schema, arrays)?)
    }
}

#[async_trait]
impl Connector for RestConnector {
    fn connector_type(&self) -> &str {
        "REST"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new([
            Capability::Read,
            Capability::IncrementalRead,
            Capability::Health,
            Capability::TestConnection,
        ])
    }

    async fn schema(&self, _object: &str) -> Result<Schema> {
        let records = self.fetch_page(1).await?;
        let batch = self.records_to_batch(&records)?;
        Ok(Schema::from_arrow(&batch.schema()))
    }

    async fn read_full(&self, _object: &str, _columns: Option<&[String]>) -> Result<BatchStream> {
        let records = self.fetch_all_records().await?;
        let batch = self.records_to_batch(&records)?;
        Ok(Box::pin(stream::iter(vec![Ok(batch)])))
    }

    async fn read_incremental(
        &self,
        object: &str,
        cursor_field: &str,
        cursor_value: Option<&str>,
        columns: Option<&[String]>,
    ) -> Result<BatchStream> {
        // Contract (spec.md §4.11): only records strictly greater than
        // cursor_value. The REST API itself isn't assumed to support
        // server-side filtering, so this connector filters client-side.
        let mut stream = self.read_full(object, columns).await?;
        let mut filtered = Vec::new();
        use futures::StreamExt;
        while let Some(batch) = stream.next().await {
            filtered.push(batch?);
        }
        let Some(cursor_value) = cursor_value else {
            return Ok(Box::pin(stream::iter(filtered.into_iter().map(Ok))));
        };
        let mut kept = Vec::new();
        for batch in filtered {
            let col_idx = batch.schema().index_of(cursor_field).map_err(|_| {
                SqlFlowError::ConnectorRuntimeError {
                    connector: "REST".to_string(),
                    message: format!("cursor field '{}' not present in response", cursor_field),
                }
            })?;
            let col = batch.column(col_idx);
            let keep_rows: Vec<usize> = (0..batch.num_rows())
                .filter(|&row| {
                    let s = datafusion::arrow::util::display::array_value_to_string(col, row)
                        .unwrap_or_default();
                    s.as_str() > cursor_value
                })
                .collect();
            if !keep_rows.is_empty() {
                let indices = datafusion::arrow::array::UInt32Array::from(
                    keep_rows.iter().map(|&i| i as u32).collect::<Vec<_>>(),
                );
                let columns = batch
                    .columns()
                    .iter()
                    .map(|c| datafusion::arrow::compute::take(c, &indices, None))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(SqlFlowError::Arrow)?;
                kept.push(Batch::try_new(batch.schema(), columns)?);
            }
        }
        Ok(Box::pin(stream::iter(kept.into_iter().map(Ok))))
    }

    fn extract_cursor(&self, batch: &Batch, cursor_field: &str) -> Result<Option<String>> {
        let col_idx = batch.schema().index_of(cursor_field).map_err(|_| {
            SqlFlowError::ConnectorRuntimeError {
                connector: "REST".to_string(),
                message: format!("cursor field '{}' not present in batch", cursor_field),
            }
        })?;
        let col = batch.column(col_idx);
        let mut max_value: Option<String> = None;
        for row in 0..batch.num_rows() {
            let s = datafusion::arrow::util::display::array_value_to_string(col, row).unwrap_or_default();
            if max_value.as_deref().map(|m| s.as_str() > m).unwrap_or(true) {
                max_value = Some(s);
            }
        }
        Ok(max_value)
    }

    async fn check_health(&self) -> Result<crate::connector::HealthReport> {
        let ok = self.client.get(&self.base_url).send().await.is_ok();
        Ok(crate::connector::HealthReport {
            status: if ok {
                crate::connector::HealthState::Healthy
            } else {
                crate::connector::HealthState::Unhealthy
            },
            last_success_at: if ok { Some(chrono::Utc::now()) } else { None },
            rolling_error_rate: if ok { 0.0 } else { 1.0 },
            latency_samples: Vec::new(),
        })
    }

    async fn test_connection(&self) -> Result<crate::connector::ConnectionTest> {
        match self.client.get(&self.base_url).send().await {
            Ok(resp) => Ok(crate::connector::ConnectionTest {
                ok: resp.status().is_success(),
                message: format!("HTTP {}", resp.status()),
            }),
            Err(e) => Ok(crate::connector::ConnectionTest {
                ok: false,
                message: e.to_string(),
            }),
        }
    }
}

pub struct RestConnectorFactory;

impl ConnectorFactory for RestConnectorFactory {
    fn create(&self, params: &ParamMap) -> Result<Arc<dyn Connector>> {
        let base_url = params
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SqlFlowError::ParameterError("REST connector requires 'url'".to_string()))?
            .to_string();
        let data_path = params.get("data_path").and_then(|v| v.as_str()).map(|s| s.to_string());
        let page_size = match params.get("page_size") {
            Some(crate::ast::ParamValue::Integer(n)) => *n as usize,
            _ => 100,
        };
        let timeout_secs = match params.get("timeout_secs") {
            Some(crate::ast::ParamValue::Integer(n)) => *n as u64,
            _ => 30,
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(SqlFlowError::Reqwest)?;
        let envelope = ResilienceEnvelope::new(
            "REST",
            RateLimiterConfig::default(),
            CircuitBreakerConfig::default(),
            RetryConfig::rest_defaults(),
        );
        Ok(Arc::new(RestConnector {
            base_url,
            data_path,
            page_size,
            client,
            envelope,
        }))
    }

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![
            ParamSpec::new("url", ParamType::String).required(),
            ParamSpec::new("data_path", ParamType::String),
            ParamSpec::new("page_size", ParamType::Integer)
                .default_value(crate::ast::ParamValue::Integer(100)),
            ParamSpec::new("timeout_secs", ParamType::Integer)
                .default_value(crate::ast::ParamValue::Integer(30)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_url_is_a_parameter_error() {
        let factory = RestConnectorFactory;
        let err = factory.create(&ParamMap::new()).unwrap_err();
        assert!(matches!(err, SqlFlowError::ParameterError(_)));
    }

    #[test]
    fn capabilities_include_incremental_read() {
        let factory = RestConnectorFactory;
        let mut params = ParamMap::new();
        params.insert("url".to_string(), crate::ast::ParamValue::String("http://example.test".to_string()));
        let connector = factory.create(&params).unwrap();
        assert!(connector.capabilities().contains(Capability::IncrementalRead));
        assert!(!connector.capabilities().contains(Capability::Write));
    }
}
