//! Reference file-based connector (spec.md §1 "two reference connectors
//! built to exercise the contract"). Reads/writes a local CSV file using
//! DataFusion's own Arrow CSV reader/writer, so the connector boundary
//! stays within the `datafusion`/`arrow` stack the teacher already
//! depends on rather than pulling in a separate `csv` crate.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::arrow::csv::reader::ReaderBuilder;
use datafusion::arrow::csv::writer::WriterBuilder;
use datafusion::arrow::record_batch::RecordBatch;
use futures::stream;
use futures::StreamExt;

use crate::ast::{LoadMode, ParamMap};
use crate::connector::schema::{ParamSpec, ParamType, ParameterSchema};
use crate::connector::{BatchStream, Capability, CapabilitySet, Connector, ConnectorFactory};
use crate::errors::{Result, SqlFlowError};
use crate::schema::Schema;

fn io_err(path: &PathBuf, err: std::io::Error) -> SqlFlowError {
    SqlFlowError::ConnectorRuntimeError {
        connector: "CSV".to_string(),
        message: format!("{}: {}", path.display(), err),
    }
}

pub struct CsvConnector {
    path: PathBuf,
    has_header: bool,
    delimiter: u8,
}

impl CsvConnector {
    fn infer_arrow_schema(&self) -> Result<Arc<datafusion::arrow::datatypes::Schema>> {
        let file = File::open(&self.path).map_err(|e| io_err(&self.path, e))?;
        let format = datafusion::arrow::csv::reader::Format::default()
            .with_header(self.has_header)
            .with_delimiter(self.delimiter);
        let (schema, _) = format
            .infer_schema(BufReader::new(file), Some(100))
            .map_err(SqlFlowError::Arrow)?;
        Ok(Arc::new(schema))
    }

    fn read_batches(&self) -> Result<Vec<RecordBatch>> {
        let schema = self.infer_arrow_schema()?;
        let file = File::open(&self.path).map_err(|e| io_err(&self.path, e))?;
        let csv_reader = ReaderBuilder::new(schema)
            .with_header(self.has_header)
            .with_delimiter(self.delimiter)
            .build(BufReader::new(file))
            .map_err(SqlFlowError::Arrow)?;
        csv_reader
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(SqlFlowError::Arrow)
    }
}

#[async_trait]
impl Connector for CsvConnector {
    fn connector_type(&self) -> &str {
        "CSV"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new([Capability::Read, Capability::Write, Capability::IncrementalRead])
    }

    async fn schema(&self, _object: &str) -> Result<Schema> {
        Ok(Schema::from_arrow(&self.infer_arrow_schema()?))
    }

    async fn read_full(&self, _object: &str, _columns: Option<&[String]>) -> Result<BatchStream> {
        let batches = self.read_batches()?;
        Ok(Box::pin(stream::iter(batches.into_iter().map(Ok))))
    }

    /// Client-side cursor filtering, same contract as the REST connector
    /// (spec.md §4.11: only rows whose `cursor_field` sorts strictly
    /// greater than `cursor_value`). A flat file has no server side to
    /// push the filter down to.
    async fn read_incremental(
        &self,
        object: &str,
        cursor_field: &str,
        cursor_value: Option<&str>,
        columns: Option<&[String]>,
    ) -> Result<BatchStream> {
        let mut stream = self.read_full(object, columns).await?;
        let Some(cursor_value) = cursor_value else {
            return Ok(stream);
        };
        let mut kept = Vec::new();
        while let Some(batch) = stream.next().await {
            let batch = batch?;
            let col_idx = batch.schema().index_of(cursor_field).map_err(|_| {
                SqlFlowError::ConnectorRuntimeError {
                    connector: "CSV".to_string(),
                    message: format!("cursor field '{}' not present in {}", cursor_field, object),
                }
            })?;
            let col = batch.column(col_idx);
            let keep_rows: Vec<u32> = (0..batch.num_rows())
                .filter(|&row| {
                    let s = datafusion::arrow::util::display::array_value_to_string(col, row)
                        .unwrap_or_default();
                    s.as_str() > cursor_value
                })
                .map(|row| row as u32)
                .collect();
            if !keep_rows.is_empty() {
                let indices = datafusion::arrow::array::UInt32Array::from(keep_rows);
                let columns = batch
                    .columns()
                    .iter()
                    .map(|c| datafusion::arrow::compute::take(c, &indices, None))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(SqlFlowError::Arrow)?;
                kept.push(RecordBatch::try_new(batch.schema(), columns)?);
            }
        }
        Ok(Box::pin(stream::iter(kept.into_iter().map(Ok))))
    }

    fn extract_cursor(&self, batch: &RecordBatch, cursor_field: &str) -> Result<Option<String>> {
        let col_idx = batch.schema().index_of(cursor_field).map_err(|_| {
            SqlFlowError::ConnectorRuntimeError {
                connector: "CSV".to_string(),
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

    async fn write(&self, mut batches: BatchStream, mode: LoadMode, _options: &ParamMap) -> Result<()> {
        let append = matches!(mode, LoadMode::Append);
        let mut first = true;
        let mut writer: Option<datafusion::arrow::csv::Writer<std::fs::File>> = None;
        while let Some(batch) = batches.next().await {
            let batch = batch?;
            if writer.is_none() {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(append)
                    .truncate(!append)
                    .open(&self.path)
                    .map_err(|e| io_err(&self.path, e))?;
                let should_write_header = self.has_header && !(append && self.path.exists() && self.path.metadata().map(|m| m.len() > 0).unwrap_or(false));
                writer = Some(
                    WriterBuilder::new()
                        .with_header(should_write_header)
                        .with_delimiter(self.delimiter)
                        .build(file),
                );
            }
            if let Some(w) = writer.as_mut() {
                w.write(&batch).map_err(SqlFlowError::Arrow)?;
            }
            first = false;
        }
        if first {
            // No batches at all: still touch the file so REPLACE of an
            // empty source produces an empty target rather than leaving
            // a stale file behind.
            if !append {
                std::fs::write(&self.path, "").map_err(|e| io_err(&self.path, e))?;
            }
        }
        Ok(())
    }
}

pub struct CsvConnectorFactory;

impl ConnectorFactory for CsvConnectorFactory {
    fn create(&self, params: &ParamMap) -> Result<Arc<dyn Connector>> {
        let path = params
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SqlFlowError::ParameterError("CSV connector requires 'path'".to_string()))?;
        let has_header = match params.get("has_header") {
            Some(crate::ast::ParamValue::Bool(b)) => *b,
            _ => true,
        };
        let delimiter = match params.get("delimiter").and_then(|v| v.as_str()) {
            Some(d) if !d.is_empty() => d.as_bytes()[0],
            _ => b',',
        };
        Ok(Arc::new(CsvConnector {
            path: PathBuf::from(path),
            has_header,
            delimiter,
        }))
    }

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![
            ParamSpec::new("path", ParamType::String).required().pattern(r"\.csv$"),
            ParamSpec::new("has_header", ParamType::Boolean)
                .default_value(crate::ast::ParamValue::Bool(true)),
            ParamSpec::new("delimiter", ParamType::String)
                .default_value(crate::ast::ParamValue::String(",".to_string())),
        ])
    }
}
