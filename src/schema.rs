//! Schema data model (spec.md §3, §6) and Arrow bridge.
//!
//! A [`Schema`] is an ordered list of (column name, logical type) pairs.
//! Logical types group together physical types that the Load-Mode
//! Executor (C12) treats as compatible (spec.md §6 "Logical type
//! compatibility groups") — this is the same JSON→Arrow inference bridge
//! idea as the teacher's `utils::schema::infer_schema_from_values`,
//! generalized so connector-declared schemas can feed the planner's
//! compatibility checks instead of only inbound JSON payloads.

use datafusion::arrow::datatypes::{DataType, Field, Schema as ArrowSchema};
use std::sync::Arc;

/// Logical type groups (spec.md §6): physical types within a group are
/// considered compatible for APPEND/UPSERT schema checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Time,
    Timestamp,
}

impl LogicalType {
    pub fn from_arrow(dt: &DataType) -> Self {
        match dt {
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => LogicalType::String,
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => LogicalType::Integer,
            DataType::Float16 | DataType::Float32 | DataType::Float64 | DataType::Decimal128(..) => {
                LogicalType::Float
            }
            DataType::Boolean => LogicalType::Boolean,
            DataType::Date32 | DataType::Date64 => LogicalType::Date,
            DataType::Time32(_) | DataType::Time64(_) => LogicalType::Time,
            DataType::Timestamp(..) => LogicalType::Timestamp,
            // anything else (list/struct/binary/...) is treated as an
            // opaque string for compatibility purposes, same fallback the
            // teacher uses for arrays/objects in infer_schema_from_values.
            _ => LogicalType::String,
        }
    }

    /// True if `self` and `other` belong to the same compatibility group.
    pub fn compatible_with(self, other: LogicalType) -> bool {
        self == other
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub logical_type: LogicalType,
    pub nullable: bool,
}

/// An ordered column list (spec.md §3 "Schema").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn from_arrow(schema: &ArrowSchema) -> Self {
        let columns = schema
            .fields()
            .iter()
            .map(|f| Column {
                name: f.name().clone(),
                logical_type: LogicalType::from_arrow(f.data_type()),
                nullable: f.is_nullable(),
            })
            .collect();
        Self { columns }
    }

    pub fn to_arrow(&self) -> Arc<ArrowSchema> {
        let fields = self
            .columns
            .iter()
            .map(|c| {
                let dt = match c.logical_type {
                    LogicalType::String => DataType::Utf8,
                    LogicalType::Integer => DataType::Int64,
                    LogicalType::Float => DataType::Float64,
                    LogicalType::Boolean => DataType::Boolean,
                    LogicalType::Date => DataType::Date32,
                    LogicalType::Time => DataType::Time64(datafusion::arrow::datatypes::TimeUnit::Microsecond),
                    LogicalType::Timestamp => {
                        DataType::Timestamp(datafusion::arrow::datatypes::TimeUnit::Microsecond, None)
                    }
                };
                Field::new(&c.name, dt, c.nullable)
            })
            .collect::<Vec<_>>();
        Arc::new(ArrowSchema::new(fields))
    }

    /// APPEND/UPSERT compatibility check (spec.md §4.12): every source
    /// column must exist in the target with a compatible logical type.
    /// Extra target columns are allowed.
    pub fn compatible_for_append(&self, target: &Schema) -> Result<(), String> {
        for source_col in &self.columns {
            match target.column(&source_col.name) {
                None => {
                    return Err(format!(
                        "source column '{}' does not exist in target",
                        source_col.name
                    ))
                }
                Some(target_col) => {
                    if !source_col.logical_type.compatible_with(target_col.logical_type) {
                        return Err(format!(
                            "column '{}' type mismatch: source is {:?}, target is {:?}",
                            source_col.name, source_col.logical_type, target_col.logical_type
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
