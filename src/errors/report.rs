//! Grouped error reporting (spec.md §4.4, §4.13, §7).
//!
//! The Validator never raises one error at a time: it accumulates every
//! `ErrorRecord` it finds and returns a single `ErrorReport`, grouped by
//! `ErrorClass`, so a user sees every compile-time problem in one pass.

use std::collections::BTreeMap;
use std::fmt;

/// The class a compile-time error belongs to (spec.md §4.4 / §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorClass {
    Connector,
    Parameter,
    Reference,
    DuplicateTable,
    UpsertKey,
    Include,
    Variable,
    Plan,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Connector => "ConnectorError",
            ErrorClass::Parameter => "ParameterError",
            ErrorClass::Reference => "ReferenceError",
            ErrorClass::DuplicateTable => "DuplicateTableError",
            ErrorClass::UpsertKey => "UpsertKeyError",
            ErrorClass::Include => "IncludeError",
            ErrorClass::Variable => "VariableError",
            ErrorClass::Plan => "PlanError",
        };
        f.write_str(s)
    }
}

/// One accumulated error: kind, source line, message, and suggestions
/// (spec.md §3 "Error Record").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub class: ErrorClass,
    pub source_line: usize,
    pub message: String,
    pub suggestions: Vec<String>,
}

impl ErrorRecord {
    pub fn new(
        class: ErrorClass,
        source_line: usize,
        message: impl Into<String>,
        suggestions: Vec<String>,
    ) -> Self {
        // spec.md §7: "1-3 suggestions"
        let mut suggestions = suggestions;
        suggestions.truncate(3);
        Self {
            class,
            source_line,
            message: message.into(),
            suggestions,
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.source_line, self.message)?;
        for s in &self.suggestions {
            write!(f, "\n  - {s}")?;
        }
        Ok(())
    }
}

/// A grouped collection of [`ErrorRecord`]s, one group per [`ErrorClass`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorReport {
    records: Vec<ErrorRecord>,
}

impl ErrorReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ErrorRecord) {
        self.records.push(record);
    }

    pub fn extend(&mut self, other: ErrorReport) {
        self.records.extend(other.records);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    /// Group records by class, in class-declaration order, each group's
    /// records in original accumulation order.
    pub fn grouped(&self) -> BTreeMap<ErrorClass, Vec<&ErrorRecord>> {
        let mut groups: BTreeMap<ErrorClass, Vec<&ErrorRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.class).or_default().push(record);
        }
        groups
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (class, records) in self.grouped() {
            writeln!(f, "{class} ({}):", records.len())?;
            for record in records {
                writeln!(f, "  {record}")?;
            }
        }
        Ok(())
    }
}
