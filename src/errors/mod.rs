//! Central error taxonomy for SQLFlow.
//!
//! Every fallible operation in the crate returns [`Result<T>`], whose error
//! variant is the single [`SqlFlowError`] enum. Compile-time error kinds
//! (lex/parse/include/variable/connector/parameter/reference/duplicate-table/
//! upsert-key/plan) are accumulated by the validator and reported as a group
//! (see [`report`]); execution-time kinds are fatal to a run.

use thiserror::Error;

pub mod report;

pub use report::{ErrorClass, ErrorRecord, ErrorReport};

/// Main error type for SQLFlow operations.
#[derive(Error, Debug)]
pub enum SqlFlowError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DataFusion error: {0}")]
    Datafusion(#[from] datafusion::error::DataFusionError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] datafusion::arrow::error::ArrowError),

    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("Serde Arrow error: {0}")]
    SerdeArrow(#[from] serde_arrow::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Directory walk error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    // --- Compile-time error kinds (spec.md C13) ---
    #[error("lex error at line {line}, column {column}: {message}")]
    LexError {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("parse error at line {line}: expected one of {expected:?}, found {found}")]
    ParseError {
        line: usize,
        expected: Vec<String>,
        found: String,
    },

    #[error("include error: {0}")]
    IncludeError(String),

    #[error("variable error: {0}")]
    VariableError(String),

    #[error("connector error: {0}")]
    ConnectorError(String),

    #[error("parameter error: {0}")]
    ParameterError(String),

    #[error("reference error: {0}")]
    ReferenceError(String),

    #[error("duplicate table error: {0}")]
    DuplicateTableError(String),

    #[error("upsert key error: {0}")]
    UpsertKeyError(String),

    #[error("plan error: {0}")]
    PlanError(String),

    // --- Runtime-local error kinds ---
    #[error("schema compatibility error: {0}")]
    SchemaCompatibilityError(String),

    #[error("watermark error: {0}")]
    WatermarkError(String),

    // --- Runtime-remote error kinds ---
    #[error("execution error: {0}")]
    ExecutionError(String),

    #[error("connector runtime error in '{connector}': {message}")]
    ConnectorRuntimeError { connector: String, message: String },

    #[error("cost limit exceeded: {0}")]
    CostLimitExceeded(String),

    #[error("circuit open for '{0}'")]
    CircuitOpenError(String),

    #[error("retry exhausted after {attempts} attempts: {message}")]
    RetryExhaustedError { attempts: u32, message: String },

    #[error("operation cancelled")]
    Cancelled,

    // --- Accumulated validation report ---
    #[error("validation failed with {} error(s)", .0.len())]
    ValidationFailed(ErrorReport),

    #[error("{0}")]
    Other(String),
}

impl SqlFlowError {
    /// Whether the resilience envelope should consider this kind retryable.
    ///
    /// Network-ish failures are retryable; configuration and validation
    /// failures are not (spec.md §4.10: "excluded exception kinds ... do
    /// not count toward failures").
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SqlFlowError::Reqwest(_)
                | SqlFlowError::ConnectorRuntimeError { .. }
                | SqlFlowError::ExecutionError(_)
        )
    }
}

/// Convenience Result type that uses [`SqlFlowError`].
pub type Result<T> = std::result::Result<T, SqlFlowError>;
