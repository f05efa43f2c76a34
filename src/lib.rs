//! # SQLFlow
//!
//! A SQL-first data pipeline compiler and executor: `.sf` pipeline files
//! are lexed, parsed, resolved (variables and includes), validated,
//! planned into a dependency DAG, and executed against an embedded
//! columnar SQL engine (Apache DataFusion) with a pluggable connector
//! framework.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sqlflow::resolver::{resolve, FsIncludeLoader};
//! use sqlflow::variables::VariableManager;
//! use sqlflow::validator::validate;
//! use sqlflow::planner::plan;
//! use sqlflow::connector::ConnectorRegistry;
//!
//! # fn main() -> sqlflow::Result<()> {
//! let mut variables = VariableManager::default();
//! let loader = FsIncludeLoader::new(".");
//! let source = std::fs::read_to_string("pipeline.sf")?;
//! let pipeline = resolve(&source, &loader, &mut variables)?;
//!
//! let registry = ConnectorRegistry::new();
//! let outcome = validate(&pipeline, &registry);
//! if !outcome.is_valid() {
//!     return Err(sqlflow::errors::SqlFlowError::ValidationFailed(outcome.report));
//! }
//!
//! let _plan = plan(&pipeline)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline
//!
//! ```text
//! .sf source → Lexer → Parser → Resolver → Validator → Planner → Executor
//!                                                           |
//!                                                SQL Engine Adapter + Connectors
//! ```
//!
//! - **Lexer/Parser**: tokenize and parse pipeline directives (`SET`,
//!   `SOURCE`, `LOAD`, `CREATE TABLE ... AS`, `EXPORT`, `INCLUDE`, `IF`).
//! - **Resolver**: expands includes, substitutes `${name}`/`${name|default}`
//!   variables, folds conditionals.
//! - **Validator**: accumulates every error across the whole pipeline
//!   before reporting, grouped by class.
//! - **Planner**: builds an operation DAG and a deterministic topological
//!   execution order.
//! - **Executor**: runs the plan against the engine, connectors, the
//!   resilience envelope, and the watermark store.

pub mod ast;
pub mod cache;
pub mod config;
pub mod connector;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod lexer;
pub mod log;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod schema;
pub mod validator;
pub mod variables;
pub mod watermark;

pub use errors::{Result, SqlFlowError};
