//! AST and Pipeline data model (spec.md §3).
//!
//! Every node carries its source line for error reporting. A [`Pipeline`]
//! is the resolved, ordered list of nodes after C3 has run: no [`Node::Include`]
//! or [`Node::Conditional`] survives resolution.

use std::collections::HashSet;
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A scalar or nested PARAMS/OPTIONS value (spec.md §3: "ordered map of
/// string→scalar-or-nested").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    List(Vec<ParamValue>),
    Object(IndexMap<String, ParamValue>),
    Null,
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::String(_) => "string",
            ParamValue::Integer(_) => "integer",
            ParamValue::Float(_) => "float",
            ParamValue::Bool(_) => "boolean",
            ParamValue::List(_) => "list",
            ParamValue::Object(_) => "object",
            ParamValue::Null => "null",
        }
    }
}

/// Ordered PARAMS/OPTIONS map (preserves declaration order for deterministic
/// error reporting and plan serialization).
pub type ParamMap = IndexMap<String, ParamValue>;

impl From<serde_json::Value> for ParamValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ParamValue::Null,
            serde_json::Value::Bool(b) => ParamValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ParamValue::Integer(i)
                } else {
                    ParamValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => ParamValue::String(s),
            serde_json::Value::Array(items) => {
                ParamValue::List(items.into_iter().map(ParamValue::from).collect())
            }
            serde_json::Value::Object(map) => ParamValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, ParamValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Parses a JSON-literal token's text (as captured by the lexer) into an
/// ordered [`ParamMap`]. The top level must be a JSON object.
pub fn parse_param_map(json_text: &str) -> crate::errors::Result<ParamMap> {
    let value: serde_json::Value = serde_json::from_str(json_text)?;
    match value {
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, ParamValue::from(v)))
            .collect()),
        _ => Err(crate::errors::SqlFlowError::ParameterError(
            "PARAMS/OPTIONS must be a JSON object".to_string(),
        )),
    }
}

/// `LOAD`/`SqlBlock` write mode (spec.md §6: "MODE REPLACE | APPEND |
/// UPSERT KEY col[, …]"; `MERGE`/`MERGE_KEYS` are accepted legacy
/// synonyms, normalized to `Upsert` by the parser — see SPEC_FULL.md §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadMode {
    Replace,
    Append,
    Upsert,
}

/// A single top-level directive, tagged with its source line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    SetVar {
        line: usize,
        name: String,
        expression: String,
    },
    SourceDecl {
        line: usize,
        name: String,
        connector_type: String,
        params: ParamMap,
    },
    LoadStmt {
        line: usize,
        target_table: String,
        source_name: String,
        mode: LoadMode,
        upsert_keys: Vec<String>,
    },
    SqlBlock {
        line: usize,
        target_table: String,
        sql_body: String,
        is_replace: bool,
        mode: LoadMode,
        upsert_keys: Vec<String>,
    },
    Export {
        line: usize,
        select_body: String,
        destination_uri: String,
        connector_type: String,
        options: ParamMap,
    },
    Include {
        line: usize,
        path: String,
        alias: Option<String>,
    },
    Conditional {
        line: usize,
        branches: Vec<(Expr, Vec<Node>)>,
        else_body: Vec<Node>,
    },
}

impl Node {
    pub fn line(&self) -> usize {
        match self {
            Node::SetVar { line, .. }
            | Node::SourceDecl { line, .. }
            | Node::LoadStmt { line, .. }
            | Node::SqlBlock { line, .. }
            | Node::Export { line, .. }
            | Node::Include { line, .. }
            | Node::Conditional { line, .. } => *line,
        }
    }
}

/// The conditional-folding expression language (spec.md §4.3): `==`, `!=`,
/// `AND`, `OR`, `NOT`, parenthesization, string/number literals, variable
/// references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    StringLit(String),
    NumberLit(f64),
    Var(String),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// The resolved, ordered pipeline (spec.md §3 "Pipeline").
///
/// Invariant: no [`Node::Include`] or [`Node::Conditional`] survives
/// resolution — enforced by [`crate::resolver::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub nodes: Vec<Node>,
}

impl Pipeline {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Debug assertion helper: true iff no Include/Conditional nodes remain.
    pub fn is_resolved(&self) -> bool {
        self.nodes
            .iter()
            .all(|n| !matches!(n, Node::Include { .. } | Node::Conditional { .. }))
    }

    /// Every target table name produced anywhere in the pipeline
    /// (`LoadStmt`/`SqlBlock`), upper-cased. Used by the Validator (C4)
    /// and Planner (C5) to resolve textual table references in SQL bodies.
    pub fn all_table_names(&self) -> HashSet<String> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::LoadStmt { target_table, .. } | Node::SqlBlock { target_table, .. } => {
                    Some(target_table.to_ascii_uppercase())
                }
                _ => None,
            })
            .collect()
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap())
}

/// Tokenizes `text` into whole-identifier words, upper-cased, for the
/// case-insensitive "does this SQL body mention table X" checks used by
/// the Validator (§4.4) and Planner (§4.5).
pub fn referenced_identifiers(text: &str) -> HashSet<String> {
    identifier_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_ascii_uppercase())
        .collect()
}
