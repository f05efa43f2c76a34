//! C4: Validator (spec.md §4.4).
//!
//! Operates on a fully resolved [`Pipeline`] (no `Include`/`Conditional`
//! nodes). Never stops at the first problem: every error class is
//! accumulated into one [`ErrorReport`], grouped and reported together,
//! the way the Resolver and Parser already surface one error per
//! occurrence rather than aborting (spec.md §4.13).

use std::collections::{HashMap, HashSet};

use crate::ast::{referenced_identifiers, LoadMode, Node, ParamMap, Pipeline};
use crate::connector::ConnectorRegistry;
use crate::errors::{ErrorClass, ErrorRecord, ErrorReport};

/// Result of a validation pass: the accumulated report plus the
/// already-normalized (C9) parameters for every `SourceDecl`/`Export`,
/// ready for the Executor to hand straight to
/// [`crate::connector::ConnectorRegistry::instantiate`] without
/// re-running normalization.
#[derive(Debug, Default, Clone)]
pub struct ValidationOutcome {
    pub report: ErrorReport,
    pub normalized_sources: HashMap<String, ParamMap>,
    /// Keyed by the `Export` node's source line, since exports have no
    /// declared name of their own.
    pub normalized_exports: HashMap<usize, ParamMap>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.report.is_empty()
    }
}

struct ProducedTable {
    name: String,
    is_replace: bool,
    line: usize,
}

pub fn validate(pipeline: &Pipeline, registry: &ConnectorRegistry) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();
    let all_tables = pipeline.all_table_names();
    let mut declared_sources: HashSet<String> = HashSet::new();
    let mut produced: Vec<ProducedTable> = Vec::new();
    let mut produced_names: HashSet<String> = HashSet::new();

    for node in &pipeline.nodes {
        match node {
            Node::SetVar { .. } | Node::Include { .. } | Node::Conditional { .. } => {
                // SetVar carries no connector/table semantics here; Include
                // and Conditional cannot appear in a resolved pipeline.
            }

            Node::SourceDecl {
                line,
                name,
                connector_type,
                params,
            } => {
                validate_connector_decl(
                    registry,
                    *line,
                    connector_type,
                    params,
                    &mut outcome.report,
                )
                .map(|normalized| outcome.normalized_sources.insert(name.clone(), normalized));
                declared_sources.insert(name.clone());
            }

            Node::LoadStmt {
                line,
                target_table,
                source_name,
                mode,
                upsert_keys,
            } => {
                if !declared_sources.contains(source_name) {
                    outcome.report.push(ErrorRecord::new(
                        ErrorClass::Reference,
                        *line,
                        format!("source '{}' not declared before use", source_name),
                        vec![format!(
                            "declare it with SOURCE {} TYPE ... BEFORE LOAD ... FROM {}",
                            source_name, source_name
                        )],
                    ));
                }
                if *mode == LoadMode::Upsert && upsert_keys.is_empty() {
                    outcome.report.push(ErrorRecord::new(
                        ErrorClass::UpsertKey,
                        *line,
                        format!("LOAD into '{}' uses MODE UPSERT but names no key", target_table),
                        vec!["add KEY <column[, column...]>".to_string()],
                    ));
                }
                record_production(
                    &mut produced,
                    &mut produced_names,
                    &mut outcome.report,
                    target_table,
                    matches!(mode, LoadMode::Replace),
                    *line,
                );
            }

            Node::SqlBlock {
                line,
                target_table,
                sql_body,
                is_replace,
                upsert_keys,
                mode,
            } => {
                if *mode == LoadMode::Upsert && upsert_keys.is_empty() {
                    outcome.report.push(ErrorRecord::new(
                        ErrorClass::UpsertKey,
                        *line,
                        format!("CREATE TABLE '{}' uses MODE UPSERT but names no key", target_table),
                        vec!["add KEY <column[, column...]>".to_string()],
                    ));
                }
                check_table_references(
                    sql_body,
                    target_table,
                    &all_tables,
                    &produced_names,
                    *line,
                    &mut outcome.report,
                );
                record_production(
                    &mut produced,
                    &mut produced_names,
                    &mut outcome.report,
                    target_table,
                    *is_replace,
                    *line,
                );
            }

            Node::Export {
                line,
                select_body,
                destination_uri: _,
                connector_type,
                options,
            } => {
                check_table_references(
                    select_body,
                    "",
                    &all_tables,
                    &produced_names,
                    *line,
                    &mut outcome.report,
                );
                if let Some(normalized) = validate_connector_decl(
                    registry,
                    *line,
                    connector_type,
                    options,
                    &mut outcome.report,
                ) {
                    outcome.normalized_exports.insert(*line, normalized);
                }
            }
        }
    }

    outcome
}

fn validate_connector_decl(
    registry: &ConnectorRegistry,
    line: usize,
    connector_type: &str,
    params: &ParamMap,
    report: &mut ErrorReport,
) -> Option<ParamMap> {
    if let Some(record) = registry.check_known(connector_type, line) {
        report.push(record);
        return None;
    }
    let (normalized, errors) = registry
        .normalize_params(connector_type, line, params)
        .expect("connector type already confirmed known");
    let ok = errors.is_empty();
    for e in errors {
        report.push(e);
    }
    ok.then_some(normalized)
}

fn record_production(
    produced: &mut Vec<ProducedTable>,
    produced_names: &mut HashSet<String>,
    report: &mut ErrorReport,
    target_table: &str,
    is_replace: bool,
    line: usize,
) {
    let key = target_table.to_ascii_uppercase();
    if let Some(prior) = produced.iter().find(|p| p.name == key) {
        if !is_replace && !prior.is_replace {
            report.push(ErrorRecord::new(
                ErrorClass::DuplicateTable,
                line,
                format!(
                    "table '{}' is already produced at line {}",
                    target_table, prior.line
                ),
                vec!["mark one of the operations CREATE OR REPLACE TABLE, or rename one target".to_string()],
            ));
        }
    }
    produced.push(ProducedTable {
        name: key.clone(),
        is_replace,
        line,
    });
    produced_names.insert(key);
}

fn check_table_references(
    sql_text: &str,
    own_target: &str,
    all_tables: &HashSet<String>,
    produced_so_far: &HashSet<String>,
    line: usize,
    report: &mut ErrorReport,
) {
    let own = own_target.to_ascii_uppercase();
    let mentioned = referenced_identifiers(sql_text);
    let mut missing: Vec<&str> = Vec::new();
    for table in all_tables {
        if table == &own || !mentioned.contains(table) {
            continue;
        }
        if !produced_so_far.contains(table) {
            missing.push(table.as_str());
        }
    }
    missing.sort();
    for table in missing {
        report.push(ErrorRecord::new(
            ErrorClass::Reference,
            line,
            format!("references table '{}' which no prior operation produces", table),
            vec!["declare the producing LOAD/CREATE TABLE earlier in the pipeline".to_string()],
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, ParamValue};
    use std::sync::Arc;

    fn csv_registry() -> ConnectorRegistry {
        let mut registry = ConnectorRegistry::new();
        registry.register("CSV", Arc::new(crate::connector::csv::CsvConnectorFactory));
        registry
    }

    fn source_decl(line: usize, name: &str, path: &str) -> Node {
        let mut params = ParamMap::new();
        params.insert("path".to_string(), ParamValue::String(path.to_string()));
        Node::SourceDecl {
            line,
            name: name.to_string(),
            connector_type: "CSV".to_string(),
            params,
        }
    }

    #[test]
    fn clean_pipeline_has_no_errors() {
        let pipeline = Pipeline::new(vec![
            source_decl(1, "orders_src", "orders.csv"),
            Node::LoadStmt {
                line: 2,
                target_table: "orders".to_string(),
                source_name: "orders_src".to_string(),
                mode: LoadMode::Replace,
                upsert_keys: vec![],
            },
            Node::SqlBlock {
                line: 3,
                target_table: "orders_summary".to_string(),
                sql_body: "SELECT COUNT(*) FROM orders".to_string(),
                is_replace: true,
                mode: LoadMode::Replace,
                upsert_keys: vec![],
            },
        ]);
        let outcome = validate(&pipeline, &csv_registry());
        assert!(outcome.is_valid(), "{:?}", outcome.report);
        assert!(outcome.normalized_sources.contains_key("orders_src"));
    }

    #[test]
    fn unknown_connector_is_reported() {
        let pipeline = Pipeline::new(vec![Node::SourceDecl {
            line: 1,
            name: "s".to_string(),
            connector_type: "MYSQL".to_string(),
            params: ParamMap::new(),
        }]);
        let outcome = validate(&pipeline, &csv_registry());
        assert_eq!(outcome.report.len(), 1);
        assert_eq!(outcome.report.records()[0].class, ErrorClass::Connector);
    }

    #[test]
    fn missing_required_parameter_is_reported() {
        let pipeline = Pipeline::new(vec![Node::SourceDecl {
            line: 1,
            name: "s".to_string(),
            connector_type: "CSV".to_string(),
            params: ParamMap::new(),
        }]);
        let outcome = validate(&pipeline, &csv_registry());
        assert_eq!(outcome.report.records()[0].class, ErrorClass::Parameter);
    }

    #[test]
    fn load_from_undeclared_source_is_a_reference_error() {
        let pipeline = Pipeline::new(vec![Node::LoadStmt {
            line: 1,
            target_table: "orders".to_string(),
            source_name: "missing_src".to_string(),
            mode: LoadMode::Replace,
            upsert_keys: vec![],
        }]);
        let outcome = validate(&pipeline, &csv_registry());
        assert_eq!(outcome.report.records()[0].class, ErrorClass::Reference);
    }

    #[test]
    fn sql_block_referencing_not_yet_produced_table_is_a_reference_error() {
        let pipeline = Pipeline::new(vec![
            Node::SqlBlock {
                line: 1,
                target_table: "summary".to_string(),
                sql_body: "SELECT * FROM orders".to_string(),
                is_replace: true,
                mode: LoadMode::Replace,
                upsert_keys: vec![],
            },
            source_decl(2, "orders_src", "orders.csv"),
            Node::LoadStmt {
                line: 3,
                target_table: "orders".to_string(),
                source_name: "orders_src".to_string(),
                mode: LoadMode::Replace,
                upsert_keys: vec![],
            },
        ]);
        let outcome = validate(&pipeline, &csv_registry());
        assert!(outcome
            .report
            .records()
            .iter()
            .any(|r| r.class == ErrorClass::Reference && r.message.contains("ORDERS")));
    }

    #[test]
    fn duplicate_table_without_replace_is_reported() {
        let pipeline = Pipeline::new(vec![
            Node::SqlBlock {
                line: 1,
                target_table: "t".to_string(),
                sql_body: "SELECT 1".to_string(),
                is_replace: false,
                mode: LoadMode::Replace,
                upsert_keys: vec![],
            },
            Node::SqlBlock {
                line: 2,
                target_table: "t".to_string(),
                sql_body: "SELECT 2".to_string(),
                is_replace: false,
                mode: LoadMode::Replace,
                upsert_keys: vec![],
            },
        ]);
        let outcome = validate(&pipeline, &csv_registry());
        assert_eq!(outcome.report.records()[0].class, ErrorClass::DuplicateTable);
    }

    #[test]
    fn duplicate_table_marked_replace_is_allowed() {
        let pipeline = Pipeline::new(vec![
            Node::SqlBlock {
                line: 1,
                target_table: "t".to_string(),
                sql_body: "SELECT 1".to_string(),
                is_replace: false,
                mode: LoadMode::Replace,
                upsert_keys: vec![],
            },
            Node::SqlBlock {
                line: 2,
                target_table: "t".to_string(),
                sql_body: "SELECT 2".to_string(),
                is_replace: true,
                mode: LoadMode::Replace,
                upsert_keys: vec![],
            },
        ]);
        let outcome = validate(&pipeline, &csv_registry());
        assert!(outcome.is_valid());
    }

    #[test]
    fn upsert_without_keys_is_reported() {
        let pipeline = Pipeline::new(vec![
            source_decl(1, "s", "x.csv"),
            Node::LoadStmt {
                line: 2,
                target_table: "t".to_string(),
                source_name: "s".to_string(),
                mode: LoadMode::Upsert,
                upsert_keys: vec![],
            },
        ]);
        let outcome = validate(&pipeline, &csv_registry());
        assert!(outcome
            .report
            .records()
            .iter()
            .any(|r| r.class == ErrorClass::UpsertKey));
    }

    #[test]
    fn non_taken_conditional_branches_never_reach_validator() {
        // Sanity check that the resolved-Pipeline invariant holds: the
        // validator doesn't need to special-case Conditional/Include.
        let pipeline = Pipeline::new(vec![Node::Conditional {
            line: 1,
            branches: vec![(Expr::StringLit("x".into()), vec![])],
            else_body: vec![],
        }]);
        let outcome = validate(&pipeline, &csv_registry());
        assert!(outcome.is_valid());
    }
}
