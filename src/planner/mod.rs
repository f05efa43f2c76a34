//! C5: Planner (spec.md §4.5).
//!
//! Transforms a validated [`Pipeline`] into an [`Operation`] DAG and
//! produces a deterministic execution order via a stable topological
//! sort (ties broken by source position, matching the teacher's
//! preference for deterministic, reproducible pipeline runs).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ast::{referenced_identifiers, LoadMode, Node, ParamMap, Pipeline};
use crate::errors::{Result, SqlFlowError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationKind {
    SourceDefinition {
        source_name: String,
        connector_type: String,
        params: ParamMap,
    },
    Load {
        target_table: String,
        source_name: String,
        mode: LoadMode,
        upsert_keys: Vec<String>,
    },
    Transform {
        target_table: String,
        sql_body: String,
        mode: LoadMode,
        upsert_keys: Vec<String>,
    },
    Export {
        select_body: String,
        destination_uri: String,
        connector_type: String,
        options: ParamMap,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: usize,
    pub line: usize,
    pub kind: OperationKind,
    pub depends_on: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Operations in a deterministic topological order, ready to execute
    /// front-to-back.
    pub operations: Vec<Operation>,
}

impl Plan {
    /// Serializes to the plan-file convention (spec.md §6): JSON, named
    /// `<pipeline-name>.sfplan.json`.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn plan_file_name(pipeline_name: &str) -> String {
        format!("{pipeline_name}.sfplan.json")
    }
}

/// Builds the (unordered) operation list plus adjacency, then returns a
/// [`Plan`] with operations in stable topological order.
pub fn plan(pipeline: &Pipeline) -> Result<Plan> {
    let mut operations: Vec<Operation> = Vec::new();
    let mut source_id_by_name: HashMap<String, usize> = HashMap::new();
    let mut producer_id_by_table: HashMap<String, usize> = HashMap::new();

    // Pass 1: create one Operation per table/source producing node, in
    // source order, recording which op produces which name.
    for node in &pipeline.nodes {
        match node {
            Node::SourceDecl {
                line,
                name,
                connector_type,
                params,
            } => {
                let id = operations.len();
                operations.push(Operation {
                    id,
                    line: *line,
                    kind: OperationKind::SourceDefinition {
                        source_name: name.clone(),
                        connector_type: connector_type.clone(),
                        params: params.clone(),
                    },
                    depends_on: Vec::new(),
                });
                source_id_by_name.insert(name.clone(), id);
            }
            Node::LoadStmt {
                line,
                target_table,
                source_name,
                mode,
                upsert_keys,
            } => {
                let id = operations.len();
                let mut depends_on = Vec::new();
                if let Some(&src_id) = source_id_by_name.get(source_name) {
                    depends_on.push(src_id);
                }
                operations.push(Operation {
                    id,
                    line: *line,
                    kind: OperationKind::Load {
                        target_table: target_table.clone(),
                        source_name: source_name.clone(),
                        mode: *mode,
                        upsert_keys: upsert_keys.clone(),
                    },
                    depends_on,
                });
                producer_id_by_table.insert(target_table.to_ascii_uppercase(), id);
            }
            Node::SqlBlock {
                line,
                target_table,
                sql_body,
                mode,
                upsert_keys,
                ..
            } => {
                let id = operations.len();
                operations.push(Operation {
                    id,
                    line: *line,
                    kind: OperationKind::Transform {
                        target_table: target_table.clone(),
                        sql_body: sql_body.clone(),
                        mode: *mode,
                        upsert_keys: upsert_keys.clone(),
                    },
                    depends_on: Vec::new(),
                });
                producer_id_by_table.insert(target_table.to_ascii_uppercase(), id);
            }
            Node::Export { .. } | Node::SetVar { .. } => {
                // Export ops are appended in pass 2, after every table
                // producer is known; SetVar carries no runtime operation.
            }
            Node::Include { .. } | Node::Conditional { .. } => {
                unreachable!("planner only runs on a resolved Pipeline")
            }
        }
    }

    // Pass 2: fill in Transform dependencies (deferred until every
    // producer is known) and append Export ops.
    for node in &pipeline.nodes {
        match node {
            Node::SqlBlock {
                target_table,
                sql_body,
                ..
            } => {
                let id = producer_id_by_table[&target_table.to_ascii_uppercase()];
                let deps = table_dependencies(sql_body, target_table, &producer_id_by_table);
                operations[id].depends_on = deps;
            }
            Node::Export {
                line,
                select_body,
                destination_uri,
                connector_type,
                options,
            } => {
                let id = operations.len();
                let deps = table_dependencies(select_body, "", &producer_id_by_table);
                operations.push(Operation {
                    id,
                    line: *line,
                    kind: OperationKind::Export {
                        select_body: select_body.clone(),
                        destination_uri: destination_uri.clone(),
                        connector_type: connector_type.clone(),
                        options: options.clone(),
                    },
                    depends_on: deps,
                });
            }
            _ => {}
        }
    }

    let ordered = topological_sort(&operations)?;
    Ok(Plan { operations: ordered })
}

fn table_dependencies(
    sql_text: &str,
    own_target: &str,
    producer_id_by_table: &HashMap<String, usize>,
) -> Vec<usize> {
    let own = own_target.to_ascii_uppercase();
    let mentioned = referenced_identifiers(sql_text);
    let mut deps: Vec<usize> = producer_id_by_table
        .iter()
        .filter(|(name, _)| **name != own && mentioned.contains(*name))
        .map(|(_, &id)| id)
        .collect();
    deps.sort_unstable();
    deps
}

/// Kahn's algorithm, always picking the lowest-id ready node so the
/// result is deterministic and stable with respect to source position
/// (operations are created in source order, so id order == source order).
fn topological_sort(operations: &[Operation]) -> Result<Vec<Operation>> {
    let n = operations.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for op in operations {
        in_degree[op.id] = op.depends_on.len();
        for &dep in &op.depends_on {
            dependents[dep].push(op.id);
        }
    }

    let mut ready: std::collections::BTreeSet<usize> =
        (0..n).filter(|&id| in_degree[id] == 0).collect();
    let mut order = Vec::with_capacity(n);
    let mut remaining_in_degree = in_degree.clone();

    while let Some(&id) = ready.iter().next() {
        ready.remove(&id);
        order.push(id);
        for &dependent in &dependents[id] {
            remaining_in_degree[dependent] -= 1;
            if remaining_in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != n {
        let in_cycle: Vec<usize> = (0..n).filter(|id| !order.contains(id)).collect();
        let names: Vec<String> = in_cycle
            .iter()
            .map(|&id| operation_label(&operations[id]))
            .collect();
        return Err(SqlFlowError::PlanError(format!(
            "dependency cycle among: {}",
            names.join(", ")
        )));
    }

    let by_id: HashMap<usize, Operation> =
        operations.iter().cloned().map(|op| (op.id, op)).collect();
    Ok(order.into_iter().map(|id| by_id[&id].clone()).collect())
}

fn operation_label(op: &Operation) -> String {
    match &op.kind {
        OperationKind::SourceDefinition { source_name, .. } => {
            format!("SourceDefinition({source_name})")
        }
        OperationKind::Load { target_table, .. } => format!("Load({target_table})"),
        OperationKind::Transform { target_table, .. } => format!("Transform({target_table})"),
        OperationKind::Export { .. } => format!("Export(line {})", op.line),
    }
}
