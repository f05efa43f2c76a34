//! C3: Variable & Include Resolver (spec.md §4.3).
//!
//! Three passes over the raw AST: include expansion (cycle-checked),
//! `${name}`/`${name|default}` substitution, then conditional folding.
//! The output [`Pipeline`] carries neither `Include` nor `Conditional`
//! nodes (enforced by [`crate::ast::Pipeline::is_resolved`]).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::ast::{Expr, Node, ParamMap, ParamValue, Pipeline};
use crate::errors::{Result, SqlFlowError};
use crate::parser;
use crate::variables::VariableManager;

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(\|([^}]*))?\}").expect("static pattern")
    })
}

/// Supplies the source text for an `INCLUDE "<path>"` directive.
pub trait IncludeLoader {
    fn load(&self, path: &str) -> Result<String>;
}

/// Resolves include paths relative to a fixed base directory on disk.
pub struct FsIncludeLoader {
    base_dir: PathBuf,
}

impl FsIncludeLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl IncludeLoader for FsIncludeLoader {
    fn load(&self, path: &str) -> Result<String> {
        let full = self.base_dir.join(Path::new(path));
        std::fs::read_to_string(&full)
            .map_err(|e| SqlFlowError::IncludeError(format!("reading '{}': {}", path, e)))
    }
}

/// Parses `source`, expands includes, substitutes variables, and folds
/// conditionals, mutating `variables` with every `SET` binding encountered
/// along the way (so callers can inspect final bindings after a run).
pub fn resolve(
    source: &str,
    loader: &dyn IncludeLoader,
    variables: &mut VariableManager,
) -> Result<Pipeline> {
    let raw_nodes = parser::parse(source)?;
    let expanded = expand_includes(raw_nodes, loader, &mut HashSet::new())?;
    let mut resolved = Vec::new();
    substitute_and_fold(expanded, variables, &mut resolved)?;
    Ok(Pipeline::new(resolved))
}

fn expand_includes(
    nodes: Vec<Node>,
    loader: &dyn IncludeLoader,
    stack: &mut HashSet<String>,
) -> Result<Vec<Node>> {
    let mut out = Vec::new();
    for node in nodes {
        match node {
            Node::Include { path, line, .. } => {
                if !stack.insert(path.clone()) {
                    return Err(SqlFlowError::IncludeError(format!(
                        "cycle detected including '{}' (line {})",
                        path, line
                    )));
                }
                let child_source = loader.load(&path)?;
                let child_nodes = parser::parse(&child_source)?;
                let expanded_child = expand_includes(child_nodes, loader, stack)?;
                stack.remove(&path);
                out.extend(expanded_child);
            }
            Node::Conditional {
                line,
                branches,
                else_body,
            } => {
                let mut new_branches = Vec::with_capacity(branches.len());
                for (expr, body) in branches {
                    new_branches.push((expr, expand_includes(body, loader, stack)?));
                }
                let new_else = expand_includes(else_body, loader, stack)?;
                out.push(Node::Conditional {
                    line,
                    branches: new_branches,
                    else_body: new_else,
                });
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn substitute_and_fold(
    nodes: Vec<Node>,
    variables: &mut VariableManager,
    out: &mut Vec<Node>,
) -> Result<()> {
    for node in nodes {
        match node {
            Node::SetVar {
                line,
                name,
                expression,
            } => {
                let value = interpolate(&expression, variables)?;
                variables.set(name.clone(), value.clone());
                out.push(Node::SetVar {
                    line,
                    name,
                    expression: value,
                });
            }
            Node::SourceDecl {
                line,
                name,
                connector_type,
                params,
            } => out.push(Node::SourceDecl {
                line,
                name,
                connector_type,
                params: interpolate_params(params, variables)?,
            }),
            Node::LoadStmt {
                line,
                target_table,
                source_name,
                mode,
                upsert_keys,
            } => out.push(Node::LoadStmt {
                line,
                target_table: interpolate(&target_table, variables)?,
                source_name: interpolate(&source_name, variables)?,
                mode,
                upsert_keys,
            }),
            Node::SqlBlock {
                line,
                target_table,
                sql_body,
                is_replace,
                mode,
                upsert_keys,
            } => out.push(Node::SqlBlock {
                line,
                target_table: interpolate(&target_table, variables)?,
                sql_body: interpolate(&sql_body, variables)?,
                is_replace,
                mode,
                upsert_keys,
            }),
            Node::Export {
                line,
                select_body,
                destination_uri,
                connector_type,
                options,
            } => out.push(Node::Export {
                line,
                select_body: interpolate(&select_body, variables)?,
                destination_uri: interpolate(&destination_uri, variables)?,
                connector_type,
                options: interpolate_params(options, variables)?,
            }),
            Node::Include { .. } => unreachable!("includes are expanded in an earlier pass"),
            Node::Conditional {
                branches,
                else_body,
                ..
            } => {
                let mut chosen = None;
                for (expr, body) in branches {
                    if eval_truthy(&expr, variables)? {
                        chosen = Some(body);
                        break;
                    }
                }
                substitute_and_fold(chosen.unwrap_or(else_body), variables, out)?;
            }
        }
    }
    Ok(())
}

fn interpolate_params(params: ParamMap, variables: &VariableManager) -> Result<ParamMap> {
    params
        .into_iter()
        .map(|(k, v)| Ok((k, interpolate_value(v, variables)?)))
        .collect()
}

fn interpolate_value(value: ParamValue, variables: &VariableManager) -> Result<ParamValue> {
    Ok(match value {
        ParamValue::String(s) => ParamValue::String(interpolate(&s, variables)?),
        ParamValue::List(items) => ParamValue::List(
            items
                .into_iter()
                .map(|v| interpolate_value(v, variables))
                .collect::<Result<_>>()?,
        ),
        ParamValue::Object(map) => ParamValue::Object(interpolate_params(map, variables)?),
        other => other,
    })
}

/// Substitutes every `${name}`/`${name|default}` occurrence in `text`.
/// Defaults are used verbatim, never themselves re-interpolated — this is
/// what makes `${x|x}` safe rather than circular.
pub fn interpolate(text: &str, variables: &VariableManager) -> Result<String> {
    let mut error = None;
    let replaced = var_pattern().replace_all(text, |caps: &regex::Captures| {
        let name = &caps[1];
        let default = caps.get(3).map(|m| m.as_str());
        if let Some((value, _)) = variables.lookup(name) {
            value
        } else if let Some(default) = default {
            if default.is_empty() {
                error = Some(SqlFlowError::VariableError(format!(
                    "empty default for '${{{}|}}' is not allowed",
                    name
                )));
                String::new()
            } else {
                default.to_string()
            }
        } else {
            error = Some(SqlFlowError::VariableError(format!(
                "unset variable '{}' has no default",
                name
            )));
            String::new()
        }
    });
    let replaced = replaced.into_owned();
    match error {
        Some(e) => Err(e),
        None => Ok(replaced),
    }
}

enum Value {
    Str(String),
    Num(f64),
}

impl Value {
    fn as_comparable(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Num(n) => n.to_string(),
        }
    }
}

fn eval_value(expr: &Expr, variables: &VariableManager) -> Result<Value> {
    match expr {
        Expr::StringLit(s) => Ok(Value::Str(interpolate(s, variables)?)),
        Expr::NumberLit(n) => Ok(Value::Num(*n)),
        Expr::Var(name) => match variables.lookup(name) {
            Some((v, _)) => Ok(Value::Str(v)),
            None => Err(SqlFlowError::VariableError(format!(
                "unset variable '{}' referenced in conditional",
                name
            ))),
        },
        _ => Err(SqlFlowError::Other(
            "expected a literal or variable, found a boolean sub-expression".to_string(),
        )),
    }
}

/// Evaluates a condition's truthiness (spec.md §4.3 pass 3).
fn eval_truthy(expr: &Expr, variables: &VariableManager) -> Result<bool> {
    match expr {
        Expr::Eq(l, r) => Ok(eval_value(l, variables)?.as_comparable() == eval_value(r, variables)?.as_comparable()),
        Expr::Ne(l, r) => Ok(eval_value(l, variables)?.as_comparable() != eval_value(r, variables)?.as_comparable()),
        Expr::And(l, r) => Ok(eval_truthy(l, variables)? && eval_truthy(r, variables)?),
        Expr::Or(l, r) => Ok(eval_truthy(l, variables)? || eval_truthy(r, variables)?),
        Expr::Not(inner) => Ok(!eval_truthy(inner, variables)?),
        Expr::Var(name) => match variables.lookup(name) {
            Some((v, _)) => Ok(!v.is_empty() && v != "false"),
            None => Err(SqlFlowError::VariableError(format!(
                "unset variable '{}' referenced in conditional",
                name
            ))),
        },
        Expr::StringLit(_) | Expr::NumberLit(_) => Err(SqlFlowError::Other(
            "a literal alone is not a valid condition".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct MapLoader(RefCell<HashMap<String, String>>);

    impl IncludeLoader for MapLoader {
        fn load(&self, path: &str) -> Result<String> {
            self.0
                .borrow()
                .get(path)
                .cloned()
                .ok_or_else(|| SqlFlowError::IncludeError(format!("no such file '{}'", path)))
        }
    }

    fn loader(files: &[(&str, &str)]) -> MapLoader {
        MapLoader(RefCell::new(
            files
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ))
    }

    #[test]
    fn substitutes_set_variable_with_default() {
        let src = r#"SET greeting = "${name|world}";"#;
        let mut vars = VariableManager::default();
        let pipeline = resolve(src, &loader(&[]), &mut vars).unwrap();
        match &pipeline.nodes[0] {
            Node::SetVar { expression, .. } => assert_eq!(expression, "world"),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn cli_variable_overrides_default() {
        let src = r#"SET greeting = "${name|world}";"#;
        let mut vars = VariableManager::new(
            HashMap::from([("name".to_string(), "rust".to_string())]),
            HashMap::new(),
        );
        let pipeline = resolve(src, &loader(&[]), &mut vars).unwrap();
        match &pipeline.nodes[0] {
            Node::SetVar { expression, .. } => assert_eq!(expression, "rust"),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn empty_default_is_rejected() {
        let src = r#"SET greeting = "${name|}";"#;
        let mut vars = VariableManager::default();
        let err = resolve(src, &loader(&[]), &mut vars).unwrap_err();
        assert!(matches!(err, SqlFlowError::VariableError(_)));
    }

    #[test]
    fn unset_variable_without_default_errors() {
        let src = r#"SET greeting = "${name}";"#;
        let mut vars = VariableManager::default();
        let err = resolve(src, &loader(&[]), &mut vars).unwrap_err();
        assert!(matches!(err, SqlFlowError::VariableError(_)));
    }

    #[test]
    fn self_referential_default_is_literal_not_circular() {
        let src = r#"SET x = "${x|x}";"#;
        let mut vars = VariableManager::default();
        let pipeline = resolve(src, &loader(&[]), &mut vars).unwrap();
        match &pipeline.nodes[0] {
            Node::SetVar { expression, .. } => assert_eq!(expression, "x"),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn expands_include_inline() {
        let parent = r#"INCLUDE "child.sf";"#;
        let child = r#"SET x = "1";"#;
        let mut vars = VariableManager::default();
        let pipeline = resolve(parent, &loader(&[("child.sf", child)]), &mut vars).unwrap();
        assert_eq!(pipeline.nodes.len(), 1);
        assert!(matches!(pipeline.nodes[0], Node::SetVar { .. }));
    }

    #[test]
    fn detects_include_cycle() {
        let a = r#"INCLUDE "b.sf";"#;
        let b = r#"INCLUDE "a.sf";"#;
        let mut vars = VariableManager::default();
        let err = resolve(a, &loader(&[("a.sf", a), ("b.sf", b)]), &mut vars).unwrap_err();
        assert!(matches!(err, SqlFlowError::IncludeError(_)));
    }

    #[test]
    fn conditional_folds_to_truthy_branch_only() {
        let src = r#"
            SET env = "prod";
            IF env == "prod" THEN
                SET chosen = "prod-path";
            ELSEIF missing_var == "x" THEN
                SET chosen = "never";
            ELSE
                SET chosen = "default-path";
            END IF;
        "#;
        let mut vars = VariableManager::default();
        let pipeline = resolve(src, &loader(&[]), &mut vars).unwrap();
        // SET env + SET chosen: the ELSEIF referencing `missing_var` is
        // never evaluated because the first branch already matched.
        assert_eq!(pipeline.nodes.len(), 2);
        match &pipeline.nodes[1] {
            Node::SetVar { expression, .. } => assert_eq!(expression, "prod-path"),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn conditional_falls_through_to_else() {
        let src = r#"
            SET env = "dev";
            IF env == "prod" THEN
                SET chosen = "prod-path";
            ELSE
                SET chosen = "default-path";
            END IF;
        "#;
        let mut vars = VariableManager::default();
        let pipeline = resolve(src, &loader(&[]), &mut vars).unwrap();
        match &pipeline.nodes[1] {
            Node::SetVar { expression, .. } => assert_eq!(expression, "default-path"),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn pipeline_is_fully_resolved() {
        let src = r#"SET x = "1";"#;
        let mut vars = VariableManager::default();
        let pipeline = resolve(src, &loader(&[]), &mut vars).unwrap();
        assert!(pipeline.is_resolved());
    }
}
