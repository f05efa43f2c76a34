//! C14: Variable Manager — layered scope resolution (spec.md §4.14).
//!
//! Precedence, highest to lowest: CLI-supplied (`--vars '{...}'`), profile-
//! supplied, `SET` directives (in pipeline order), inline `${x|default}`
//! defaults. The first three live here; the fourth is applied by the
//! resolver (C3) itself when no binding is found in any scope.

use std::collections::HashMap;

/// Where a resolved variable's value came from (spec.md §3 "Variable Scope").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    CliOverride,
    Profile,
    SetDirective,
    Default,
}

/// Layered variable scope. `SET` directives are recorded as the resolver
/// walks the pipeline in source order, so a later `SET` can see the value
/// of an earlier one (spec.md §4.14: "`SET` directives may reference
/// earlier bindings").
#[derive(Debug, Clone, Default)]
pub struct VariableManager {
    cli: HashMap<String, String>,
    profile: HashMap<String, String>,
    set_directives: HashMap<String, String>,
}

impl VariableManager {
    pub fn new(cli: HashMap<String, String>, profile: HashMap<String, String>) -> Self {
        Self {
            cli,
            profile,
            set_directives: HashMap::new(),
        }
    }

    /// Records a `SET name = value` binding. Later `SET`s for the same
    /// name overwrite earlier ones; CLI/profile bindings always win
    /// regardless of `SET` order (precedence, not shadowing).
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.set_directives.insert(name.into(), value.into());
    }

    /// Resolves `name` against the layered scope, highest precedence first.
    /// Returns `None` if no scope (excluding inline defaults) provides a
    /// binding — the resolver falls back to the `${name|default}` default,
    /// or raises `VariableError` if there is none.
    pub fn lookup(&self, name: &str) -> Option<(String, Provenance)> {
        if let Some(v) = self.cli.get(name) {
            return Some((v.clone(), Provenance::CliOverride));
        }
        if let Some(v) = self.profile.get(name) {
            return Some((v.clone(), Provenance::Profile));
        }
        if let Some(v) = self.set_directives.get(name) {
            return Some((v.clone(), Provenance::SetDirective));
        }
        None
    }
}
