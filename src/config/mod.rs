//! A3: Profile/Environment Configuration (SPEC_FULL.md §A3).
//!
//! The Executor's one external collaborator for connector configuration
//! that doesn't come from the pipeline file itself: a YAML `Profile`
//! supplying `--profile`-scoped variables (spec.md §4.14, the layer
//! between CLI overrides and `SET` directives), plus the small amount of
//! filesystem discovery (`.env` loading, `.sf` pipeline discovery) the
//! teacher's `cmd::run_pipeline` does before it ever touches a template.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::Result;

/// A YAML profile file: named variable bindings plus, optionally, a
/// watermark-store file path for persistent mode (SPEC_FULL.md §4.7/4.11
/// "file path from profile, else ephemeral").
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub watermark_path: Option<PathBuf>,
    #[serde(default)]
    pub catalog_dir: Option<PathBuf>,
}

impl Profile {
    /// Loads and parses a YAML profile file (mirrors the teacher's
    /// `config::load_config_from_path`, referenced from `cmd/mod.rs` but
    /// not present in this retrieval pack's snapshot of the crate).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

/// Loads `.env` into the process environment before any `${ENV_VAR}`
/// substitution (C9, `connector::schema::ParameterSchema::substitute_env`)
/// runs. A missing file is not an error — `.env` is an optional local
/// convenience, never a required input.
pub fn load_dotenv(path: Option<&Path>) -> Result<()> {
    let outcome = match path {
        Some(p) => dotenvy::from_path(p),
        None => dotenvy::dotenv().map(|_| ()),
    };
    match outcome {
        Ok(()) => Ok(()),
        Err(dotenvy::Error::Io(_)) => Ok(()),
        Err(e) => Err(crate::errors::SqlFlowError::Other(format!(".env load failed: {e}"))),
    }
}

/// Discovers every `.sf` pipeline file under `root`, relative paths
/// sorted for deterministic iteration order — the same walk-and-sort
/// shape as the teacher's `config::templating::list_sql_templates`,
/// retargeted from `.sql` modules to `.sf` pipeline files.
pub fn discover_pipelines(root: impl AsRef<Path>) -> Result<Vec<String>> {
    let root = root.as_ref();
    let mut out = Vec::new();

    for entry_res in walkdir::WalkDir::new(root) {
        let entry = entry_res?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_sf = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("sf"))
            .unwrap_or(false);
        if !is_sf {
            continue;
        }
        let rel = match path.strip_prefix(root) {
            Ok(p) => p,
            Err(_) => continue,
        };
        out.push(
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
        );
    }

    out.sort();
    Ok(out)
}

/// Generates a URL-safe pipeline id for runs that don't supply one
/// explicitly (watermark keys and plan-file names need a stable
/// identity; `nanoid` keeps that identity short and collision-resistant
/// without pulling in a UUID dependency the teacher's stack doesn't
/// already carry).
pub fn generate_pipeline_id() -> String {
    nanoid::nanoid!(12)
}
