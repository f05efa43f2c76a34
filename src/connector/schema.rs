//! C9: Parameter Schema Framework (spec.md §4.9).
//!
//! Each connector type ships a declarative [`ParameterSchema`]: canonical
//! names, aliases, required/optional, scalar type, default, pattern,
//! enum, and cross-field requirements. [`ParameterSchema::normalize`]
//! performs alias folding, `${ENV}` substitution, type coercion, default
//! population, and validation in that order, returning the normalized
//! params plus any [`ErrorRecord`]s (never a single error — spec.md
//! §4.4 accumulates ParameterError records for grouped reporting).

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::ast::{ParamMap, ParamValue};
use crate::errors::{ErrorClass, ErrorRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Float,
    Boolean,
    ListString,
    Object,
}

impl ParamType {
    fn matches(self, value: &ParamValue) -> bool {
        matches!(
            (self, value),
            (ParamType::String, ParamValue::String(_))
                | (ParamType::Integer, ParamValue::Integer(_))
                | (ParamType::Float, ParamValue::Integer(_) | ParamValue::Float(_))
                | (ParamType::Boolean, ParamValue::Bool(_))
                | (ParamType::ListString, ParamValue::List(_))
                | (ParamType::Object, ParamValue::Object(_))
        )
    }
}

/// A cross-field requirement, e.g. "persistent mode requires path"
/// (spec.md §4.9). `when` names a key and the value it must equal for
/// `requires` to become mandatory.
#[derive(Debug, Clone)]
pub struct CrossFieldRequirement {
    pub when_key: String,
    pub when_value: String,
    pub requires_key: String,
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub canonical_name: String,
    pub aliases: Vec<String>,
    pub required: bool,
    pub param_type: ParamType,
    pub default: Option<ParamValue>,
    pub pattern: Option<String>,
    pub enum_values: Option<Vec<String>>,
}

impl ParamSpec {
    pub fn new(canonical_name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            aliases: Vec::new(),
            required: false,
            param_type,
            default: None,
            pattern: None,
            enum_values: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn default_value(mut self, value: ParamValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn enum_values(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|s| s.to_string()).collect());
        self
    }
}

/// The declarative schema for one connector type.
#[derive(Debug, Clone, Default)]
pub struct ParameterSchema {
    pub specs: Vec<ParamSpec>,
    /// If true, unknown keys are tolerated (not flagged as ParameterError).
    pub open: bool,
    pub cross_field: Vec<CrossFieldRequirement>,
}

impl ParameterSchema {
    pub fn new(specs: Vec<ParamSpec>) -> Self {
        Self {
            specs,
            open: false,
            cross_field: Vec::new(),
        }
    }

    pub fn open(mut self) -> Self {
        self.open = true;
        self
    }

    pub fn with_cross_field(mut self, req: CrossFieldRequirement) -> Self {
        self.cross_field.push(req);
        self
    }

    fn spec_for_key<'a>(&'a self, key: &str) -> Option<&'a ParamSpec> {
        self.specs.iter().find(|s| {
            s.canonical_name.eq_ignore_ascii_case(key) || s.aliases.iter().any(|a| a.eq_ignore_ascii_case(key))
        })
    }

    /// Folds aliases to canonical names — if both the canonical and an
    /// alias are present, the canonical value wins (spec.md §4.8).
    fn fold_aliases(&self, params: &ParamMap) -> ParamMap {
        let mut canonical = ParamMap::new();
        for (key, value) in params {
            let name = self
                .spec_for_key(key)
                .map(|s| s.canonical_name.clone())
                .unwrap_or_else(|| key.clone());
            // Canonical key (exact, case-sensitive match to a spec's own
            // name) always wins over an alias supplying the same slot.
            let is_canonical_key = self.specs.iter().any(|s| s.canonical_name == *key);
            if let Some(existing) = canonical.get(&name) {
                if !is_canonical_key && existing != value {
                    continue;
                }
            }
            canonical.insert(name, value.clone());
        }
        canonical
    }

    /// Substitutes `${ENV_VAR}` in string values against the process
    /// environment — distinct from C3's pipeline-variable substitution
    /// (SPEC_FULL.md §4.3 "the two substitution grammars are distinct").
    fn substitute_env(&self, value: &ParamValue) -> ParamValue {
        match value {
            ParamValue::String(s) => ParamValue::String(substitute_env_string(s)),
            ParamValue::List(items) => {
                ParamValue::List(items.iter().map(|v| self.substitute_env(v)).collect())
            }
            ParamValue::Object(map) => ParamValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.substitute_env(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Coerces a value to the spec's declared type where a lossless
    /// textual coercion exists (e.g. the string `"true"` to boolean).
    fn coerce(spec: &ParamSpec, value: ParamValue) -> Result<ParamValue, String> {
        if spec.param_type.matches(&value) {
            return Ok(value);
        }
        match (spec.param_type, &value) {
            (ParamType::Integer, ParamValue::String(s)) => s
                .parse::<i64>()
                .map(ParamValue::Integer)
                .map_err(|_| format!("'{}' is not a valid integer", s)),
            (ParamType::Float, ParamValue::String(s)) => s
                .parse::<f64>()
                .map(ParamValue::Float)
                .map_err(|_| format!("'{}' is not a valid float", s)),
            (ParamType::Boolean, ParamValue::String(s)) => match s.as_str() {
                "true" => Ok(ParamValue::Bool(true)),
                "false" => Ok(ParamValue::Bool(false)),
                _ => Err(format!("'{}' is not a valid boolean", s)),
            },
            _ => Err(format!(
                "expected type {:?}, found {}",
                spec.param_type,
                value.type_name()
            )),
        }
    }

    /// Runs the full pipeline: alias folding, env substitution, type
    /// coercion, defaults, validation. Returns the normalized map and any
    /// ParameterError records (errors don't stop normalization — every
    /// key is still checked, per spec.md §4.4's "accumulated" model).
    pub fn normalize(&self, connector_type: &str, line: usize, params: &ParamMap) -> (ParamMap, Vec<ErrorRecord>) {
        let mut errors = Vec::new();
        let folded = self.fold_aliases(params);

        let mut normalized = ParamMap::new();
        for (key, value) in &folded {
            let substituted = self.substitute_env(value);
            match self.spec_for_key(key) {
                Some(spec) => match Self::coerce(spec, substituted) {
                    Ok(coerced) => {
                        if let ParamValue::String(s) = &coerced {
                            if let Some(pattern) = &spec.pattern {
                                if !regex_matches(pattern, s) {
                                    errors.push(ErrorRecord::new(
                                        ErrorClass::Parameter,
                                        line,
                                        format!(
                                            "'{}' value '{}' does not match required pattern {}",
                                            key, s, pattern
                                        ),
                                        vec![format!("check the '{}' value against {}", key, pattern)],
                                    ));
                                }
                            }
                            if let Some(values) = &spec.enum_values {
                                if !values.iter().any(|v| v == s) {
                                    errors.push(ErrorRecord::new(
                                        ErrorClass::Parameter,
                                        line,
                                        format!(
                                            "'{}' value '{}' is not one of {:?}",
                                            key, s, values
                                        ),
                                        vec![format!("use one of {:?}", values)],
                                    ));
                                }
                            }
                        }
                        normalized.insert(key.clone(), coerced);
                    }
                    Err(message) => {
                        errors.push(ErrorRecord::new(
                            ErrorClass::Parameter,
                            line,
                            format!("'{}' for connector {}: {}", key, connector_type, message),
                            vec![format!("'{}' must be a {:?}", key, spec.param_type)],
                        ));
                    }
                },
                None => {
                    if self.open {
                        normalized.insert(key.clone(), value.clone());
                    } else {
                        errors.push(ErrorRecord::new(
                            ErrorClass::Parameter,
                            line,
                            format!("unknown parameter '{}' for connector {}", key, connector_type),
                            self.known_key_suggestions(),
                        ));
                    }
                }
            }
        }

        for spec in &self.specs {
            if !normalized.contains_key(&spec.canonical_name) {
                if let Some(default) = &spec.default {
                    normalized.insert(spec.canonical_name.clone(), default.clone());
                } else if spec.required {
                    errors.push(ErrorRecord::new(
                        ErrorClass::Parameter,
                        line,
                        format!(
                            "missing required parameter '{}' for connector {}",
                            spec.canonical_name, connector_type
                        ),
                        vec![format!(
                            "add '{}': <value>",
                            spec.canonical_name
                        )],
                    ));
                }
            }
        }

        for req in &self.cross_field {
            let matches_when = normalized
                .get(&req.when_key)
                .and_then(|v| v.as_str())
                .map(|v| v == req.when_value)
                .unwrap_or(false);
            if matches_when && !normalized.contains_key(&req.requires_key) {
                errors.push(ErrorRecord::new(
                    ErrorClass::Parameter,
                    line,
                    format!(
                        "'{}' = '{}' requires '{}' to be set",
                        req.when_key, req.when_value, req.requires_key
                    ),
                    vec![format!("add '{}': <value>", req.requires_key)],
                ));
            }
        }

        (normalized, errors)
    }

    fn known_key_suggestions(&self) -> Vec<String> {
        self.specs
            .iter()
            .take(3)
            .map(|s| format!("add '{}'", s.canonical_name))
            .collect()
    }
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern"))
}

fn substitute_env_string(text: &str) -> String {
    env_pattern()
        .replace_all(text, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

fn regex_matches(pattern: &str, value: &str) -> bool {
    Regex::new(pattern).map(|re| re.is_match(value)).unwrap_or(false)
}

/// Industry-standard parameters recognized uniformly across connectors
/// that support them (spec.md §6).
pub fn sync_mode_spec() -> ParamSpec {
    ParamSpec::new("sync_mode", ParamType::String)
        .enum_values(&["full_refresh", "incremental"])
        .default_value(ParamValue::String("full_refresh".to_string()))
}

pub fn cursor_field_spec() -> ParamSpec {
    ParamSpec::new("cursor_field", ParamType::String)
}

pub fn primary_key_spec() -> ParamSpec {
    ParamSpec::new("primary_key", ParamType::String)
}

/// All known industry-standard keys, by canonical name.
pub fn standard_params() -> HashMap<&'static str, ParamSpec> {
    HashMap::from([
        ("sync_mode", sync_mode_spec()),
        ("cursor_field", cursor_field_spec()),
        ("primary_key", primary_key_spec()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_schema() -> ParameterSchema {
        ParameterSchema::new(vec![
            ParamSpec::new("path", ParamType::String).required().pattern(r"\.csv$"),
            ParamSpec::new("has_header", ParamType::Boolean).default_value(ParamValue::Bool(true)),
            ParamSpec::new("delimiter", ParamType::String).default_value(ParamValue::String(",".to_string())),
        ])
    }

    #[test]
    fn missing_required_param_is_an_error() {
        let schema = csv_schema();
        let (_, errors) = schema.normalize("CSV", 1, &ParamMap::new());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("path"));
    }

    #[test]
    fn defaults_are_populated() {
        let schema = csv_schema();
        let mut params = ParamMap::new();
        params.insert("path".to_string(), ParamValue::String("a.csv".to_string()));
        let (normalized, errors) = schema.normalize("CSV", 1, &params);
        assert!(errors.is_empty());
        assert_eq!(normalized.get("has_header").unwrap(), &ParamValue::Bool(true));
        assert_eq!(normalized.get("delimiter").unwrap().as_str(), Some(","));
    }

    #[test]
    fn pattern_mismatch_is_an_error() {
        let schema = csv_schema();
        let mut params = ParamMap::new();
        params.insert("path".to_string(), ParamValue::String("a.json".to_string()));
        let (_, errors) = schema.normalize("CSV", 1, &params);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn unknown_key_is_rejected_unless_schema_is_open() {
        let schema = csv_schema();
        let mut params = ParamMap::new();
        params.insert("path".to_string(), ParamValue::String("a.csv".to_string()));
        params.insert("mystery".to_string(), ParamValue::String("x".to_string()));
        let (_, errors) = schema.normalize("CSV", 1, &params);
        assert_eq!(errors.len(), 1);

        let open_schema = ParameterSchema { open: true, ..csv_schema() };
        let (normalized, errors) = open_schema.normalize("CSV", 1, &params);
        assert!(errors.is_empty());
        assert!(normalized.contains_key("mystery"));
    }

    #[test]
    fn alias_folds_to_canonical_name() {
        let schema = ParameterSchema::new(vec![
            ParamSpec::new("path_prefix", ParamType::String).alias("prefix").required(),
        ]);
        let mut params = ParamMap::new();
        params.insert("prefix".to_string(), ParamValue::String("data/".to_string()));
        let (normalized, errors) = schema.normalize("S3", 1, &params);
        assert!(errors.is_empty());
        assert!(normalized.contains_key("path_prefix"));
        assert!(!normalized.contains_key("prefix"));
    }

    #[test]
    fn canonical_value_wins_over_alias_when_both_present() {
        let schema = ParameterSchema::new(vec![
            ParamSpec::new("path_prefix", ParamType::String).alias("prefix"),
        ]);
        let mut params = ParamMap::new();
        params.insert("path_prefix".to_string(), ParamValue::String("canonical/".to_string()));
        params.insert("prefix".to_string(), ParamValue::String("alias/".to_string()));
        let (normalized, _) = schema.normalize("S3", 1, &params);
        assert_eq!(normalized.get("path_prefix").unwrap().as_str(), Some("canonical/"));
    }

    #[test]
    fn string_integer_is_coerced() {
        let schema = ParameterSchema::new(vec![ParamSpec::new("port", ParamType::Integer)]);
        let mut params = ParamMap::new();
        params.insert("port".to_string(), ParamValue::String("5432".to_string()));
        let (normalized, errors) = schema.normalize("POSTGRES", 1, &params);
        assert!(errors.is_empty());
        assert_eq!(normalized.get("port").unwrap(), &ParamValue::Integer(5432));
    }

    #[test]
    fn cross_field_requirement_is_enforced() {
        let schema = ParameterSchema::new(vec![
            ParamSpec::new("mode", ParamType::String),
            ParamSpec::new("path", ParamType::String),
        ])
        .with_cross_field(CrossFieldRequirement {
            when_key: "mode".to_string(),
            when_value: "persistent".to_string(),
            requires_key: "path".to_string(),
        });
        let mut params = ParamMap::new();
        params.insert("mode".to_string(), ParamValue::String("persistent".to_string()));
        let (_, errors) = schema.normalize("ENGINE", 1, &params);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("path"));
    }

    #[test]
    fn env_var_is_substituted_in_string_values() {
        std::env::set_var("SQLFLOW_TEST_TOKEN", "secret123");
        let schema = ParameterSchema::new(vec![ParamSpec::new("token", ParamType::String)]).open();
        let mut params = ParamMap::new();
        params.insert("token".to_string(), ParamValue::String("${SQLFLOW_TEST_TOKEN}".to_string()));
        let (normalized, _) = schema.normalize("REST", 1, &params);
        assert_eq!(normalized.get("token").unwrap().as_str(), Some("secret123"));
        std::env::remove_var("SQLFLOW_TEST_TOKEN");
    }
}
