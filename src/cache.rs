//! C15: Validation Cache (spec.md §4.15).
//!
//! Keyed by a content hash of the resolved pipeline bytes, the sorted
//! active variable bindings, and the connector registry's signature
//! (its sorted registered-type list — a registry change invalidates
//! every cached entry, since a newly registered connector type could
//! turn a previously unknown-connector error into a pass). Process-wide
//! and in-memory: "repeated runs in the same session skip re-validation"
//! (spec.md §4.4) means same-process, matching the Watermark Manager's
//! in-memory backend for dev/ephemeral runs (C11).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use crate::validator::ValidationOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(u64);

impl CacheKey {
    pub fn compute(
        resolved_pipeline_bytes: &[u8],
        variables: &[(String, String)],
        registry_signature: &[String],
    ) -> Self {
        let mut sorted_vars = variables.to_vec();
        sorted_vars.sort();
        let mut sorted_sig = registry_signature.to_vec();
        sorted_sig.sort();

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        resolved_pipeline_bytes.hash(&mut hasher);
        sorted_vars.hash(&mut hasher);
        sorted_sig.hash(&mut hasher);
        Self(hasher.finish())
    }
}

#[derive(Default)]
pub struct ValidationCache {
    entries: Mutex<HashMap<CacheKey, ValidationOutcome>>,
}

impl ValidationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: CacheKey) -> Option<ValidationOutcome> {
        self.entries.lock().unwrap().get(&key).cloned()
    }

    pub fn insert(&self, key: CacheKey, outcome: ValidationOutcome) {
        self.entries.lock().unwrap().insert(key, outcome);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorReport;

    #[test]
    fn same_inputs_produce_the_same_key() {
        let vars = vec![("env".to_string(), "prod".to_string())];
        let sig = vec!["CSV".to_string(), "REST".to_string()];
        let a = CacheKey::compute(b"pipeline bytes", &vars, &sig);
        let b = CacheKey::compute(b"pipeline bytes", &vars, &sig);
        assert_eq!(a, b);
    }

    #[test]
    fn variable_order_does_not_affect_the_key() {
        let sig = vec!["CSV".to_string()];
        let a = CacheKey::compute(
            b"bytes",
            &[("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())],
            &sig,
        );
        let b = CacheKey::compute(
            b"bytes",
            &[("b".to_string(), "2".to_string()), ("a".to_string(), "1".to_string())],
            &sig,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn changing_registry_signature_changes_the_key() {
        let vars = vec![];
        let a = CacheKey::compute(b"bytes", &vars, &["CSV".to_string()]);
        let b = CacheKey::compute(b"bytes", &vars, &["CSV".to_string(), "REST".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn hit_returns_the_cached_outcome_without_recomputation() {
        let cache = ValidationCache::new();
        let key = CacheKey::compute(b"bytes", &[], &[]);
        assert!(cache.get(key).is_none());
        cache.insert(
            key,
            ValidationOutcome {
                report: ErrorReport::new(),
                normalized_sources: HashMap::new(),
                normalized_exports: HashMap::new(),
            },
        );
        assert!(cache.get(key).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = ValidationCache::new();
        let key = CacheKey::compute(b"bytes", &[], &[]);
        cache.insert(
            key,
            ValidationOutcome {
                report: ErrorReport::new(),
                normalized_sources: HashMap::new(),
                normalized_exports: HashMap::new(),
            },
        );
        cache.clear();
        assert!(cache.is_empty());
    }
}
