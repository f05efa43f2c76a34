//! C11: Watermark State Manager (spec.md §4.11).
//!
//! Durable key-value store for incremental-load cursor state, keyed by
//! `(pipeline_id, source_name, cursor_field)`. Two backends mirror the
//! engine adapter's two `EngineMode`s (spec.md §4.7): an in-memory map
//! for dev/ephemeral runs, and a single JSON file for persistent mode —
//! the same "file path from profile, else ephemeral" split the teacher
//! draws between its config-driven writer and ad-hoc runs.
//!
//! Design note (SPEC_FULL.md §9.3): `full_refresh` never clears a stored
//! watermark; it is a non-destructive one-off override. `clear` is the
//! only operation that discards stored progress.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SqlFlowError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct WatermarkKey {
    pipeline_id: String,
    source_name: String,
    cursor_field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkRecord {
    pub pipeline_id: String,
    pub source_name: String,
    pub cursor_field: String,
    pub value: String,
}

/// A durable, monotonic watermark store. `set` rejects any update whose
/// new value sorts less than the currently stored value (lexicographically
/// — cursor values are compared as opaque strings, matching
/// `extract_cursor`'s return type); an equal value is accepted as a
/// no-op-but-monotonic update.
pub trait WatermarkStore: Send + Sync {
    fn get(&self, pipeline_id: &str, source_name: &str, cursor_field: &str) -> Result<Option<String>>;
    fn set(&self, pipeline_id: &str, source_name: &str, cursor_field: &str, new_value: &str) -> Result<()>;
    fn list(&self, pipeline_id: &str) -> Result<Vec<WatermarkRecord>>;
    fn clear(&self, pipeline_id: &str, source_name: &str) -> Result<()>;
}

#[derive(Default)]
struct MapBackend(Mutex<HashMap<WatermarkKey, String>>);

impl MapBackend {
    fn do_get(&self, key: &WatermarkKey) -> Option<String> {
        self.0.lock().unwrap().get(key).cloned()
    }

    fn do_set(&self, key: WatermarkKey, new_value: String) -> Result<()> {
        let mut guard = self.0.lock().unwrap();
        if let Some(existing) = guard.get(&key) {
            if new_value.as_str() < existing.as_str() {
                return Err(SqlFlowError::WatermarkError(format!(
                    "non-monotonic watermark update for {}/{}/{}: {} is not greater than {}",
                    key.pipeline_id, key.source_name, key.cursor_field, new_value, existing
                )));
            }
        }
        guard.insert(key, new_value);
        Ok(())
    }

    fn do_list(&self, pipeline_id: &str) -> Vec<WatermarkRecord> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.pipeline_id == pipeline_id)
            .map(|(k, v)| WatermarkRecord {
                pipeline_id: k.pipeline_id.clone(),
                source_name: k.source_name.clone(),
                cursor_field: k.cursor_field.clone(),
                value: v.clone(),
            })
            .collect()
    }

    fn do_clear(&self, pipeline_id: &str, source_name: &str) {
        self.0
            .lock()
            .unwrap()
            .retain(|k, _| !(k.pipeline_id == pipeline_id && k.source_name == source_name));
    }
}

/// Per-process, non-durable backend (spec.md §4.11: "if the engine is
/// in-memory (dev mode), watermarks are per-process only").
#[derive(Default)]
pub struct InMemoryWatermarkStore(MapBackend);

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatermarkStore for InMemoryWatermarkStore {
    fn get(&self, pipeline_id: &str, source_name: &str, cursor_field: &str) -> Result<Option<String>> {
        Ok(self.0.do_get(&WatermarkKey {
            pipeline_id: pipeline_id.to_string(),
            source_name: source_name.to_string(),
            cursor_field: cursor_field.to_string(),
        }))
    }

    fn set(&self, pipeline_id: &str, source_name: &str, cursor_field: &str, new_value: &str) -> Result<()> {
        self.0.do_set(
            WatermarkKey {
                pipeline_id: pipeline_id.to_string(),
                source_name: source_name.to_string(),
                cursor_field: cursor_field.to_string(),
            },
            new_value.to_string(),
        )
    }

    fn list(&self, pipeline_id: &str) -> Result<Vec<WatermarkRecord>> {
        Ok(self.0.do_list(pipeline_id))
    }

    fn clear(&self, pipeline_id: &str, source_name: &str) -> Result<()> {
        self.0.do_clear(pipeline_id, source_name);
        Ok(())
    }
}

/// Single-file JSON-backed store for persistent mode. Every mutating
/// call rewrites the whole file under a process-wide lock — watermark
/// volume is small (one row per incremental source), so this trades
/// throughput for the simplicity of a single source of truth that a
/// transactional `set` can fsync as one unit.
pub struct FileWatermarkStore {
    path: PathBuf,
    cache: MapBackend,
}

impl FileWatermarkStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cache = MapBackend::default();
        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            if !text.trim().is_empty() {
                let records: Vec<WatermarkRecord> = serde_json::from_str(&text)?;
                let mut guard = cache.0.lock().unwrap();
                for r in records {
                    guard.insert(
                        WatermarkKey {
                            pipeline_id: r.pipeline_id,
                            source_name: r.source_name,
                            cursor_field: r.cursor_field,
                        },
                        r.value,
                    );
                }
            }
        }
        Ok(Self { path, cache })
    }

    fn persist(&self) -> Result<()> {
        let records: Vec<WatermarkRecord> = self
            .cache
            .0
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| WatermarkRecord {
                pipeline_id: k.pipeline_id.clone(),
                source_name: k.source_name.clone(),
                cursor_field: k.cursor_field.clone(),
                value: v.clone(),
            })
            .collect();
        let json = serde_json::to_string_pretty(&records)?;
        if let Some(parent) = Path::new(&self.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn get(&self, pipeline_id: &str, source_name: &str, cursor_field: &str) -> Result<Option<String>> {
        Ok(self.cache.do_get(&WatermarkKey {
            pipeline_id: pipeline_id.to_string(),
            source_name: source_name.to_string(),
            cursor_field: cursor_field.to_string(),
        }))
    }

    fn set(&self, pipeline_id: &str, source_name: &str, cursor_field: &str, new_value: &str) -> Result<()> {
        self.cache.do_set(
            WatermarkKey {
                pipeline_id: pipeline_id.to_string(),
                source_name: source_name.to_string(),
                cursor_field: cursor_field.to_string(),
            },
            new_value.to_string(),
        )?;
        self.persist()
    }

    fn list(&self, pipeline_id: &str) -> Result<Vec<WatermarkRecord>> {
        Ok(self.cache.do_list(pipeline_id))
    }

    fn clear(&self, pipeline_id: &str, source_name: &str) -> Result<()> {
        self.cache.do_clear(pipeline_id, source_name);
        self.persist()
    }
}
