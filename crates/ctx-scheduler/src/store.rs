//! Persistence of registered expressions for restart recovery

use ctx_core::Expression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::debug;

use crate::queued::CallbackTargets;

/// Storage format version written by [`JsonFileStore`]
pub const STORE_VERSION: u32 = 1;

/// Storage key written into the file header
pub const STORE_KEY: &str = "context.expressions";

/// Persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch in {path}: expected {expected}, found {found}")]
    VersionMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A registration as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredExpression {
    pub id: String,
    pub expression: Expression,
    #[serde(default)]
    pub callbacks: CallbackTargets,
}

/// Persistence collaborator
///
/// The engine behaves identically with or without a store; it is only
/// consulted on registration, unregistration and [`restore`].
///
/// [`restore`]: crate::Engine::restore
pub trait ExpressionStore: Send + Sync {
    fn load_registered(&self) -> StoreResult<Vec<StoredExpression>>;

    fn save(&self, expression: &StoredExpression) -> StoreResult<()>;

    fn delete(&self, id: &str) -> StoreResult<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Store kept in memory, ordered by id
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, StoredExpression>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.entries).contains_key(id)
    }
}

impl ExpressionStore for MemoryStore {
    fn load_registered(&self) -> StoreResult<Vec<StoredExpression>> {
        Ok(lock(&self.entries).values().cloned().collect())
    }

    fn save(&self, expression: &StoredExpression) -> StoreResult<()> {
        lock(&self.entries).insert(expression.id.clone(), expression.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        lock(&self.entries).remove(id);
        Ok(())
    }
}

/// Versioned file wrapper
///
/// JSON format:
/// ```json
/// {
///   "version": 1,
///   "key": "context.expressions",
///   "data": [ { "id": "...", "expression": { ... }, "callbacks": { ... } } ]
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    key: String,
    data: Vec<StoredExpression>,
}

/// Store backed by a single JSON file
///
/// Every write rewrites the file through a temporary sibling and an atomic
/// rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles
    guard: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read(&self) -> StoreResult<Vec<StoredExpression>> {
        if !self.path.exists() {
            debug!(path = ?self.path, "Store file not found; starting empty");
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let file: StoreFile = serde_json::from_str(&content)?;
        if file.version != STORE_VERSION {
            return Err(StoreError::VersionMismatch {
                path: self.path.clone(),
                expected: STORE_VERSION,
                found: file.version,
            });
        }
        Ok(file.data)
    }

    fn write(&self, data: Vec<StoredExpression>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let content = serde_json::to_string_pretty(&StoreFile {
            version: STORE_VERSION,
            key: STORE_KEY.to_string(),
            data,
        })?;

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        fs::write(&temp, content).map_err(|e| self.io_error(e))?;
        fs::rename(&temp, &self.path).map_err(|e| self.io_error(e))?;
        debug!(path = ?self.path, "Saved store file");
        Ok(())
    }
}

impl ExpressionStore for JsonFileStore {
    fn load_registered(&self) -> StoreResult<Vec<StoredExpression>> {
        let _guard = lock(&self.guard);
        self.read()
    }

    fn save(&self, expression: &StoredExpression) -> StoreResult<()> {
        let _guard = lock(&self.guard);
        let mut data = self.read()?;
        match data.iter_mut().find(|e| e.id == expression.id) {
            Some(existing) => *existing = expression.clone(),
            None => data.push(expression.clone()),
        }
        self.write(data)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        let _guard = lock(&self.guard);
        let mut data = self.read()?;
        let before = data.len();
        data.retain(|e| e.id != id);
        if data.len() != before {
            self.write(data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctx_core::{Comparator, SensorLeaf};
    use tempfile::TempDir;

    fn stored(id: &str) -> StoredExpression {
        StoredExpression {
            id: id.to_string(),
            expression: Expression::compare(
                Expression::sensor(SensorLeaf::new("sensor.temperature")),
                Comparator::Gt,
                Expression::constant(25),
            ),
            callbacks: CallbackTargets::default().when_true("alerts"),
        }
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        store.save(&stored("b")).unwrap();
        store.save(&stored("a")).unwrap();
        store.save(&stored("a")).unwrap();

        let ids: Vec<String> = store
            .load_registered()
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        store.delete("a").unwrap();
        assert!(!store.contains("a"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_json_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("expressions.json");
        let store = JsonFileStore::new(&path);

        assert!(store.load_registered().unwrap().is_empty());

        store.save(&stored("too_hot")).unwrap();
        store.save(&stored("too_cold")).unwrap();
        assert!(path.exists());

        let reopened = JsonFileStore::new(&path);
        let loaded = reopened.load_registered().unwrap();
        assert_eq!(loaded, vec![stored("too_hot"), stored("too_cold")]);

        reopened.delete("too_hot").unwrap();
        assert_eq!(store.load_registered().unwrap(), vec![stored("too_cold")]);
    }

    #[test]
    fn test_json_store_file_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("expressions.json");
        JsonFileStore::new(&path).save(&stored("x")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["key"], STORE_KEY);
        assert_eq!(raw["data"][0]["expression"]["type"], "comparison");
    }

    #[test]
    fn test_json_store_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("expressions.json");
        std::fs::write(&path, r#"{"version": 9, "key": "context.expressions", "data": []}"#).unwrap();

        let err = JsonFileStore::new(&path).load_registered().unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { found: 9, .. }));
    }
}
