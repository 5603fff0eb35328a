//! Best-effort persistence for provider usage counters.
//!
//! Counters survive restarts for continuity only. The on-disk shape is one
//! namespaced entry holding `{ currentUsage, lastReset }` per provider:
//!
//! ```json
//! { "alfalyzer.providerUsage": { "finnhub": { "currentUsage": 12, "lastReset": 1700000000000 } } }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;

/// Default storage namespace.
pub const DEFAULT_USAGE_NAMESPACE: &str = "alfalyzer.providerUsage";

/// Persisted usage for one provider.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub current_usage: u32,
    /// Epoch milliseconds of the last daily window reset.
    pub last_reset: i64,
}

/// Usage records keyed by provider id.
pub type UsageSnapshot = HashMap<String, UsageRecord>;

/// Storage backend for usage counters.
pub trait PersistentStore: Send + Sync {
    fn load(&self) -> Result<UsageSnapshot, MarketDataError>;
    fn save(&self, snapshot: &UsageSnapshot) -> Result<(), MarketDataError>;
}

/// Store that keeps the snapshot in memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<UsageSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: UsageSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }
}

impl PersistentStore for MemoryStore {
    fn load(&self) -> Result<UsageSnapshot, MarketDataError> {
        Ok(self
            .snapshot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone())
    }

    fn save(&self, snapshot: &UsageSnapshot) -> Result<(), MarketDataError> {
        *self.snapshot.lock().unwrap_or_else(|p| p.into_inner()) = snapshot.clone();
        Ok(())
    }
}

/// Store backed by a JSON document on disk.
///
/// Other top-level entries in the document are preserved on save.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    namespace: String,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_namespace(path, DEFAULT_USAGE_NAMESPACE)
    }

    pub fn with_namespace(path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            namespace: namespace.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<serde_json::Map<String, serde_json::Value>, MarketDataError> {
        if !self.path.exists() {
            return Ok(serde_json::Map::new());
        }
        let text = fs::read_to_string(&self.path)
            .map_err(|e| MarketDataError::Persistence(format!("read {}: {}", self.path.display(), e)))?;
        if text.trim().is_empty() {
            return Ok(serde_json::Map::new());
        }
        serde_json::from_str(&text)
            .map_err(|e| MarketDataError::Persistence(format!("parse {}: {}", self.path.display(), e)))
    }
}

impl PersistentStore for JsonFileStore {
    fn load(&self) -> Result<UsageSnapshot, MarketDataError> {
        let document = self.read_document()?;
        match document.get(&self.namespace) {
            Some(entry) => serde_json::from_value(entry.clone())
                .map_err(|e| MarketDataError::Persistence(format!("decode usage: {}", e))),
            None => Ok(UsageSnapshot::new()),
        }
    }

    fn save(&self, snapshot: &UsageSnapshot) -> Result<(), MarketDataError> {
        let mut document = self.read_document()?;
        let value = serde_json::to_value(snapshot)
            .map_err(|e| MarketDataError::Persistence(format!("encode usage: {}", e)))?;
        document.insert(self.namespace.clone(), value);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| MarketDataError::Persistence(e.to_string()))?;
            }
        }

        let body = serde_json::to_string_pretty(&document)
            .map_err(|e| MarketDataError::Persistence(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, body).map_err(|e| MarketDataError::Persistence(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| MarketDataError::Persistence(e.to_string()))?;

        debug!(
            "Usage store: saved {} provider records to {}",
            snapshot.len(),
            self.path.display()
        );
        Ok(())
    }
}
