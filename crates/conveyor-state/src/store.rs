//! SweepingOutputStore: scoped, write-once artifacts shared between steps.
//!
//! A step publishes a named JSON value into a scope; any later step whose
//! ancestry contains that scope can resolve it. Two backends are provided:
//! `MemoryOutputStore` for tests and single-process runs, and
//! `RedbOutputStore` so outputs survive restarts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::scope::{ExecutionScope, OutputScope, execution_prefix};
use crate::tables::OUTPUTS;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// A published artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub scope: OutputScope,
    pub name: String,
    pub value: serde_json::Value,
    /// Epoch milliseconds.
    pub published_at: u64,
}

impl OutputEntry {
    fn new(scope: &OutputScope, name: &str, value: serde_json::Value) -> Self {
        let published_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            scope: scope.clone(),
            name: name.to_string(),
            value,
            published_at,
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> StateResult<T> {
        serde_json::from_value(self.value.clone()).map_err(map_err!(Deserialize))
    }
}

/// Scoped key/value store for step outcomes.
///
/// Entries are write-once: publishing the same name twice into the same
/// scope fails with [`StateError::AlreadyPublished`]. Resolving never
/// consumes an entry.
pub trait SweepingOutputStore: Send + Sync {
    fn publish(&self, scope: &OutputScope, name: &str, value: serde_json::Value)
    -> StateResult<()>;

    /// Absence is `Ok(None)`.
    fn resolve(&self, scope: &OutputScope, name: &str) -> StateResult<Option<OutputEntry>>;
}

/// Typed helpers over any output store.
pub trait OutputStoreExt: SweepingOutputStore {
    fn publish_typed<T: Serialize>(&self, scope: &OutputScope, name: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_value(value).map_err(map_err!(Serialize))?;
        self.publish(scope, name, value)
    }

    fn resolve_typed<T: DeserializeOwned>(&self, scope: &OutputScope, name: &str) -> StateResult<Option<T>> {
        match self.resolve(scope, name)? {
            Some(entry) => entry.decode().map(Some),
            None => Ok(None),
        }
    }
}

impl<S: SweepingOutputStore + ?Sized> OutputStoreExt for S {}

impl ExecutionScope {
    /// Search step, then stage, then pipeline scope; return the first hit.
    pub fn resolve_nearest(
        &self,
        store: &dyn SweepingOutputStore,
        name: &str,
    ) -> StateResult<Option<OutputEntry>> {
        for scope in self.lookup_chain() {
            if let Some(entry) = store.resolve(&scope, name)? {
                debug!(key = %scope.key(name), "output resolved");
                return Ok(Some(entry));
            }
        }
        debug!(%name, execution_id = %self.execution_id, "output not found in any scope");
        Ok(None)
    }

    pub fn resolve_nearest_typed<T: DeserializeOwned>(
        &self,
        store: &dyn SweepingOutputStore,
        name: &str,
    ) -> StateResult<Option<T>> {
        match self.resolve_nearest(store, name)? {
            Some(entry) => entry.decode().map(Some),
            None => Ok(None),
        }
    }
}

// ── Memory backend ─────────────────────────────────────────────────

/// Process-local output store.
#[derive(Debug, Default)]
pub struct MemoryOutputStore {
    entries: RwLock<HashMap<String, OutputEntry>>,
}

impl MemoryOutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SweepingOutputStore for MemoryOutputStore {
    fn publish(&self, scope: &OutputScope, name: &str, value: serde_json::Value) -> StateResult<()> {
        let key = scope.key(name);
        let mut entries = self.entries.write().map_err(map_err!(Poisoned))?;
        if entries.contains_key(&key) {
            return Err(StateError::AlreadyPublished(key));
        }
        entries.insert(key.clone(), OutputEntry::new(scope, name, value));
        debug!(%key, "output published");
        Ok(())
    }

    fn resolve(&self, scope: &OutputScope, name: &str) -> StateResult<Option<OutputEntry>> {
        let entries = self.entries.read().map_err(map_err!(Poisoned))?;
        Ok(entries.get(&scope.key(name)).cloned())
    }
}

// ── redb backend ───────────────────────────────────────────────────

/// Thread-safe output store backed by redb.
#[derive(Clone)]
pub struct RedbOutputStore {
    db: Arc<Database>,
}

impl RedbOutputStore {
    /// Open (or create) a persistent output store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "output store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory output store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory output store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(OUTPUTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// All entries published under one execution, in key order.
    pub fn list_for_execution(&self, execution_id: &str) -> StateResult<Vec<OutputEntry>> {
        let prefix = execution_prefix(execution_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OUTPUTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let output: OutputEntry =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(output);
            }
        }
        Ok(results)
    }
}

impl SweepingOutputStore for RedbOutputStore {
    fn publish(&self, scope: &OutputScope, name: &str, value: serde_json::Value) -> StateResult<()> {
        let key = scope.key(name);
        let entry = OutputEntry::new(scope, name, value);
        let bytes = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let exists;
        {
            let mut table = txn.open_table(OUTPUTS).map_err(map_err!(Table))?;
            exists = table.get(key.as_str()).map_err(map_err!(Read))?.is_some();
            if !exists {
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        if exists {
            txn.abort().map_err(map_err!(Transaction))?;
            return Err(StateError::AlreadyPublished(key));
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "output published");
        Ok(())
    }

    fn resolve(&self, scope: &OutputScope, name: &str) -> StateResult<Option<OutputEntry>> {
        let key = scope.key(name);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OUTPUTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let entry: OutputEntry =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }
}
