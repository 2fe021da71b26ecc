//! Local key-value persistence for dashboards and export presets.

use crate::{
    config::EngineConfig,
    error::{DashboardError, Result},
    models::Dashboard,
};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Key holding the saved dashboard list.
pub const DASHBOARDS_KEY: &str = "dashboards";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

pub fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    store
        .get(key)?
        .map(|raw| serde_json::from_str(&raw).map_err(DashboardError::from))
        .transpose()
}

pub fn set_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// A single JSON object on disk; every write rewrites the file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), keys = entries.len(), "opened file store");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

/// File-backed when `DASHQL_STORE_PATH` is set, in-memory otherwise.
pub fn open_store(config: &EngineConfig) -> Result<Arc<dyn KeyValueStore>> {
    match &config.store_path {
        Some(path) => Ok(Arc::new(FileStore::open(path)?)),
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Saved dashboards, kept as one list under [`DASHBOARDS_KEY`].
#[derive(Clone)]
pub struct DashboardRepository {
    store: Arc<dyn KeyValueStore>,
}

impl DashboardRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Unreadable entries are logged and treated as an empty list.
    pub fn list(&self) -> Result<Vec<Dashboard>> {
        match get_json::<Vec<Dashboard>>(self.store.as_ref(), DASHBOARDS_KEY) {
            Ok(dashboards) => Ok(dashboards.unwrap_or_default()),
            Err(DashboardError::Serialization(err)) => {
                warn!(error = %err, "discarding unreadable dashboard list");
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Dashboard>> {
        Ok(self.list()?.into_iter().find(|dashboard| dashboard.id == id))
    }

    pub fn save_all(&self, dashboards: &[Dashboard]) -> Result<()> {
        set_json(self.store.as_ref(), DASHBOARDS_KEY, dashboards)
    }

    /// Replaces a dashboard with the same id, or appends it.
    pub fn upsert(&self, dashboard: Dashboard) -> Result<()> {
        let mut dashboards = self.list()?;
        match dashboards.iter_mut().find(|existing| existing.id == dashboard.id) {
            Some(existing) => *existing = dashboard,
            None => dashboards.push(dashboard),
        }
        self.save_all(&dashboards)
    }

    pub fn delete(&self, id: Uuid) -> Result<bool> {
        let mut dashboards = self.list()?;
        let before = dashboards.len();
        dashboards.retain(|dashboard| dashboard.id != id);
        let removed = dashboards.len() != before;
        if removed {
            self.save_all(&dashboards)?;
        }
        Ok(removed)
    }
}
