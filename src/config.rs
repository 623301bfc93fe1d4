//! Layered configuration with a file-based fast-path snapshot.
//!
//! The merged view is built defaults ← snapshot file ← network settings ←
//! site settings, later layers winning recursively. The snapshot file is the
//! only source available before the host application has bootstrapped, which
//! is exactly when the fast path needs to decide whether to serve a cached
//! page. `cache_dir` is recomputed on every load and never trusted from
//! persisted state: the install location may have moved since it was saved.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::expiration::DEFAULT_EXPIRATION_SECS;
use crate::lock;
use crate::shutdown::Terminable;

const SOURCE: &str = "config";

pub const ENABLED_KEY: &str = "page_cache.enabled";
pub const DEBUG_KEY: &str = "page_cache.debug";
pub const EXPIRATION_KEY: &str = "page_cache.expiration";
pub const EXCLUSIONS_KEY: &str = "page_cache.exclusions";
pub const CACHE_DIR_KEY: &str = "page_cache.cache_dir";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings backend is unavailable; a save was requested before the host finished bootstrapping")]
    BackendUnavailable,
    #[error("failed to write the config snapshot at {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration cannot be serialized: {0}")]
    Serialize(String),
    #[error("settings backend rejected the write: {0}")]
    Backend(String),
}

/// Host-provided persistent settings storage.
///
/// Absent entirely on the pre-boot fast path; the network layer is only
/// populated in multi-tenant installs.
pub trait SettingsBackend: Send + Sync {
    fn network(&self) -> Option<Value> {
        None
    }

    fn site(&self) -> Option<Value>;

    fn persist(&self, settings: &Value) -> Result<(), ConfigError>;
}

/// Built-in defaults; the bottom layer of every merge.
pub fn defaults(cache_dir: &Path) -> Value {
    json!({
        "page_cache": {
            "cache_dir": cache_dir.to_string_lossy(),
            "debug": false,
            "enabled": true,
            "expiration": DEFAULT_EXPIRATION_SECS,
            "exclusions": [],
            "compression": {
                "enabled": true,
            },
        },
    })
}

/// Recursive later-wins merge. Objects merge per key; anything else replaces.
fn merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value.clone(),
    }
}

/// Builds the merged configuration view from all available layers.
pub struct ConfigLoader {
    cache_dir: PathBuf,
    snapshot_path: PathBuf,
    backend: Option<Arc<dyn SettingsBackend>>,
}

impl ConfigLoader {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        snapshot_path: impl Into<PathBuf>,
        backend: Option<Arc<dyn SettingsBackend>>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            snapshot_path: snapshot_path.into(),
            backend,
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn load(&self) -> Value {
        let mut merged = defaults(&self.cache_dir);

        if let Some(snapshot) = self.read_snapshot() {
            merge(&mut merged, &snapshot);
        }

        if let Some(backend) = &self.backend {
            if let Some(network) = backend.network() {
                merge(&mut merged, &network);
            }
            if let Some(site) = backend.site() {
                merge(&mut merged, &site);
            }
        }

        // Force the live-computed cache_dir every time; a stale persisted
        // path would redirect every read and write of the cache tree.
        merged["page_cache"]["cache_dir"] =
            Value::String(self.cache_dir.to_string_lossy().into_owned());

        merged
    }

    fn read_snapshot(&self) -> Option<Value> {
        let raw = std::fs::read_to_string(&self.snapshot_path).ok()?;

        match toml::from_str::<Value>(&raw) {
            Ok(value) => Some(value),
            Err(parse_error) => {
                warn!(
                    path = %self.snapshot_path.display(),
                    error = %parse_error,
                    "Config snapshot is unreadable, ignoring it"
                );
                None
            }
        }
    }
}

/// The live configuration store.
///
/// Reads are served from the merged in-memory view; `set` only mutates that
/// view. A mutation becomes durable once `queue()` marks the store dirty and
/// the shutdown pipeline flushes it, or when `save()` is called directly.
pub struct ConfigStore {
    items: RwLock<Value>,
    will_save: AtomicBool,
    loader: ConfigLoader,
}

impl ConfigStore {
    pub fn new(loader: ConfigLoader) -> Arc<Self> {
        let items = loader.load();

        Arc::new(Self {
            items: RwLock::new(items),
            will_save: AtomicBool::new(false),
            loader,
        })
    }

    /// Defaults-only store with no snapshot and no backend; test and
    /// embedding convenience.
    pub fn in_memory() -> Arc<Self> {
        let dir = std::env::temp_dir().join("subito-cache");
        let snapshot = dir.join("config.toml");
        Self::new(ConfigLoader::new(dir, snapshot, None))
    }

    /// The whole merged view.
    pub fn all(&self) -> Value {
        lock::read(&self.items, SOURCE, "all").clone()
    }

    /// Dot-path lookup, e.g. `page_cache.compression.enabled`.
    pub fn get(&self, key: &str) -> Option<Value> {
        let items = lock::read(&self.items, SOURCE, "get");
        let mut cursor = &*items;

        for segment in key.split('.') {
            cursor = cursor.get(segment)?;
        }

        Some(cursor.clone())
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect()
    }

    /// In-memory dot-path write; intermediate objects are created as needed.
    pub fn set(&self, key: &str, value: Value) {
        let mut items = lock::write(&self.items, SOURCE, "set");
        let mut cursor = &mut *items;

        let segments: Vec<&str> = key.split('.').collect();
        for (index, segment) in segments.iter().enumerate() {
            if index == segments.len() - 1 {
                cursor[*segment] = value;
                return;
            }

            if !cursor.get(*segment).is_some_and(Value::is_object) {
                cursor[*segment] = json!({});
            }
            cursor = &mut cursor[*segment];
        }
    }

    /// Marks the store dirty for the deferred end-of-request save.
    pub fn queue(&self) {
        self.will_save.store(true, Ordering::SeqCst);
    }

    pub fn is_save_queued(&self) -> bool {
        self.will_save.load(Ordering::SeqCst)
    }

    /// Immediate write-through: persists to the settings backend and rewrites
    /// the fast-path snapshot so the pre-boot view stays current.
    ///
    /// Calling this without a backend is an ordering bug, not a runtime
    /// condition, and fails loudly.
    pub fn save(&self) -> Result<(), ConfigError> {
        let backend = self
            .loader
            .backend
            .as_ref()
            .ok_or(ConfigError::BackendUnavailable)?;

        let items = self.all();
        backend.persist(&items)?;
        self.write_snapshot(&items)?;

        debug!(snapshot = %self.loader.snapshot_path.display(), "Configuration saved");
        Ok(())
    }

    /// Rewrites only the snapshot file; used when no backend exists yet but
    /// the fast path must observe a state change (e.g. drop-in regeneration).
    pub fn write_snapshot(&self, items: &Value) -> Result<(), ConfigError> {
        let serialized = toml::to_string_pretty(items)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        if let Some(parent) = self.loader.snapshot_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Snapshot {
                path: self.loader.snapshot_path.clone(),
                source,
            })?;
        }

        std::fs::write(&self.loader.snapshot_path, serialized).map_err(|source| {
            ConfigError::Snapshot {
                path: self.loader.snapshot_path.clone(),
                source,
            }
        })
    }

    /// Reloads the merged view. Needed when a layer becomes available
    /// mid-lifecycle, i.e. once the host finishes bootstrapping.
    pub fn refresh(&self) {
        let fresh = self.loader.load();
        *lock::write(&self.items, SOURCE, "refresh") = fresh;
    }
}

impl Terminable for ConfigStore {
    fn terminate(&self) {
        // The shutdown trigger can fire twice; only the first pass saves.
        if !self.will_save.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Err(save_error) = self.save() {
            error!(error = %save_error, "Deferred configuration save failed");
        }
    }
}
