//! Version upgrades and drop-in self-healing.
//!
//! The fast path is bootstrapped by a drop-in descriptor the host loads
//! before anything else; it records where the cache lives, where the engine
//! is installed, and which version wrote it. After an upgrade the descriptor
//! on disk is stale, so the [`Updater`] runs registered tasks whenever the
//! persisted version differs from the running one: removing a stale drop-in
//! pre-boot and regenerating it post-boot.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::shutdown::Terminable;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("drop-in I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("drop-in descriptor cannot be serialized: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("updater state cannot be serialized: {0}")]
    State(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct DropInManifest {
    cache_dir: PathBuf,
    install_path: PathBuf,
    version: String,
}

/// The on-disk descriptor that hands the fast path its wiring.
#[derive(Debug, Clone)]
pub struct DropIn {
    path: PathBuf,
    cache_dir: PathBuf,
    install_path: PathBuf,
    version: String,
}

impl DropIn {
    pub fn new(
        path: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        install_path: impl Into<PathBuf>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            cache_dir: cache_dir.into(),
            install_path: install_path.into(),
            version: version.into(),
        }
    }

    /// Rehydrates a descriptor from disk; how the fast path finds its wiring.
    pub fn load(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path).ok()?;
        let manifest: DropInManifest = toml::from_str(&raw).ok()?;

        Some(Self {
            path,
            cache_dir: manifest.cache_dir,
            install_path: manifest.install_path,
            version: manifest.version,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Writes the descriptor atomically.
    pub fn generate(&self) -> Result<(), UpdateError> {
        let manifest = DropInManifest {
            cache_dir: self.cache_dir.clone(),
            install_path: self.install_path.clone(),
            version: self.version.clone(),
        };
        let serialized = toml::to_string_pretty(&manifest)?;

        let io_error = |source| UpdateError::Io {
            path: self.path.clone(),
            source,
        };

        let parent = self.path.parent().unwrap_or_else(|| Path::new("/"));
        std::fs::create_dir_all(parent).map_err(io_error)?;

        let mut staged = tempfile::NamedTempFile::new_in(parent).map_err(io_error)?;
        staged.write_all(serialized.as_bytes()).map_err(io_error)?;
        staged
            .persist(&self.path)
            .map_err(|persist_error| io_error(persist_error.error))?;

        debug!(path = %self.path.display(), version = self.version, "Drop-in generated");
        Ok(())
    }

    /// Removes the descriptor; already absent counts as removed.
    pub fn remove(&self) -> Result<(), UpdateError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(io_error) if io_error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(UpdateError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// The version recorded in the descriptor on disk, if readable.
    pub fn installed_version(&self) -> Option<String> {
        let raw = std::fs::read_to_string(&self.path).ok()?;

        match toml::from_str::<DropInManifest>(&raw) {
            Ok(manifest) => Some(manifest.version),
            Err(parse_error) => {
                warn!(
                    path = %self.path.display(),
                    error = %parse_error,
                    "Drop-in descriptor is unreadable"
                );
                None
            }
        }
    }

    /// Whether the descriptor on disk matches the running version.
    pub fn is_current(&self) -> bool {
        self.installed_version().as_deref() == Some(self.version.as_str())
    }
}

/// One piece of upgrade work, gated on the version change.
pub trait UpdateTask: Send + Sync {
    fn name(&self) -> &'static str;

    fn should_run(&self, previous: Option<&str>, current: &str) -> bool;

    fn run(&self) -> Result<(), UpdateError>;
}

/// Pre-boot task: a descriptor written by another version cannot be trusted
/// to wire the fast path correctly, so it goes away before it is consulted.
pub struct DropInRemover {
    drop_in: DropIn,
}

impl DropInRemover {
    pub fn new(drop_in: DropIn) -> Self {
        Self { drop_in }
    }
}

impl UpdateTask for DropInRemover {
    fn name(&self) -> &'static str {
        "drop_in_remover"
    }

    fn should_run(&self, _previous: Option<&str>, _current: &str) -> bool {
        self.drop_in.exists() && !self.drop_in.is_current()
    }

    fn run(&self) -> Result<(), UpdateError> {
        self.drop_in.remove()
    }
}

/// Post-boot task: rewrites the descriptor whenever it is missing or stale.
pub struct DropInRestorer {
    drop_in: DropIn,
}

impl DropInRestorer {
    pub fn new(drop_in: DropIn) -> Self {
        Self { drop_in }
    }
}

impl UpdateTask for DropInRestorer {
    fn name(&self) -> &'static str {
        "drop_in_restorer"
    }

    fn should_run(&self, _previous: Option<&str>, _current: &str) -> bool {
        !self.drop_in.is_current()
    }

    fn run(&self) -> Result<(), UpdateError> {
        self.drop_in.generate()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct UpdaterState {
    version: String,
}

/// Runs registered tasks on version changes and persists the seen version.
///
/// The state write is deferred to shutdown so a crash mid-upgrade reruns the
/// tasks next boot instead of recording a version it never finished.
pub struct Updater {
    state_path: PathBuf,
    current_version: String,
    previous_version: Option<String>,
    tasks: Vec<Arc<dyn UpdateTask>>,
    dirty: AtomicBool,
}

impl Updater {
    pub fn new(state_path: impl Into<PathBuf>, current_version: impl Into<String>) -> Self {
        let state_path = state_path.into();
        let previous_version = std::fs::read_to_string(&state_path)
            .ok()
            .and_then(|raw| serde_json::from_str::<UpdaterState>(&raw).ok())
            .map(|state| state.version);

        Self {
            state_path,
            current_version: current_version.into(),
            previous_version,
            tasks: Vec::new(),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn register(&mut self, task: Arc<dyn UpdateTask>) {
        self.tasks.push(task);
    }

    pub fn previous_version(&self) -> Option<&str> {
        self.previous_version.as_deref()
    }

    /// Runs every task that wants to run. A failing task is logged and does
    /// not stop the rest, but it keeps the version unrecorded so the run is
    /// retried next boot.
    pub fn run(&self) {
        let previous = self.previous_version.as_deref();
        let mut all_succeeded = true;

        for task in &self.tasks {
            if !task.should_run(previous, &self.current_version) {
                continue;
            }

            debug!(task = task.name(), "Running update task");
            if let Err(task_error) = task.run() {
                error!(task = task.name(), error = %task_error, "Update task failed");
                all_succeeded = false;
            }
        }

        if all_succeeded && previous != Some(self.current_version.as_str()) {
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    fn flush_state(&self) -> Result<(), UpdateError> {
        let state = UpdaterState {
            version: self.current_version.clone(),
        };
        let serialized = serde_json::to_string(&state)?;

        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| UpdateError::Io {
                path: self.state_path.clone(),
                source,
            })?;
        }

        std::fs::write(&self.state_path, serialized).map_err(|source| UpdateError::Io {
            path: self.state_path.clone(),
            source,
        })
    }
}

impl Terminable for Updater {
    fn terminate(&self) {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Err(flush_error) = self.flush_state() {
            error!(error = %flush_error, "Failed to record the updated version");
        }
    }
}
