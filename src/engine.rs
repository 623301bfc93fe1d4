//! Composition roots and the control surface.
//!
//! Two ways in: [`FastPath`] is the minimal pre-boot assembly that can answer
//! requests from disk before the host application exists, wired from nothing
//! but the config snapshot; [`PageCache`] is the full engine with purging,
//! content events, upgrades, and the deferred-work shutdown sequence.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::compression::{Brotli, Collection, CompressionError, Deflate, Gzip, Html, Zstd};
use crate::config::{
    ConfigError, ConfigLoader, ConfigStore, DEBUG_KEY, ENABLED_KEY, EXPIRATION_KEY,
    SettingsBackend,
};
use crate::expiration::DEFAULT_EXPIRATION_SECS;
use crate::host::SiteDirectory;
use crate::http::{RequestContext, ResponseState};
use crate::paths::CachePath;
use crate::purge::{BatchPurger, ContentEvents, Purge};
use crate::shutdown::ShutdownHandler;
use crate::store::{PageStore, SaveOutcome, ServeOutcome, StoreError};
use crate::update::{DropIn, DropInRemover, DropInRestorer, UpdateError, Updater};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const SNAPSHOT_FILE: &str = "config.toml";
const DROP_IN_FILE: &str = "drop-in.toml";
const STATE_FILE: &str = "update-state.json";

const GZIP_LEVEL: u32 = 6;
const DEFLATE_LEVEL: u32 = 6;
const BROTLI_LEVEL: u32 = 5;
const ZSTD_LEVEL: i32 = 12;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Path(#[from] crate::paths::PathError),
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Update(#[from] UpdateError),
}

/// A point-in-time summary for dashboards and CLIs.
#[derive(Debug, Clone)]
pub struct CacheStatus {
    pub enabled: bool,
    pub debug: bool,
    pub expiration_secs: u64,
    pub artifact_count: usize,
    pub cache_dir: PathBuf,
}

fn default_collection(
    config: &Arc<ConfigStore>,
    secure_transport: bool,
) -> Result<Arc<Collection>, CompressionError> {
    Ok(Arc::new(Collection::new(vec![
        Arc::new(Brotli::new(config.clone(), BROTLI_LEVEL, secure_transport)?),
        Arc::new(Zstd::new(config.clone(), ZSTD_LEVEL)?),
        Arc::new(Gzip::new(config.clone(), GZIP_LEVEL)?),
        Arc::new(Deflate::new(config.clone(), DEFLATE_LEVEL)?),
        Arc::new(Html),
    ])))
}

// =============================================================================
// Fast path
// =============================================================================

/// The pre-boot read path: snapshot config plus the store, nothing else.
pub struct FastPath {
    store: PageStore,
}

impl FastPath {
    /// Assembles the fast path for a known cache directory.
    ///
    /// `secure_transport` must reflect the inbound connection; it gates
    /// whether brotli artifacts are eligible.
    pub fn boot(
        cache_dir: impl Into<PathBuf>,
        secure_transport: bool,
    ) -> Result<Self, EngineError> {
        let cache_dir = cache_dir.into();
        let snapshot = cache_dir.join(SNAPSHOT_FILE);
        let config = ConfigStore::new(ConfigLoader::new(cache_dir, snapshot, None));
        let compressors = default_collection(&config, secure_transport)?;

        Ok(Self {
            store: PageStore::new(config, compressors)?,
        })
    }

    /// Assembles the fast path from a drop-in descriptor, the way a host
    /// loader would. `None` means no descriptor: fall through to a normal
    /// render.
    pub fn from_drop_in(drop_in_path: &Path, secure_transport: bool) -> Option<Self> {
        let drop_in = DropIn::load(drop_in_path)?;
        Self::boot(drop_in.cache_dir(), secure_transport).ok()
    }

    pub fn serve(&self, request: &RequestContext) -> Result<ServeOutcome, StoreError> {
        self.store.serve(request)
    }
}

// =============================================================================
// Full engine
// =============================================================================

/// The fully-wired cache engine and its control surface.
pub struct PageCache {
    config: Arc<ConfigStore>,
    store: PageStore,
    purge: Arc<Purge>,
    events: ContentEvents,
    shutdown: ShutdownHandler,
    drop_in: DropIn,
}

impl PageCache {
    /// Wires the whole engine for one site.
    ///
    /// `install_path` is where the engine's own code lives, recorded in the
    /// drop-in so the host loader can find it pre-boot.
    pub fn full(
        cache_dir: impl Into<PathBuf>,
        install_path: impl Into<PathBuf>,
        directory: Arc<dyn SiteDirectory>,
        backend: Option<Arc<dyn SettingsBackend>>,
    ) -> Result<Self, EngineError> {
        let cache_dir = cache_dir.into();
        let snapshot = cache_dir.join(SNAPSHOT_FILE);
        let config = ConfigStore::new(ConfigLoader::new(
            cache_dir.clone(),
            snapshot,
            backend,
        ));

        let secure_transport = directory.home_url().starts_with("https://");
        let compressors = default_collection(&config, secure_transport)?;
        let store = PageStore::new(config.clone(), compressors.clone())?;

        let purge = Arc::new(Purge::new(
            CachePath::new(&cache_dir)?,
            compressors,
            config.clone(),
            directory.clone(),
        ));
        let batch = Arc::new(BatchPurger::new(purge.clone()));
        let events = ContentEvents::new(directory, batch.clone(), &config);

        let drop_in = DropIn::new(
            cache_dir.join(DROP_IN_FILE),
            &cache_dir,
            install_path,
            VERSION,
        );
        let mut updater = Updater::new(cache_dir.join(STATE_FILE), VERSION);
        updater.register(Arc::new(DropInRemover::new(drop_in.clone())));
        updater.register(Arc::new(DropInRestorer::new(drop_in.clone())));
        updater.run();
        let updater = Arc::new(updater);

        // Drain order: queued purges first, then config, then the version
        // record; a purge may queue a config save.
        let mut shutdown = ShutdownHandler::new();
        shutdown.register(batch);
        shutdown.register(config.clone());
        shutdown.register(updater);

        info!(cache_dir = %cache_dir.display(), version = VERSION, "Page cache engine ready");

        Ok(Self {
            config,
            store,
            purge,
            events,
            shutdown,
            drop_in,
        })
    }

    // -------------------------------------------------------------------------
    // Request plumbing
    // -------------------------------------------------------------------------

    pub fn serve(&self, request: &RequestContext) -> Result<ServeOutcome, StoreError> {
        self.store.serve(request)
    }

    pub fn save(
        &self,
        request: &RequestContext,
        response: &ResponseState,
        body: &[u8],
    ) -> Result<SaveOutcome, StoreError> {
        self.store.save(request, response, body)
    }

    /// Wraps the host's render step: runs `render`, hands the final bytes to
    /// the write pipeline, and returns them for the host to stream.
    ///
    /// A rejected or empty body is not an error; the bytes still come back
    /// and the page simply goes uncached.
    pub fn capture<F>(
        &self,
        request: &RequestContext,
        response: &ResponseState,
        render: F,
    ) -> Result<Vec<u8>, StoreError>
    where
        F: FnOnce() -> Vec<u8>,
    {
        let body = render();
        self.store.save(request, response, &body)?;
        Ok(body)
    }

    /// The content-event entry points embedders wire host hooks to.
    pub fn events(&self) -> &ContentEvents {
        &self.events
    }

    /// Fires the end-of-request sequence: release the client, drain purges,
    /// flush deferred saves.
    pub fn shutdown(&self) {
        self.shutdown.run();
    }

    // -------------------------------------------------------------------------
    // Control surface
    // -------------------------------------------------------------------------

    pub fn is_on(&self) -> bool {
        self.config.bool_or(ENABLED_KEY, true)
    }

    /// Enables caching and makes it durable immediately.
    pub fn on(&self) -> Result<(), EngineError> {
        self.config.set(ENABLED_KEY, Value::Bool(true));
        self.config.save()?;
        Ok(())
    }

    /// Disables caching, makes it durable, and clears the cached artifacts
    /// so a later re-enable starts fresh.
    pub fn off(&self) -> Result<(), EngineError> {
        self.config.set(ENABLED_KEY, Value::Bool(false));
        self.config.save()?;
        self.clear();
        Ok(())
    }

    /// Drops every cached page for the site.
    pub fn clear(&self) -> bool {
        self.purge.all_pages()
    }

    pub fn debug_enabled(&self) -> bool {
        self.config.bool_or(DEBUG_KEY, false)
    }

    pub fn set_debug(&self, enabled: bool) -> Result<(), EngineError> {
        self.config.set(DEBUG_KEY, Value::Bool(enabled));
        self.config.save()?;
        Ok(())
    }

    /// Rewrites the drop-in descriptor in place.
    pub fn regenerate_drop_in(&self) -> Result<(), EngineError> {
        self.drop_in.generate()?;
        Ok(())
    }

    pub fn status(&self) -> CacheStatus {
        let paths = self.store.paths();

        CacheStatus {
            enabled: self.is_on(),
            debug: self.debug_enabled(),
            expiration_secs: self.config.u64_or(EXPIRATION_KEY, DEFAULT_EXPIRATION_SECS),
            artifact_count: count_files(&paths.page_dir()),
            cache_dir: paths.cache_dir().to_path_buf(),
        }
    }
}

/// Recursive file count; unreadable entries just don't count.
fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}
