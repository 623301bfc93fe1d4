//! Cache path resolution.
//!
//! One place to turn URLs into on-disk locations. Cached pages live at
//! `<cache_dir>/page/<host>/<url-path>`, with one file per compression
//! variant distinguished only by extension. The per-host subtree is also the
//! unit of "purge everything".

use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("the cache directory cannot be empty")]
    EmptyCacheDir,
    #[error("URL needs a valid host: {url}")]
    MissingHost { url: String },
    #[error("URL could not be parsed: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Deterministic URL-to-path mapping. Pure; performs no I/O.
#[derive(Debug, Clone)]
pub struct CachePath {
    cache_dir: PathBuf,
}

impl CachePath {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self, PathError> {
        let cache_dir = cache_dir.into();

        if cache_dir.as_os_str().is_empty() {
            return Err(PathError::EmptyCacheDir);
        }

        Ok(Self { cache_dir })
    }

    /// The root cache directory, e.g. `/var/cache/subito`.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where pages are cached, e.g. `/var/cache/subito/page`.
    pub fn page_dir(&self) -> PathBuf {
        self.cache_dir.join("page")
    }

    /// The per-host cache subtree, e.g. `/var/cache/subito/page/example.test`.
    pub fn site_dir(&self, host: &str) -> PathBuf {
        self.page_dir().join(host.trim_matches('/'))
    }

    /// Converts a URL into an artifact base path (no extension).
    ///
    /// The path mirrors the relative URL so the cached resource can always be
    /// found again from the URL alone. The query string is never part of the
    /// key; an empty path maps to the literal `index` segment.
    pub fn for_url(&self, url: &str) -> Result<PathBuf, PathError> {
        let parsed = Url::parse(url)?;

        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| PathError::MissingHost {
                url: url.to_string(),
            })?;

        let trimmed = parsed.path().trim_matches('/');
        let segment = if trimmed.is_empty() { "index" } else { trimmed };

        Ok(self.page_dir().join(host).join(segment))
    }
}
