//! The page store: reading and writing cached artifacts.
//!
//! One cached page is a family of sibling files, one per enabled compression
//! strategy, differing only by extension. The read path classifies the
//! request, negotiates an encoding, checks freshness, and answers with the
//! artifact bytes plus the headers a hit must carry; the write path
//! classifies the rendered response and materializes every enabled variant
//! atomically.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, warn};

use crate::compression::{Collection, CompressionError, Compressor};
use crate::config::{CACHE_DIR_KEY, ConfigStore, DEBUG_KEY, ENABLED_KEY, EXPIRATION_KEY};
use crate::expiration::{DEFAULT_EXPIRATION_SECS, Expiration};
use crate::http::{RequestContext, ResponseState};
use crate::paths::{CachePath, PathError};
use crate::pipeline::{self, Pipeline, PipelineContext};

/// IMF-fixdate, the only HTTP date format worth emitting.
const HTTP_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

const CACHED_BY: &str = "subito";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error("cache I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A fully-formed cached response.
#[derive(Debug, Clone)]
pub struct CachedPage {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// What the read path decided.
#[derive(Debug, Clone)]
pub enum ServeOutcome {
    /// No servable artifact; the host renders the page normally.
    Miss,
    Hit(CachedPage),
    /// The client's copy is current; empty-body 304.
    NotModified(CachedPage),
}

/// What the write path decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Skipped,
    Saved { variants: usize },
}

type SaveVeto = Box<dyn Fn(&RequestContext, &ResponseState) -> bool + Send + Sync>;

pub struct PageStore {
    paths: CachePath,
    compressors: Arc<Collection>,
    config: Arc<ConfigStore>,
    serve_pipeline: Pipeline,
    save_pipeline: Pipeline,
    save_veto: Option<SaveVeto>,
}

impl PageStore {
    /// Store with the stock classification pipelines and no integrations.
    pub fn new(config: Arc<ConfigStore>, compressors: Arc<Collection>) -> Result<Self, StoreError> {
        let serve = pipeline::serve_pipeline(config.clone(), Vec::new());
        let save = pipeline::save_pipeline(config.clone(), Vec::new());
        Self::with_pipelines(config, compressors, serve, save)
    }

    pub fn with_pipelines(
        config: Arc<ConfigStore>,
        compressors: Arc<Collection>,
        serve_pipeline: Pipeline,
        save_pipeline: Pipeline,
    ) -> Result<Self, StoreError> {
        let cache_dir = config
            .get(CACHE_DIR_KEY)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        Ok(Self {
            paths: CachePath::new(cache_dir)?,
            compressors,
            config,
            serve_pipeline,
            save_pipeline,
            save_veto: None,
        })
    }

    /// Installs an embedder veto consulted last on the write path.
    pub fn set_save_veto(
        &mut self,
        veto: impl Fn(&RequestContext, &ResponseState) -> bool + Send + Sync + 'static,
    ) {
        self.save_veto = Some(Box::new(veto));
    }

    pub fn paths(&self) -> &CachePath {
        &self.paths
    }

    pub fn compressors(&self) -> &Arc<Collection> {
        &self.compressors
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Attempts to answer a request from disk.
    pub fn serve(&self, request: &RequestContext) -> Result<ServeOutcome, StoreError> {
        if !self.config.bool_or(ENABLED_KEY, true) {
            return Ok(ServeOutcome::Miss);
        }

        let ctx = PipelineContext {
            request,
            response: None,
        };
        if !self.serve_pipeline.admits(&ctx) {
            return Ok(ServeOutcome::Miss);
        }

        let base = self.paths.for_url(request.url_str())?;

        // Negotiate an encoding, then fall back to the identity artifact when
        // the negotiated variant was never written (e.g. compression was
        // enabled after this page was cached).
        let accept = request.header("accept-encoding").unwrap_or("");
        let mut compressor = self.compressors.negotiate(accept);
        let mut artifact = artifact_path(&base, compressor.extension());

        if !artifact.exists() {
            compressor = self.compressors.identity();
            artifact = artifact_path(&base, compressor.extension());
            if !artifact.exists() {
                return Ok(ServeOutcome::Miss);
            }
        }

        let expiration =
            Expiration::from_secs(self.config.u64_or(EXPIRATION_KEY, DEFAULT_EXPIRATION_SECS));
        if expiration.is_expired(&artifact) {
            return Ok(ServeOutcome::Miss);
        }

        let modified = file_mtime(&artifact)?;
        let mut headers = hit_headers(&modified, compressor.as_ref());

        if self.config.bool_or(DEBUG_KEY, false) {
            let encoding = match compressor.encoding() {
                "" => "identity",
                other => other,
            };
            headers.push(("X-Subito-Debug".to_string(), format!("encoding={encoding}")));
        }

        if client_copy_is_current(request, &modified) {
            let expires = modified + time::Duration::seconds(expiration.length_secs() as i64);
            let mut not_modified_headers = headers;
            not_modified_headers.push((
                "Cache-Control".to_string(),
                "no-cache, must-revalidate".to_string(),
            ));
            not_modified_headers.push(("Expires".to_string(), http_date(&expires)));

            return Ok(ServeOutcome::NotModified(CachedPage {
                status: 304,
                headers: not_modified_headers,
                body: Bytes::new(),
            }));
        }

        let body = std::fs::read(&artifact).map_err(|source| StoreError::Io {
            path: artifact.clone(),
            source,
        })?;

        debug!(
            path = %artifact.display(),
            encoding = compressor.encoding(),
            bytes = body.len(),
            "Cache hit"
        );

        Ok(ServeOutcome::Hit(CachedPage {
            status: 200,
            headers,
            body: Bytes::from(body),
        }))
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Persists a rendered page as one artifact per enabled strategy.
    ///
    /// The identity variant is load-bearing (it is the negotiation fallback),
    /// so its failure fails the save; a compressed variant that fails is
    /// logged and skipped.
    pub fn save(
        &self,
        request: &RequestContext,
        response: &ResponseState,
        body: &[u8],
    ) -> Result<SaveOutcome, StoreError> {
        if body.is_empty() {
            return Ok(SaveOutcome::Skipped);
        }

        if !self.config.bool_or(ENABLED_KEY, true) {
            return Ok(SaveOutcome::Skipped);
        }

        let ctx = PipelineContext {
            request,
            response: Some(response),
        };
        if !self.save_pipeline.admits(&ctx) {
            return Ok(SaveOutcome::Skipped);
        }

        if let Some(veto) = &self.save_veto {
            if veto(request, response) {
                debug!(path = request.path(), "Save vetoed by embedder");
                return Ok(SaveOutcome::Skipped);
            }
        }

        let base = self.paths.for_url(request.url_str())?;
        let parent = base.parent().unwrap_or_else(|| Path::new("/"));
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

        let mut variants = 0;
        for compressor in self.compressors.enabled() {
            let artifact = artifact_path(&base, compressor.extension());
            let identity = compressor.encoding().is_empty();

            let written = compressor
                .compress(body)
                .map_err(StoreError::from)
                .and_then(|compressed| write_atomically(parent, &artifact, &compressed));

            match written {
                Ok(()) => variants += 1,
                Err(save_error) if identity => return Err(save_error),
                Err(save_error) => {
                    warn!(
                        path = %artifact.display(),
                        error = %save_error,
                        "Skipping failed compressed variant"
                    );
                }
            }
        }

        debug!(path = %base.display(), variants, "Page cached");
        Ok(SaveOutcome::Saved { variants })
    }
}

/// `<base>.<ext>`; `Path::with_extension` would eat dots inside the last
/// URL segment.
fn artifact_path(base: &Path, extension: &str) -> PathBuf {
    let mut raw = base.as_os_str().to_owned();
    raw.push(".");
    raw.push(extension);
    PathBuf::from(raw)
}

fn write_atomically(parent: &Path, artifact: &Path, content: &[u8]) -> Result<(), StoreError> {
    let io_error = |source| StoreError::Io {
        path: artifact.to_path_buf(),
        source,
    };

    let mut staged = tempfile::NamedTempFile::new_in(parent).map_err(io_error)?;
    staged.write_all(content).map_err(io_error)?;
    staged
        .persist(artifact)
        .map_err(|persist_error| io_error(persist_error.error))?;

    Ok(())
}

fn file_mtime(path: &Path) -> Result<OffsetDateTime, StoreError> {
    let modified = std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(truncate_to_seconds(OffsetDateTime::from(modified)))
}

/// HTTP dates carry second precision only.
fn truncate_to_seconds(at: OffsetDateTime) -> OffsetDateTime {
    at.replace_nanosecond(0).unwrap_or(at)
}

fn http_date(at: &OffsetDateTime) -> String {
    let utc = at.to_offset(time::UtcOffset::UTC);
    utc.format(HTTP_DATE)
        .unwrap_or_else(|_| String::from("Thu, 01 Jan 1970 00:00:00 GMT"))
}

fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(value, HTTP_DATE)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

fn hit_headers(modified: &OffsetDateTime, compressor: &dyn Compressor) -> Vec<(String, String)> {
    let age = (OffsetDateTime::now_utc() - *modified).whole_seconds().max(0);

    let mut headers = vec![
        (
            "Content-Type".to_string(),
            "text/html; charset=UTF-8".to_string(),
        ),
        ("Last-Modified".to_string(), http_date(modified)),
        ("X-Cache-Age".to_string(), age.to_string()),
        ("X-Cached-By".to_string(), CACHED_BY.to_string()),
    ];
    headers.extend(compressor.headers());

    headers
}

fn client_copy_is_current(request: &RequestContext, modified: &OffsetDateTime) -> bool {
    request
        .header("if-modified-since")
        .and_then(parse_http_date)
        .is_some_and(|since| since == *modified)
}
