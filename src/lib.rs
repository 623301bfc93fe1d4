//! Full-page response caching for CMS-rendered sites.
//!
//! Rendered HTML pages are written to disk as compressed artifact families
//! keyed by URL, and served back without touching the host application.
//! The crate is split along the request lifecycle:
//!
//! - [`http`] and [`pipeline`] decide whether a request or rendered response
//!   is cacheable at all.
//! - [`paths`], [`compression`], [`expiration`], and [`store`] turn URLs
//!   into artifact files and back.
//! - [`purge`] translates content events (publishes, deletes, setting
//!   changes) into deferred, deduplicated invalidation.
//! - [`config`], [`update`], and [`shutdown`] carry the layered settings,
//!   the drop-in descriptor that bootstraps the pre-boot fast path, and the
//!   end-of-request drain of deferred work.
//! - [`engine`] assembles it all; [`host`] is the narrow trait the engine
//!   needs a host CMS to implement.
//!
//! ```no_run
//! use std::sync::Arc;
//! # use subito::host::{SiteDirectory, TermRef};
//! use subito::{PageCache, RequestContext, ResponseState, ServeOutcome};
//!
//! # fn demo(directory: Arc<dyn SiteDirectory>) -> Result<(), Box<dyn std::error::Error>> {
//! let cache = PageCache::full("/var/cache/subito", "/opt/subito", directory, None)?;
//!
//! let request = RequestContext::builder("https://example.test/about/")?.build();
//! match cache.serve(&request)? {
//!     ServeOutcome::Hit(page) => { /* write page.headers and page.body out */ }
//!     ServeOutcome::NotModified(page) => { /* 304, headers only */ }
//!     ServeOutcome::Miss => {
//!         let body = b"<html>rendered by the host</html>";
//!         cache.save(&request, &ResponseState::html(200), body)?;
//!     }
//! }
//! cache.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod config;
pub mod engine;
pub mod expiration;
pub mod host;
pub mod http;
mod lock;
pub mod paths;
pub mod pipeline;
pub mod purge;
pub mod shutdown;
pub mod store;
pub mod update;

pub use engine::{CacheStatus, EngineError, FastPath, PageCache, VERSION};
pub use http::{ExecutionFlags, Method, RequestContext, ResponseState};
pub use store::{CachedPage, SaveOutcome, ServeOutcome};
