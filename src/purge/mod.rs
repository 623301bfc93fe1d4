//! Cache invalidation.
//!
//! [`Purge`] does the actual file removal; [`batch::BatchPurger`] defers and
//! deduplicates it; the purgers in [`purgers`] translate content events into
//! queued targets. Purging is best-effort throughout: a failed removal is
//! logged and reported as `false`, never an error, because a stale artifact
//! only costs freshness while a failed request costs the whole response.

pub mod batch;
pub mod purgers;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::compression::Collection;
use crate::config::ConfigStore;
use crate::host::SiteDirectory;
use crate::paths::CachePath;

pub use batch::{BatchPurger, Permalink, PurgeError, PurgeStrategy};
pub use purgers::ContentEvents;

/// Subdirectory names that hold paginated views of a page.
pub const PAGINATION_BASES_KEY: &str = "page_cache.pagination_bases";

const DEFAULT_PAGINATION_BASES: [&str; 2] = ["page", "comment-page"];

/// Deletes cached artifacts. All methods return whether everything that
/// should have gone is gone; absence counts as success.
pub struct Purge {
    paths: CachePath,
    compressors: Arc<Collection>,
    config: Arc<ConfigStore>,
    directory: Arc<dyn SiteDirectory>,
}

impl Purge {
    pub fn new(
        paths: CachePath,
        compressors: Arc<Collection>,
        config: Arc<ConfigStore>,
        directory: Arc<dyn SiteDirectory>,
    ) -> Self {
        Self {
            paths,
            compressors,
            config,
            directory,
        }
    }

    /// Removes one page's artifacts, every enabled variant.
    ///
    /// Query-style URLs are rejected outright: they resolve to the host's
    /// `index` key and would take out the cached front page instead.
    pub fn page(&self, url: &str) -> bool {
        if !is_pretty_url(url) {
            debug!(url, "Refusing to purge a query-style URL");
            return false;
        }

        let base = match self.paths.for_url(url) {
            Ok(base) => base,
            Err(path_error) => {
                warn!(url, error = %path_error, "Cannot resolve purge path");
                return false;
            }
        };

        let mut clean = true;
        for compressor in self.compressors.enabled() {
            let artifact = artifact_path(&base, compressor.extension());
            clean &= remove_file(&artifact);
        }

        debug!(url, "Page purged");
        clean
    }

    /// Removes a page's pagination subtrees (`page/`, `comment-page/`, ...).
    pub fn pagination(&self, url: &str) -> bool {
        if !is_pretty_url(url) {
            debug!(url, "Refusing to purge pagination for a query-style URL");
            return false;
        }

        let base = match self.paths.for_url(url) {
            Ok(base) => base,
            Err(path_error) => {
                warn!(url, error = %path_error, "Cannot resolve purge path");
                return false;
            }
        };

        // The root URL maps to the literal `index` artifact; its pagination
        // lives beside it, not under it.
        let subtree = if base.file_name().is_some_and(|name| name == "index") {
            base.parent().map(Path::to_path_buf).unwrap_or(base)
        } else {
            base
        };

        let mut clean = true;
        for pagination_base in self.pagination_bases() {
            clean &= remove_dir(&subtree.join(pagination_base));
        }

        clean
    }

    pub fn page_with_pagination(&self, url: &str) -> bool {
        let page = self.page(url);
        let pagination = self.pagination(url);
        page && pagination
    }

    /// Resolves an object id to its current permalink and purges that.
    pub fn by_post_id(&self, post_id: u64) -> bool {
        match self.directory.permalink(post_id) {
            Some(url) => self.page(&url),
            None => {
                warn!(post_id, "No permalink to purge for object");
                false
            }
        }
    }

    /// Dispatches a queued target by its strategy.
    pub fn by_permalink(&self, permalink: &Permalink) -> bool {
        match permalink.strategy() {
            PurgeStrategy::Page => self.page(permalink.url()),
            PurgeStrategy::PageWithPagination => self.page_with_pagination(permalink.url()),
            PurgeStrategy::PostId => match permalink.object_id() {
                Some(post_id) => self.by_post_id(post_id),
                None => false,
            },
        }
    }

    /// Drops the whole per-site cache subtree. An absent subtree is success:
    /// the goal is "nothing cached", not "something was deleted".
    pub fn all_pages(&self) -> bool {
        let home = self.directory.home_url();
        let host = match Url::parse(&home).ok().and_then(|url| {
            url.host_str().map(str::to_string)
        }) {
            Some(host) => host,
            None => {
                warn!(home, "Cannot determine site host for full purge");
                return false;
            }
        };

        let site_dir = self.paths.site_dir(&host);
        let removed = remove_dir(&site_dir);
        if removed {
            debug!(path = %site_dir.display(), "Full page cache purged");
        }

        removed
    }

    fn pagination_bases(&self) -> Vec<String> {
        let configured = self.config.string_list(PAGINATION_BASES_KEY);
        if configured.is_empty() {
            return DEFAULT_PAGINATION_BASES
                .iter()
                .map(|base| base.to_string())
                .collect();
        }

        configured
    }
}

/// A pretty permalink addresses content by path, not by raw query string.
pub(crate) fn is_pretty_url(url: &str) -> bool {
    !url.contains("/?")
}

fn artifact_path(base: &Path, extension: &str) -> PathBuf {
    let mut raw = base.as_os_str().to_owned();
    raw.push(".");
    raw.push(extension);
    PathBuf::from(raw)
}

fn remove_file(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(io_error) if io_error.kind() == ErrorKind::NotFound => true,
        Err(io_error) => {
            warn!(path = %path.display(), error = %io_error, "Failed to remove artifact");
            false
        }
    }
}

fn remove_dir(path: &Path) -> bool {
    match std::fs::remove_dir_all(path) {
        Ok(()) => true,
        Err(io_error) if io_error.kind() == ErrorKind::NotFound => true,
        Err(io_error) => {
            warn!(path = %path.display(), error = %io_error, "Failed to remove cache subtree");
            false
        }
    }
}

// =============================================================================
// Test support
// =============================================================================


#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::testing::FakeSite;
    use super::*;
    use crate::compression::{Gzip, Html};
    use crate::config::ConfigLoader;
    use crate::shutdown::Terminable;

    fn purge_in(dir: &TempDir) -> Purge {
        let config = ConfigStore::new(ConfigLoader::new(
            dir.path(),
            dir.path().join("config.toml"),
            None,
        ));
        let compressors = Arc::new(Collection::new(vec![
            Arc::new(Gzip::new(config.clone(), 6).expect("valid level")),
            Arc::new(Html),
        ]));
        let mut site = FakeSite::new("https://example.test/");
        site.add_post(42, "https://example.test/hello-world/");
        site.add_post(7, "https://example.test/?p=7");

        Purge::new(
            CachePath::new(dir.path()).expect("valid dir"),
            compressors,
            config,
            Arc::new(site),
        )
    }

    fn seed(dir: &TempDir, relative: &str) -> std::path::PathBuf {
        let path = dir.path().join("page").join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, "cached").expect("write");
        path
    }

    #[test]
    fn page_removes_every_variant() {
        let dir = TempDir::new().expect("tempdir");
        let purge = purge_in(&dir);

        let html = seed(&dir, "example.test/hello-world.html");
        let gz = seed(&dir, "example.test/hello-world.gz");

        assert!(purge.page("https://example.test/hello-world/"));
        assert!(!html.exists());
        assert!(!gz.exists());
    }

    #[test]
    fn purging_an_uncached_page_succeeds() {
        let dir = TempDir::new().expect("tempdir");
        let purge = purge_in(&dir);

        assert!(purge.page("https://example.test/never-cached/"));
    }

    #[test]
    fn pagination_removes_the_subtrees() {
        let dir = TempDir::new().expect("tempdir");
        let purge = purge_in(&dir);

        let page_2 = seed(&dir, "example.test/blog/page/2.html");
        let comments = seed(&dir, "example.test/blog/comment-page/3.html");
        let post = seed(&dir, "example.test/blog/a-post.html");

        assert!(purge.pagination("https://example.test/blog/"));
        assert!(!page_2.exists());
        assert!(!comments.exists());
        // Nested content outside the pagination bases survives.
        assert!(post.exists());
    }

    #[test]
    fn root_pagination_lives_beside_the_index_artifact() {
        let dir = TempDir::new().expect("tempdir");
        let purge = purge_in(&dir);

        let page_2 = seed(&dir, "example.test/page/2.html");
        let index = seed(&dir, "example.test/index.html");

        assert!(purge.pagination("https://example.test/"));
        assert!(!page_2.exists());
        assert!(index.exists());
    }

    #[test]
    fn by_post_id_resolves_through_the_directory() {
        let dir = TempDir::new().expect("tempdir");
        let purge = purge_in(&dir);

        let html = seed(&dir, "example.test/hello-world.html");
        assert!(purge.by_post_id(42));
        assert!(!html.exists());

        assert!(!purge.by_post_id(999));
    }

    #[test]
    fn query_permalinks_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let purge = purge_in(&dir);

        let index = seed(&dir, "example.test/index.html");

        let target = Permalink::new("https://example.test/?p=42", None, PurgeStrategy::Page)
            .expect("valid");
        assert!(!purge.by_permalink(&target));
        assert!(!purge.pagination("https://example.test/?p=42"));
        // The front page's artifact is untouched.
        assert!(index.exists());
    }

    #[test]
    fn by_post_id_with_a_query_permalink_leaves_the_site_alone() {
        let dir = TempDir::new().expect("tempdir");
        let purge = purge_in(&dir);

        let index = seed(&dir, "example.test/index.html");
        let page_2 = seed(&dir, "example.test/page/2.html");

        // Post 7 only resolves to a `/?p=` permalink.
        assert!(!purge.by_post_id(7));
        assert!(index.exists());
        assert!(page_2.exists());
    }

    #[test]
    fn all_pages_drops_the_site_subtree_and_is_idempotent() {
        let dir = TempDir::new().expect("tempdir");
        let purge = purge_in(&dir);

        seed(&dir, "example.test/a.html");
        seed(&dir, "example.test/blog/b.html");

        assert!(purge.all_pages());
        assert!(!dir.path().join("page/example.test").exists());

        // Absent subtree still reports success.
        assert!(purge.all_pages());
    }

    #[test]
    fn batch_dedupes_and_drains_once() {
        let dir = TempDir::new().expect("tempdir");
        let purge = Arc::new(purge_in(&dir));
        let batch = BatchPurger::new(purge);

        let target = Permalink::new(
            "https://example.test/hello-world/",
            None,
            PurgeStrategy::Page,
        )
        .expect("valid");

        assert!(batch.queue(target.clone()));
        assert!(!batch.queue(target));
        assert_eq!(batch.count(), 1);

        let html = seed(&dir, "example.test/hello-world.html");
        batch.terminate();
        assert!(!html.exists());
        assert!(batch.is_empty());

        // A second drain has nothing to do.
        batch.terminate();
    }

    #[test]
    fn full_purge_dominates_the_batch() {
        let dir = TempDir::new().expect("tempdir");
        let purge = Arc::new(purge_in(&dir));
        let batch = BatchPurger::new(purge);

        let target = Permalink::new(
            "https://example.test/hello-world/",
            None,
            PurgeStrategy::Page,
        )
        .expect("valid");

        assert!(batch.queue(target.clone()));
        batch.queue_purge_all();

        assert_eq!(batch.count(), 0);
        assert!(batch.is_full_purge_pending());
        // Item-level queueing is pointless now.
        assert!(!batch.queue(target));

        let site = seed(&dir, "example.test/anything.html");
        batch.terminate();
        assert!(!site.exists());
        assert!(!batch.is_full_purge_pending());
    }
}
