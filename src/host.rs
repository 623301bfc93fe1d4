//! The host CMS surface the purge subsystem navigates.
//!
//! Purging needs to turn "content object 42 changed" into the set of URLs
//! whose cached artifacts are now stale. Everything it asks the host — the
//! object's own permalink, its archives, its author, its terms — goes through
//! [`SiteDirectory`], so the cache engine itself stays host-agnostic and the
//! tests can run against an in-memory directory.

use time::Date;

/// A taxonomy term, identified by id within its taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TermRef {
    pub id: u64,
    pub taxonomy: String,
}

impl TermRef {
    pub fn new(id: u64, taxonomy: impl Into<String>) -> Self {
        Self {
            id,
            taxonomy: taxonomy.into(),
        }
    }
}

/// Content object lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostStatus {
    Publish,
    Draft,
    AutoDraft,
    Pending,
    Private,
    Future,
    Trash,
    Other(String),
}

impl PostStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "publish" => Self::Publish,
            "draft" => Self::Draft,
            "auto-draft" => Self::AutoDraft,
            "pending" => Self::Pending,
            "private" => Self::Private,
            "future" => Self::Future,
            "trash" => Self::Trash,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Publish => "publish",
            Self::Draft => "draft",
            Self::AutoDraft => "auto-draft",
            Self::Pending => "pending",
            Self::Private => "private",
            Self::Future => "future",
            Self::Trash => "trash",
            Self::Other(raw) => raw,
        }
    }
}

/// Read-only lookups into the host CMS.
///
/// Link-returning methods yield absolute URLs; `None` means the host has no
/// such page (e.g. date archives are disabled), and the caller skips that
/// purge target rather than treating it as an error.
pub trait SiteDirectory: Send + Sync {
    /// The site's front-page URL.
    fn home_url(&self) -> String;

    /// The public URL of a content object.
    fn permalink(&self, post_id: u64) -> Option<String>;

    /// Whether the object's type and status make it publicly reachable.
    fn is_publicly_viewable(&self, post_id: u64) -> bool;

    /// Ancestor object ids, nearest first.
    fn ancestors(&self, post_id: u64) -> Vec<u64>;

    /// The object's publication date, for date-archive purging.
    fn published_on(&self, post_id: u64) -> Option<Date>;

    fn year_archive_link(&self, year: i32) -> Option<String>;

    fn month_archive_link(&self, year: i32, month: u8) -> Option<String>;

    fn day_archive_link(&self, year: i32, month: u8, day: u8) -> Option<String>;

    /// The object's content type slug, e.g. `post` or `product`.
    fn content_type(&self, post_id: u64) -> Option<String>;

    /// The archive URL for a content type, when it has one.
    fn type_archive_link(&self, content_type: &str) -> Option<String>;

    fn author_of(&self, post_id: u64) -> Option<u64>;

    fn author_archive_link(&self, author_id: u64) -> Option<String>;

    /// The page configured as the blog index, if separate from the front page.
    fn posts_page(&self) -> Option<u64>;

    /// Terms assigned to a content object, across all taxonomies.
    fn terms_of(&self, post_id: u64) -> Vec<TermRef>;

    fn term_link(&self, term: &TermRef) -> Option<String>;

    /// Ancestor terms, nearest first; empty for flat taxonomies.
    fn term_ancestors(&self, term: &TermRef) -> Vec<TermRef>;

    fn taxonomy_viewable(&self, taxonomy: &str) -> bool;

    fn taxonomy_hierarchical(&self, taxonomy: &str) -> bool;
}
