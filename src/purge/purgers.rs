//! Content-event purgers.
//!
//! Each purger knows how one kind of host event invalidates cached pages; it
//! queues targets on the [`BatchPurger`] and never touches disk itself.
//! [`ContentEvents`] is the embedder-facing entry point that wires host
//! events to the right purgers in the right order.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::config::ConfigStore;
use crate::host::{PostStatus, SiteDirectory, TermRef};
use crate::lock;

use super::batch::{BatchPurger, Permalink, PurgeStrategy};

const SOURCE: &str = "purge.purgers";

pub const MAX_TERM_COUNT_KEY: &str = "page_cache.max_term_count";
pub const DEFAULT_MAX_TERM_COUNT: u64 = 1_500;

fn queue_url(batch: &BatchPurger, url: String, strategy: PurgeStrategy) {
    if let Ok(permalink) = Permalink::new(url, None, strategy) {
        batch.queue(permalink);
    }
}

// =============================================================================
// Post purger
// =============================================================================

/// Purges a content object's own pages across its lifecycle.
///
/// Permalinks are captured *before* an update lands, because a slug change
/// moves the object to a new URL while the stale artifact stays at the old
/// one.
pub struct PostPurger {
    captured: Mutex<HashMap<u64, String>>,
}

impl PostPurger {
    pub fn new() -> Self {
        Self {
            captured: Mutex::new(HashMap::new()),
        }
    }

    /// Records the object's current URL ahead of an update.
    pub fn capture(&self, directory: &dyn SiteDirectory, post_id: u64) {
        if !directory.is_publicly_viewable(post_id) {
            return;
        }

        if let Some(url) = directory.permalink(post_id) {
            lock::acquire(&self.captured, SOURCE, "capture").insert(post_id, url);
        }
    }

    /// Records the URL of an object headed for the trash. The host has
    /// already renamed the slug with a `__trashed` suffix by the time the
    /// permalink is readable, so the suffix is stripped to recover the URL
    /// the artifact was cached under.
    pub fn capture_trashed(&self, directory: &dyn SiteDirectory, post_id: u64) {
        if let Some(url) = directory.permalink(post_id) {
            let original = url.replace("__trashed", "");
            lock::acquire(&self.captured, SOURCE, "capture_trashed").insert(post_id, original);
        }
    }

    /// Reacts to a status transition; returns the object id when a purge was
    /// queued so the caller can fan out to related pages.
    pub fn on_transition(
        &self,
        batch: &BatchPurger,
        directory: &dyn SiteDirectory,
        post_id: u64,
        old: &PostStatus,
        new: &PostStatus,
    ) -> Option<u64> {
        // A brand-new publish has no artifact to purge.
        if *old == PostStatus::AutoDraft && *new == PostStatus::Publish {
            return None;
        }

        // Only transitions leaving a published state, or in-place updates,
        // can invalidate anything.
        if *old != PostStatus::Publish && new != old {
            return None;
        }

        self.queue_own_pages(batch, directory, post_id)
    }

    /// Reacts to a permanent delete.
    pub fn on_delete(
        &self,
        batch: &BatchPurger,
        directory: &dyn SiteDirectory,
        post_id: u64,
    ) -> Option<u64> {
        let captured = lock::acquire(&self.captured, SOURCE, "on_delete").contains_key(&post_id);
        if !captured && !directory.is_publicly_viewable(post_id) {
            return None;
        }

        self.queue_own_pages(batch, directory, post_id)
    }

    /// A comment count change re-renders the post and its comment pages.
    pub fn on_comment_count(
        &self,
        batch: &BatchPurger,
        directory: &dyn SiteDirectory,
        post_id: u64,
    ) -> Option<u64> {
        let url = directory.permalink(post_id)?;
        queue_url(batch, url, PurgeStrategy::PageWithPagination);
        Some(post_id)
    }

    fn queue_own_pages(
        &self,
        batch: &BatchPurger,
        directory: &dyn SiteDirectory,
        post_id: u64,
    ) -> Option<u64> {
        let url = lock::acquire(&self.captured, SOURCE, "queue_own_pages")
            .remove(&post_id)
            .or_else(|| directory.permalink(post_id))?;

        if let Ok(permalink) = Permalink::new(url, Some(post_id), PurgeStrategy::PageWithPagination)
        {
            batch.queue(permalink);
            debug!(post_id, "Post purge queued");
        }

        // Hierarchical content renders ancestor pages (breadcrumbs, child
        // listings), so those go stale too.
        for ancestor in directory.ancestors(post_id) {
            if let Some(ancestor_url) = directory.permalink(ancestor) {
                queue_url(batch, ancestor_url, PurgeStrategy::Page);
            }
        }

        Some(post_id)
    }
}

impl Default for PostPurger {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Template purger
// =============================================================================

/// Changes to site-editor template objects restyle every page at once.
pub struct TemplatePurger {
    types: HashSet<String>,
}

impl TemplatePurger {
    pub fn new(types: Vec<String>) -> Self {
        Self {
            types: types.into_iter().collect(),
        }
    }

    pub fn handles(&self, content_type: &str) -> bool {
        self.types.contains(content_type)
    }

    pub fn on_change(&self, batch: &BatchPurger) {
        batch.queue_purge_all();
    }
}

impl Default for TemplatePurger {
    fn default() -> Self {
        Self::new(
            [
                "wp_block",
                "wp_navigation",
                "wp_template",
                "wp_template_part",
                "wp_global_styles",
            ]
            .iter()
            .map(|slug| slug.to_string())
            .collect(),
        )
    }
}

// =============================================================================
// Archive, author, home purgers
// =============================================================================

/// Date and content-type archives listing the changed object.
pub struct ArchivePurger;

impl ArchivePurger {
    pub fn purge_for(&self, batch: &BatchPurger, directory: &dyn SiteDirectory, post_id: u64) {
        if let Some(date) = directory.published_on(post_id) {
            let year = date.year();
            let month: u8 = date.month().into();
            let day = date.day();

            let links = [
                directory.year_archive_link(year),
                directory.month_archive_link(year, month),
                directory.day_archive_link(year, month, day),
            ];
            for link in links.into_iter().flatten() {
                queue_url(batch, link, PurgeStrategy::PageWithPagination);
            }
        }

        // The default type's listing is the home surface, owned by HomePurger.
        if let Some(content_type) = directory.content_type(post_id) {
            if content_type != "post" {
                if let Some(link) = directory.type_archive_link(&content_type) {
                    queue_url(batch, link, PurgeStrategy::PageWithPagination);
                }
            }
        }
    }
}

/// The author's archive lists the changed object.
pub struct AuthorPurger;

impl AuthorPurger {
    pub fn purge_for(&self, batch: &BatchPurger, directory: &dyn SiteDirectory, post_id: u64) {
        let Some(author_id) = directory.author_of(post_id) else {
            return;
        };

        if let Some(link) = directory.author_archive_link(author_id) {
            queue_url(batch, link, PurgeStrategy::PageWithPagination);
        }
    }
}

/// The front page and the blog index both list recent content.
pub struct HomePurger;

impl HomePurger {
    pub fn purge(&self, batch: &BatchPurger, directory: &dyn SiteDirectory) {
        queue_url(
            batch,
            directory.home_url(),
            PurgeStrategy::PageWithPagination,
        );

        if let Some(posts_page) = directory.posts_page() {
            if directory.is_publicly_viewable(posts_page) {
                if let Some(url) = directory.permalink(posts_page) {
                    queue_url(batch, url, PurgeStrategy::PageWithPagination);
                }
            }
        }
    }
}

// =============================================================================
// Term purger
// =============================================================================

/// Taxonomy-term archives listing the changed object.
///
/// A change touching more terms than `max_term_count` would queue an
/// unbounded amount of work, so it escalates to a full purge instead.
pub struct TermPurger {
    max_term_count: u64,
}

impl TermPurger {
    pub fn new(max_term_count: u64) -> Self {
        Self { max_term_count }
    }

    pub fn from_config(config: &ConfigStore) -> Self {
        Self::new(config.u64_or(MAX_TERM_COUNT_KEY, DEFAULT_MAX_TERM_COUNT))
    }

    pub fn purge_for(&self, batch: &BatchPurger, directory: &dyn SiteDirectory, post_id: u64) {
        if batch.is_full_purge_pending() {
            return;
        }
        if !directory.is_publicly_viewable(post_id) {
            return;
        }

        let terms: Vec<TermRef> = directory
            .terms_of(post_id)
            .into_iter()
            .filter(|term| directory.taxonomy_viewable(&term.taxonomy))
            .collect();

        if terms.len() as u64 > self.max_term_count {
            debug!(post_id, "Term purge escalated to a full purge");
            batch.queue_purge_all();
            return;
        }

        for term in &terms {
            self.queue_term(batch, directory, term);

            if directory.taxonomy_hierarchical(&term.taxonomy) {
                for ancestor in directory.term_ancestors(term) {
                    self.queue_term(batch, directory, &ancestor);
                }
            }
        }
    }

    /// Terms were written to an object within one taxonomy. The old
    /// assignments matter as much as the new ones: the archive of a term the
    /// object just left is stale too.
    pub fn on_terms_set(
        &self,
        batch: &BatchPurger,
        directory: &dyn SiteDirectory,
        post_id: u64,
        new_term_ids: &[u64],
        old_term_ids: &[u64],
        taxonomy: &str,
    ) {
        if batch.is_full_purge_pending() {
            return;
        }
        if !directory.is_publicly_viewable(post_id) || !directory.taxonomy_viewable(taxonomy) {
            return;
        }

        let affected: HashSet<u64> = new_term_ids.iter().chain(old_term_ids).copied().collect();

        if affected.len() as u64 > self.max_term_count {
            debug!(post_id, taxonomy, "Term purge escalated to a full purge");
            batch.queue_purge_all();
            return;
        }

        let hierarchical = directory.taxonomy_hierarchical(taxonomy);
        for id in affected {
            let term = TermRef::new(id, taxonomy);
            self.queue_term(batch, directory, &term);

            if hierarchical {
                for ancestor in directory.term_ancestors(&term) {
                    self.queue_term(batch, directory, &ancestor);
                }
            }
        }
    }

    /// Term creation, edits, and deletion reshape archive listings across
    /// the site; there is no cheap way to enumerate the affected pages.
    pub fn on_term_changed(
        &self,
        batch: &BatchPurger,
        directory: &dyn SiteDirectory,
        taxonomy: &str,
    ) {
        if directory.taxonomy_viewable(taxonomy) {
            batch.queue_purge_all();
        }
    }

    fn queue_term(&self, batch: &BatchPurger, directory: &dyn SiteDirectory, term: &TermRef) {
        if let Some(link) = directory.term_link(term) {
            queue_url(batch, link, PurgeStrategy::PageWithPagination);
        }
    }
}

// =============================================================================
// Option, menu purgers
// =============================================================================

/// Site-setting changes that alter rendered output everywhere.
///
/// Only a fixed allow-list of settings triggers purging; most host options
/// never reach the rendered page.
pub struct OptionPurger {
    watched: HashSet<&'static str>,
    front_page: HashSet<&'static str>,
}

const WATCHED_OPTIONS: [&str; 28] = [
    "blogname",
    "blogdescription",
    "site_icon",
    "WPLANG",
    "timezone_string",
    "gmt_offset",
    "date_format",
    "time_format",
    "start_of_week",
    "page_for_posts",
    "page_on_front",
    "show_on_front",
    "posts_per_page",
    "blog_public",
    "default_comment_status",
    "comments_per_page",
    "page_comments",
    "default_comments_page",
    "comment_order",
    "thread_comments",
    "thread_comments_depth",
    "close_comments_for_old_posts",
    "close_comments_days_old",
    "permalink_structure",
    "category_base",
    "tag_base",
    "template",
    "stylesheet",
];

/// Settings that only change which page the front of the site shows.
const FRONT_PAGE_OPTIONS: [&str; 3] = ["page_on_front", "page_for_posts", "show_on_front"];

impl OptionPurger {
    pub fn new() -> Self {
        Self {
            watched: WATCHED_OPTIONS.into_iter().collect(),
            front_page: FRONT_PAGE_OPTIONS.into_iter().collect(),
        }
    }

    pub fn on_option_updated(
        &self,
        batch: &BatchPurger,
        directory: &dyn SiteDirectory,
        name: &str,
    ) {
        // Front-of-site settings only invalidate the home surface.
        if self.front_page.contains(name) {
            HomePurger.purge(batch, directory);
            return;
        }

        if self.watched.contains(name) {
            debug!(option = name, "Site setting change queued a full purge");
            batch.queue_purge_all();
        }
    }
}

impl Default for OptionPurger {
    fn default() -> Self {
        Self::new()
    }
}

/// Navigation menus render on every page.
pub struct MenuPurger;

impl MenuPurger {
    pub fn on_menu_updated(&self, batch: &BatchPurger) {
        batch.queue_purge_all();
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// The embedder-facing entry points for content events.
///
/// One instance per request, wired against the deferred batch; nothing here
/// deletes files until the batch drains at shutdown.
pub struct ContentEvents {
    directory: Arc<dyn SiteDirectory>,
    batch: Arc<BatchPurger>,
    post: PostPurger,
    template: TemplatePurger,
    archive: ArchivePurger,
    author: AuthorPurger,
    home: HomePurger,
    term: TermPurger,
    option: OptionPurger,
    menu: MenuPurger,
}

impl ContentEvents {
    pub fn new(
        directory: Arc<dyn SiteDirectory>,
        batch: Arc<BatchPurger>,
        config: &ConfigStore,
    ) -> Self {
        Self {
            directory,
            batch,
            post: PostPurger::new(),
            template: TemplatePurger::default(),
            archive: ArchivePurger,
            author: AuthorPurger,
            home: HomePurger,
            term: TermPurger::from_config(config),
            option: OptionPurger::new(),
            menu: MenuPurger,
        }
    }

    pub fn batch(&self) -> &Arc<BatchPurger> {
        &self.batch
    }

    /// Call before an update is written, while the old permalink still holds.
    /// Trash-bound updates go through [`Self::before_trash`] instead.
    pub fn before_post_update(&self, post_id: u64, new_status: &PostStatus) {
        if *new_status == PostStatus::Trash {
            return;
        }

        self.post.capture(self.directory.as_ref(), post_id);
    }

    /// Call when an object is headed for the trash.
    pub fn before_trash(&self, post_id: u64) {
        self.post.capture_trashed(self.directory.as_ref(), post_id);
    }

    /// Call after a status transition has landed.
    pub fn post_status_changed(&self, post_id: u64, old: &PostStatus, new: &PostStatus) {
        // Template objects restyle everything; check them ahead of the
        // per-post path so the cheaper full purge wins.
        if self.is_template(post_id) {
            self.template.on_change(&self.batch);
            return;
        }

        let queued =
            self.post
                .on_transition(&self.batch, self.directory.as_ref(), post_id, old, new);
        if let Some(post_id) = queued {
            self.fanout(post_id);
        }
    }

    /// Call before an object is permanently deleted.
    pub fn before_post_delete(&self, post_id: u64) {
        if self.is_template(post_id) {
            self.template.on_change(&self.batch);
            return;
        }

        let queued = self
            .post
            .on_delete(&self.batch, self.directory.as_ref(), post_id);
        if let Some(post_id) = queued {
            self.fanout(post_id);
        }
    }

    pub fn comment_count_changed(&self, post_id: u64) {
        self.post
            .on_comment_count(&self.batch, self.directory.as_ref(), post_id);
    }

    /// Call when an object's term assignments in one taxonomy are written,
    /// with both the new and the previous term ids.
    pub fn terms_assigned(
        &self,
        post_id: u64,
        new_term_ids: &[u64],
        old_term_ids: &[u64],
        taxonomy: &str,
    ) {
        self.term.on_terms_set(
            &self.batch,
            self.directory.as_ref(),
            post_id,
            new_term_ids,
            old_term_ids,
            taxonomy,
        );
    }

    /// Call on term creation, edit, or deletion.
    pub fn term_changed(&self, taxonomy: &str) {
        self.term
            .on_term_changed(&self.batch, self.directory.as_ref(), taxonomy);
    }

    /// Call when a site-editor template object is trashed.
    pub fn template_trashed(&self, post_id: u64) {
        if self.is_template(post_id) {
            self.template.on_change(&self.batch);
        }
    }

    pub fn option_updated(&self, name: &str) {
        self.option
            .on_option_updated(&self.batch, self.directory.as_ref(), name);
    }

    pub fn menu_updated(&self) {
        self.menu.on_menu_updated(&self.batch);
    }

    /// Profile changes surface in bylines and author boxes everywhere.
    pub fn user_changed(&self) {
        self.batch.queue_purge_all();
    }

    /// Related pages that list the object: archives first, then the author's
    /// pages, the home surface, and finally term archives (which may
    /// escalate to a full purge and void the rest).
    fn fanout(&self, post_id: u64) {
        let directory = self.directory.as_ref();
        self.archive.purge_for(&self.batch, directory, post_id);
        self.author.purge_for(&self.batch, directory, post_id);
        self.home.purge(&self.batch, directory);
        self.term.purge_for(&self.batch, directory, post_id);
    }

    fn is_template(&self, post_id: u64) -> bool {
        self.directory
            .content_type(post_id)
            .is_some_and(|content_type| self.template.handles(&content_type))
    }
}
