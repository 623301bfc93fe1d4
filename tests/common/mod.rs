//! Shared test fixtures: log capture and an in-memory host directory.

use std::collections::{HashMap, HashSet};
use std::sync::Once;

use subito::host::{SiteDirectory, TermRef};
use time::Date;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Routes engine logs through the test harness; `RUST_LOG` controls what
/// shows up on failures.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default)]
pub struct TestSite {
    pub home: String,
    pub permalinks: HashMap<u64, String>,
    pub viewable: HashSet<u64>,
    pub published: HashMap<u64, Date>,
    pub content_types: HashMap<u64, String>,
    pub authors: HashMap<u64, u64>,
    pub author_archives: HashMap<u64, String>,
    pub terms: HashMap<u64, Vec<TermRef>>,
    pub term_links: HashMap<(u64, String), String>,
    pub viewable_taxonomies: HashSet<String>,
}

impl TestSite {
    pub fn new(home: &str) -> Self {
        Self {
            home: home.to_string(),
            ..Default::default()
        }
    }

    pub fn with_post(mut self, post_id: u64, permalink: &str) -> Self {
        self.permalinks.insert(post_id, permalink.to_string());
        self.viewable.insert(post_id);
        self
    }
}

impl SiteDirectory for TestSite {
    fn home_url(&self) -> String {
        self.home.clone()
    }

    fn permalink(&self, post_id: u64) -> Option<String> {
        self.permalinks.get(&post_id).cloned()
    }

    fn is_publicly_viewable(&self, post_id: u64) -> bool {
        self.viewable.contains(&post_id)
    }

    fn ancestors(&self, _post_id: u64) -> Vec<u64> {
        Vec::new()
    }

    fn published_on(&self, post_id: u64) -> Option<Date> {
        self.published.get(&post_id).copied()
    }

    fn year_archive_link(&self, year: i32) -> Option<String> {
        Some(format!("{}{year:04}/", self.home))
    }

    fn month_archive_link(&self, year: i32, month: u8) -> Option<String> {
        Some(format!("{}{year:04}/{month:02}/", self.home))
    }

    fn day_archive_link(&self, year: i32, month: u8, day: u8) -> Option<String> {
        Some(format!("{}{year:04}/{month:02}/{day:02}/", self.home))
    }

    fn content_type(&self, post_id: u64) -> Option<String> {
        self.content_types.get(&post_id).cloned()
    }

    fn type_archive_link(&self, _content_type: &str) -> Option<String> {
        None
    }

    fn author_of(&self, post_id: u64) -> Option<u64> {
        self.authors.get(&post_id).copied()
    }

    fn author_archive_link(&self, author_id: u64) -> Option<String> {
        self.author_archives.get(&author_id).cloned()
    }

    fn posts_page(&self) -> Option<u64> {
        None
    }

    fn terms_of(&self, post_id: u64) -> Vec<TermRef> {
        self.terms.get(&post_id).cloned().unwrap_or_default()
    }

    fn term_link(&self, term: &TermRef) -> Option<String> {
        self.term_links
            .get(&(term.id, term.taxonomy.clone()))
            .cloned()
    }

    fn term_ancestors(&self, _term: &TermRef) -> Vec<TermRef> {
        Vec::new()
    }

    fn taxonomy_viewable(&self, taxonomy: &str) -> bool {
        self.viewable_taxonomies.contains(taxonomy)
    }

    fn taxonomy_hierarchical(&self, _taxonomy: &str) -> bool {
        false
    }
}
