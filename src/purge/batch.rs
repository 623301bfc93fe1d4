//! Deferred, deduplicated purge batching.
//!
//! Content events never delete files directly; they queue [`Permalink`]s
//! here, and the batch drains once at end of request. Duplicates collapse on
//! a stable hash, and a queued full purge dominates: it drops every queued
//! item and no more are accepted.

use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

use crate::lock;
use crate::shutdown::Terminable;

use super::Purge;

const SOURCE: &str = "purge.batch";

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("a purge target needs a URL or an object id")]
    EmptyTarget,
    #[error("the by-id purge strategy requires an object id")]
    MissingObjectId,
}

/// How much of the cache a queued permalink invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PurgeStrategy {
    /// Just the page's own artifacts.
    Page,
    /// The page plus its pagination subtree.
    PageWithPagination,
    /// Resolve the URL from the object id at drain time.
    PostId,
}

/// One queued purge target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permalink {
    url: String,
    object_id: Option<u64>,
    strategy: PurgeStrategy,
}

impl Permalink {
    pub fn new(
        url: impl Into<String>,
        object_id: Option<u64>,
        strategy: PurgeStrategy,
    ) -> Result<Self, PurgeError> {
        let url = url.into();

        if url.is_empty() && object_id.is_none() {
            return Err(PurgeError::EmptyTarget);
        }
        if strategy == PurgeStrategy::PostId && object_id.is_none() {
            return Err(PurgeError::MissingObjectId);
        }

        Ok(Self {
            url,
            object_id,
            strategy,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn object_id(&self) -> Option<u64> {
        self.object_id
    }

    pub fn strategy(&self) -> PurgeStrategy {
        self.strategy
    }

    /// Query-parameterized URLs were never cached; the executor refuses them.
    pub fn is_pretty(&self) -> bool {
        super::is_pretty_url(&self.url)
    }

    /// Stable identity for deduplication.
    pub fn hash_value(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.url.hash(&mut hasher);
        self.object_id.hash(&mut hasher);
        self.strategy.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Default)]
struct BatchState {
    items: Vec<Permalink>,
    seen: HashSet<u64>,
    purge_all: bool,
}

/// The request-scoped purge queue; drains through [`Terminable::terminate`].
pub struct BatchPurger {
    state: Mutex<BatchState>,
    purge: Arc<Purge>,
}

impl BatchPurger {
    pub fn new(purge: Arc<Purge>) -> Self {
        Self {
            state: Mutex::new(BatchState::default()),
            purge,
        }
    }

    /// Queues a target; returns false for duplicates and when a full purge
    /// already makes item-level work pointless.
    pub fn queue(&self, permalink: Permalink) -> bool {
        let mut state = lock::acquire(&self.state, SOURCE, "queue");

        if state.purge_all {
            return false;
        }

        let hash = permalink.hash_value();
        if !state.seen.insert(hash) {
            return false;
        }

        debug!(
            url = permalink.url(),
            object_id = permalink.object_id(),
            "Purge target queued"
        );
        state.items.push(permalink);
        true
    }

    /// Escalates to a full purge, dropping everything queued so far.
    pub fn queue_purge_all(&self) {
        let mut state = lock::acquire(&self.state, SOURCE, "queue_purge_all");

        if !state.purge_all {
            debug!("Full purge queued, dropping item-level targets");
        }
        state.purge_all = true;
        state.items.clear();
        state.seen.clear();
    }

    pub fn is_full_purge_pending(&self) -> bool {
        lock::acquire(&self.state, SOURCE, "is_full_purge_pending").purge_all
    }

    pub fn count(&self) -> usize {
        lock::acquire(&self.state, SOURCE, "count").items.len()
    }

    pub fn is_empty(&self) -> bool {
        let state = lock::acquire(&self.state, SOURCE, "is_empty");
        state.items.is_empty() && !state.purge_all
    }

    fn drain(&self) -> BatchState {
        std::mem::take(&mut *lock::acquire(&self.state, SOURCE, "drain"))
    }
}

impl Terminable for BatchPurger {
    /// Drains the queue; naturally idempotent since draining empties it.
    fn terminate(&self) {
        let state = self.drain();

        if state.purge_all {
            self.purge.all_pages();
            return;
        }

        for permalink in &state.items {
            self.purge.by_permalink(permalink);
        }
    }
}
