//! End-of-request coordination.
//!
//! Deferred work (queued purges, pending config saves) runs after the
//! response is done, behind a connection-release hook so the client never
//! waits on it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

/// Work that must flush before the process (or request) goes away.
pub trait Terminable: Send + Sync {
    fn terminate(&self);
}

/// Runs registered [`Terminable`]s exactly once, releasing the client
/// connection first when the embedder provides a way to.
pub struct ShutdownHandler {
    release_connection: Option<Box<dyn Fn() + Send + Sync>>,
    terminables: Vec<Arc<dyn Terminable>>,
    ran: AtomicBool,
}

impl ShutdownHandler {
    pub fn new() -> Self {
        Self {
            release_connection: None,
            terminables: Vec::new(),
            ran: AtomicBool::new(false),
        }
    }

    /// Installs the embedder's connection-release hook, e.g. a response
    /// flush. Called once, before any terminable runs.
    pub fn with_connection_release(mut self, release: impl Fn() + Send + Sync + 'static) -> Self {
        self.release_connection = Some(Box::new(release));
        self
    }

    pub fn register(&mut self, terminable: Arc<dyn Terminable>) {
        self.terminables.push(terminable);
    }

    /// Fires the shutdown sequence. Re-entry is a no-op.
    pub fn run(&self) {
        if self.ran.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(release) = &self.release_connection {
            release();
        }

        debug!(count = self.terminables.len(), "Running shutdown terminables");
        for terminable in &self.terminables {
            terminable.terminate();
        }
    }
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}
