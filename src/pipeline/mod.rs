//! Request and response classification pipelines.
//!
//! Cacheability is decided by running a request (and, on the write path, the
//! rendered response) through an ordered list of stages. Any stage can veto;
//! the first veto wins and is logged at debug level with the stage name, which
//! is the primary tool for answering "why was this page not cached?".

pub mod stages;

use std::sync::Arc;

use tracing::debug;

use crate::config::ConfigStore;
use crate::http::{RequestContext, ResponseState};

/// A single stage's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Reject,
}

/// What a stage gets to look at.
///
/// `response` is absent on the read path: serve-time classification happens
/// before anything has been rendered.
pub struct PipelineContext<'a> {
    pub request: &'a RequestContext,
    pub response: Option<&'a ResponseState>,
}

/// One cacheability check.
pub trait Pipe: Send + Sync {
    /// Stable stage name, used in rejection logs.
    fn name(&self) -> &'static str;

    fn handle(&self, ctx: &PipelineContext<'_>) -> Verdict;
}

/// An ordered veto chain.
pub struct Pipeline {
    label: &'static str,
    pipes: Vec<Box<dyn Pipe>>,
}

impl Pipeline {
    pub fn new(label: &'static str, pipes: Vec<Box<dyn Pipe>>) -> Self {
        Self { label, pipes }
    }

    /// Runs every stage in order; true means the page is cacheable.
    pub fn admits(&self, ctx: &PipelineContext<'_>) -> bool {
        for pipe in &self.pipes {
            if pipe.handle(ctx) == Verdict::Reject {
                debug!(
                    pipeline = self.label,
                    stage = pipe.name(),
                    path = ctx.request.path(),
                    "Request rejected by classification stage"
                );
                return false;
            }
        }

        true
    }
}

/// The read-path pipeline: everything knowable before rendering.
///
/// `integrations` are appended after the stock stages so embedders can veto
/// paths owned by other subsystems.
pub fn serve_pipeline(config: Arc<ConfigStore>, integrations: Vec<Box<dyn Pipe>>) -> Pipeline {
    let mut pipes: Vec<Box<dyn Pipe>> = vec![
        Box::new(stages::ResponseCode),
        Box::new(stages::BypassFlags),
        Box::new(stages::AdminPath::default()),
        Box::new(stages::Authenticated::default()),
        Box::new(stages::MethodCheck),
        Box::new(stages::LoginPath::default()),
        Box::new(stages::QueryString),
        Box::new(stages::Exclusion::new(config)),
    ];
    pipes.extend(integrations);

    Pipeline::new("serve", pipes)
}

/// The write-path pipeline: the read-path stages interleaved with the
/// response-only checks.
pub fn save_pipeline(config: Arc<ConfigStore>, integrations: Vec<Box<dyn Pipe>>) -> Pipeline {
    let mut pipes: Vec<Box<dyn Pipe>> = vec![
        Box::new(stages::ResponseCode),
        Box::new(stages::BypassFlags),
        Box::new(stages::AdminPath::default()),
        Box::new(stages::Authenticated::default()),
        Box::new(stages::ContentType),
        Box::new(stages::HostState),
        Box::new(stages::MethodCheck),
        Box::new(stages::LoginPath::default()),
        Box::new(stages::ObjectExcluded),
        Box::new(stages::QueryString),
        Box::new(stages::Exclusion::new(config)),
    ];
    pipes.extend(integrations);

    Pipeline::new("save", pipes)
}
