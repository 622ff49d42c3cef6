//! Pipeline nodes and their Prepare/Run/Validate lifecycle.
//!
//! Nodes are the units of work a [`Pipeline`](crate::pipeline::Pipeline)
//! orchestrates. Implement [`Node`] for the payload and wrap it in a
//! [`PipelineNode`] (the pipeline does this on registration).

mod context;
mod lifecycle;

pub use context::NodeContext;
pub use lifecycle::PipelineNode;

use crate::core::NodeResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One phase of the node lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Acquire inputs and resources.
    Prepare,
    /// Do the work.
    Run,
    /// Check the produced output.
    Validate,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Self; 3] = [Self::Prepare, Self::Run, Self::Validate];

    /// Invokes this phase on `node`.
    pub fn invoke(self, node: &mut dyn Node, ctx: &NodeContext) -> NodeResult {
        match self {
            Self::Prepare => node.prepare(ctx),
            Self::Run => node.run(ctx),
            Self::Validate => node.validate(ctx),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prepare => write!(f, "prepare"),
            Self::Run => write!(f, "run"),
            Self::Validate => write!(f, "validate"),
        }
    }
}

/// Trait for pipeline nodes.
///
/// The three phases always run in order on a single thread. A phase that
/// returns an error ends the node; later phases are not invoked. Long-running
/// phases should poll [`NodeContext::is_cancelled`] and bail out early.
pub trait Node: Send {
    /// Returns the name of the node.
    fn name(&self) -> &str;

    /// Prepares the node for running.
    fn prepare(&mut self, ctx: &NodeContext) -> NodeResult;

    /// Performs the node's work.
    fn run(&mut self, ctx: &NodeContext) -> NodeResult;

    /// Validates the work performed by [`Node::run`].
    fn validate(&mut self, ctx: &NodeContext) -> NodeResult;
}

/// A closure-based node whose prepare and validate phases always succeed.
pub struct FnNode<F>
where
    F: FnMut(&NodeContext) -> NodeResult + Send,
{
    name: String,
    func: F,
}

impl<F> FnNode<F>
where
    F: FnMut(&NodeContext) -> NodeResult + Send,
{
    /// Creates a new function-based node.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> fmt::Debug for FnNode<F>
where
    F: FnMut(&NodeContext) -> NodeResult + Send,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnNode").field("name", &self.name).finish()
    }
}

impl<F> Node for FnNode<F>
where
    F: FnMut(&NodeContext) -> NodeResult + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _ctx: &NodeContext) -> NodeResult {
        Ok(())
    }

    fn run(&mut self, ctx: &NodeContext) -> NodeResult {
        (self.func)(ctx)
    }

    fn validate(&mut self, _ctx: &NodeContext) -> NodeResult {
        Ok(())
    }
}
