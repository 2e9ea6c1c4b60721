//! Node abstraction for the batch engine.
//!
//! Two-layer design:
//! - **`BatchNode` trait** - implemented by every node, built-in or not.
//! - **`BuiltinNode` enum** - for all built-in nodes. The compiler can inline
//!   match arms, eliminating dynamic dispatch for the common case.
//!
//! `AnyNode` wraps either variant so the executor can handle both uniformly.

use crate::batch::{Batch, BatchingConfig};
use crate::engine::executor::CancellationToken;
use crate::error::EngineResult;
use crate::scripting::ExpressionEvaluator;
use crate::slot::SlotDescriptor;

/// Context passed to node logic for every batch.
#[derive(Debug, Clone, Copy)]
pub struct NodeContext<'a> {
    /// Name of the node being executed.
    pub node_name: &'a str,
    /// Number of batches in this execution.
    pub batch_count: usize,
    pub cancellation: &'a CancellationToken,
}

impl NodeContext<'_> {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// A node whose logic runs once per batch.
///
/// `run_batch` may be called from several threads at once when the node is
/// parallel, so it only gets `&self`.
pub trait BatchNode: Send + Sync {
    /// Human-readable name of this node.
    fn name(&self) -> &str;

    /// Input and output slot descriptors.
    fn slots(&self) -> &[SlotDescriptor];

    /// How input rows are grouped into batches.
    fn batching(&self) -> &BatchingConfig;

    /// Evaluator for custom matching columns.
    fn evaluator(&self) -> Option<&dyn ExpressionEvaluator> {
        None
    }

    /// Whether batches may run concurrently.
    fn parallel(&self) -> bool {
        false
    }

    /// Process one batch, staging output rows on it.
    fn run_batch(&self, batch: &mut Batch<'_>, ctx: &NodeContext<'_>) -> EngineResult<()>;
}

use crate::nodes::{AnnotateNode, FilterNode, LookupJoinNode, MergeNode, SplitNode};

/// Enum dispatch for built-in nodes.
pub enum BuiltinNode {
    Annotate(AnnotateNode),
    Filter(FilterNode),
    Merge(MergeNode),
    LookupJoin(LookupJoinNode),
    Split(SplitNode),
}

impl BatchNode for BuiltinNode {
    fn name(&self) -> &str {
        match self {
            BuiltinNode::Annotate(n) => n.name(),
            BuiltinNode::Filter(n) => n.name(),
            BuiltinNode::Merge(n) => n.name(),
            BuiltinNode::LookupJoin(n) => n.name(),
            BuiltinNode::Split(n) => n.name(),
        }
    }

    fn slots(&self) -> &[SlotDescriptor] {
        match self {
            BuiltinNode::Annotate(n) => n.slots(),
            BuiltinNode::Filter(n) => n.slots(),
            BuiltinNode::Merge(n) => n.slots(),
            BuiltinNode::LookupJoin(n) => n.slots(),
            BuiltinNode::Split(n) => n.slots(),
        }
    }

    fn batching(&self) -> &BatchingConfig {
        match self {
            BuiltinNode::Annotate(n) => n.batching(),
            BuiltinNode::Filter(n) => n.batching(),
            BuiltinNode::Merge(n) => n.batching(),
            BuiltinNode::LookupJoin(n) => n.batching(),
            BuiltinNode::Split(n) => n.batching(),
        }
    }

    fn evaluator(&self) -> Option<&dyn ExpressionEvaluator> {
        match self {
            BuiltinNode::Annotate(n) => n.evaluator(),
            BuiltinNode::Filter(n) => n.evaluator(),
            BuiltinNode::Merge(n) => n.evaluator(),
            BuiltinNode::LookupJoin(n) => n.evaluator(),
            BuiltinNode::Split(n) => n.evaluator(),
        }
    }

    fn parallel(&self) -> bool {
        match self {
            BuiltinNode::Annotate(n) => n.parallel(),
            BuiltinNode::Filter(n) => n.parallel(),
            BuiltinNode::Merge(n) => n.parallel(),
            BuiltinNode::LookupJoin(n) => n.parallel(),
            BuiltinNode::Split(n) => n.parallel(),
        }
    }

    fn run_batch(&self, batch: &mut Batch<'_>, ctx: &NodeContext<'_>) -> EngineResult<()> {
        match self {
            BuiltinNode::Annotate(n) => n.run_batch(batch, ctx),
            BuiltinNode::Filter(n) => n.run_batch(batch, ctx),
            BuiltinNode::Merge(n) => n.run_batch(batch, ctx),
            BuiltinNode::LookupJoin(n) => n.run_batch(batch, ctx),
            BuiltinNode::Split(n) => n.run_batch(batch, ctx),
        }
    }
}

/// Wrapper that holds either a built-in node (enum dispatch) or a plugin (trait object).
pub enum AnyNode {
    Builtin(BuiltinNode),
    Plugin(Box<dyn BatchNode>),
}

impl BatchNode for AnyNode {
    fn name(&self) -> &str {
        match self {
            AnyNode::Builtin(n) => n.name(),
            AnyNode::Plugin(n) => n.name(),
        }
    }

    fn slots(&self) -> &[SlotDescriptor] {
        match self {
            AnyNode::Builtin(n) => n.slots(),
            AnyNode::Plugin(n) => n.slots(),
        }
    }

    fn batching(&self) -> &BatchingConfig {
        match self {
            AnyNode::Builtin(n) => n.batching(),
            AnyNode::Plugin(n) => n.batching(),
        }
    }

    fn evaluator(&self) -> Option<&dyn ExpressionEvaluator> {
        match self {
            AnyNode::Builtin(n) => n.evaluator(),
            AnyNode::Plugin(n) => n.evaluator(),
        }
    }

    fn parallel(&self) -> bool {
        match self {
            AnyNode::Builtin(n) => n.parallel(),
            AnyNode::Plugin(n) => n.parallel(),
        }
    }

    fn run_batch(&self, batch: &mut Batch<'_>, ctx: &NodeContext<'_>) -> EngineResult<()> {
        match self {
            AnyNode::Builtin(n) => n.run_batch(batch, ctx),
            AnyNode::Plugin(n) => n.run_batch(batch, ctx),
        }
    }
}

impl From<BuiltinNode> for AnyNode {
    fn from(node: BuiltinNode) -> Self {
        AnyNode::Builtin(node)
    }
}
