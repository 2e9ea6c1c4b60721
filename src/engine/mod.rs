//! Node execution: the node abstraction, the execution driver and the
//! output commit.

pub mod executor;
pub mod node;
pub mod output;

pub use executor::{
    CancellationToken, ExecutionOutcome, ExecutionReport, ExecutionState, NodeExecutor,
    SkippedBatch,
};
pub use node::{AnyNode, BatchNode, BuiltinNode, NodeContext};
pub use output::{CommittedRow, OutputSlots};
