//! # databatch: annotation-driven data batching
//!
//! A batching engine for node-based analysis pipelines. Every row of an input
//! slot carries a payload plus string annotations. Before a node runs, rows of
//! all its inputs are grouped into batches by matching annotation values (a
//! multi-way equi-join), and the node is invoked once per batch.
//!
//! ## Architecture
//!
//! - **Annotations**: named string values with merge strategies
//! - **Slots**: named row tables and the descriptors nodes declare
//! - **Batching**: column matching, missing-column policies, joins and
//!   cardinality checks turning input slots into a deterministic batch plan
//! - **Engine**: the node abstraction, sequential and parallel batch
//!   execution, and the thread-safe output commit
//! - **Scripting**: Rhai-based expressions for computed columns and nodes
//! - **Nodes**: built-in annotate, filter, merge, lookup join and split nodes
//!
//! ## Example
//!
//! ```ignore
//! use databatch::{
//!     config::ExecutionSettings,
//!     engine::NodeExecutor,
//!     nodes::{LookupJoinConfig, LookupJoinNode},
//!     scripting::RhaiEvaluator,
//! };
//! use std::sync::Arc;
//!
//! let node = LookupJoinNode::new("join", LookupJoinConfig::default(), Arc::new(RhaiEvaluator::new()))?;
//! let report = NodeExecutor::new(ExecutionSettings::default()).execute(&node, &[data, lookup]);
//! for slot in report.into_result()? {
//!     println!("{}: {} rows", slot.name(), slot.len());
//! }
//! ```

pub mod annotation;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod nodes;
pub mod scripting;
pub mod slot;

// Re-export commonly used types
pub use annotation::{Annotation, AnnotationSet, DataAnnotationSet, MergeStrategy};
pub use batch::{Batch, BatchBuilder, BatchingConfig, ColumnMatching, JoinMode, MissingColumnPolicy};
pub use config::{EngineConfig, ExecutionSettings, FailurePolicy, NodeConfig};
pub use engine::{BatchNode, ExecutionOutcome, ExecutionReport, NodeExecutor};
pub use error::{EngineError, EngineResult};
pub use slot::{DataRef, DataRow, DataSlot, SlotDescriptor};
