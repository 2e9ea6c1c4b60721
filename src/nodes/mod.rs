//! Built-in node implementations.
//!
//! Each node pairs a serde configuration struct with a [`BatchNode`]
//! implementation:
//!
//! - [`AnnotateNode`] - computes one annotation per row from expressions
//! - [`FilterNode`] - keeps rows for which an expression is true
//! - [`MergeNode`] - combines several input slots into one output
//! - [`LookupJoinNode`] - annotates data rows with matching lookup rows
//! - [`SplitNode`] - routes rows to outputs by annotation value
//!
//! [`BatchNode`]: crate::engine::BatchNode

pub mod annotate;
pub mod filter;
pub mod lookup_join;
pub mod merge;
pub mod split;

pub use annotate::{AnnotateConfig, AnnotateNode, EmptyNamePolicy};
pub use filter::{FilterConfig, FilterNode};
pub use lookup_join::{LookupJoinConfig, LookupJoinNode};
pub use merge::{MergeConfig, MergeNode};
pub use split::{SplitConfig, SplitNode};

use crate::error::{EngineError, EngineResult};
use crate::scripting::{row_variables, ExpressionEvaluator, ExpressionValue, Variables};
use crate::slot::DataRow;

/// Variable holding the payload's string form, when a node exposes it.
pub const DATA_STRING_VAR: &str = "data_string";

/// Variables for one input row, optionally exposing the payload string.
pub(crate) fn node_variables(row: &DataRow, slot: &str, index: usize, include_data_string: bool) -> Variables {
    let mut vars = row_variables(row, slot, index);
    if include_data_string {
        vars.insert(
            DATA_STRING_VAR.to_string(),
            ExpressionValue::from(row.data().to_annotation_string()),
        );
    }
    vars
}

/// Evaluate an expression for a row, attributing failures to the row.
pub(crate) fn evaluate_for_row(
    evaluator: &dyn ExpressionEvaluator,
    expression: &str,
    vars: &Variables,
    slot: &str,
    row: usize,
    column: &str,
) -> EngineResult<ExpressionValue> {
    evaluator
        .evaluate(expression, vars)
        .map_err(|e| EngineError::ExpressionEvaluation {
            slot: slot.to_string(),
            row,
            column: column.to_string(),
            message: e.to_string(),
        })
}

/// Reject an expression that does not compile.
pub(crate) fn check_expression(
    evaluator: &dyn ExpressionEvaluator,
    node: &str,
    field: &str,
    expression: &str,
) -> EngineResult<()> {
    if expression.trim().is_empty() {
        return Err(EngineError::InvalidConfiguration(format!(
            "node '{}': {} is empty",
            node, field
        )));
    }
    evaluator.validate(expression).map_err(|e| {
        EngineError::InvalidConfiguration(format!("node '{}': {}: {}", node, field, e))
    })
}
