//! FilterNode - keeps rows whose condition expression is truthy.

use crate::batch::{Batch, BatchingConfig};
use crate::engine::{BatchNode, NodeContext};
use crate::error::EngineResult;
use crate::nodes::{check_expression, evaluate_for_row, node_variables};
use crate::scripting::ExpressionEvaluator;
use crate::slot::SlotDescriptor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const INPUT: &str = "Input";
const OUTPUT: &str = "Output";

static SLOTS: &[SlotDescriptor] = &[SlotDescriptor::input(INPUT), SlotDescriptor::output(OUTPUT)];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub condition: String,
    /// Keep the rows the condition rejects instead.
    pub invert: bool,
    pub include_data_string: bool,
    pub batching: BatchingConfig,
    pub parallel: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            condition: "true".to_string(),
            invert: false,
            include_data_string: false,
            batching: BatchingConfig::per_row(),
            parallel: false,
        }
    }
}

/// Filter node
pub struct FilterNode {
    name: String,
    config: FilterConfig,
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl FilterNode {
    pub fn new(
        name: impl Into<String>,
        config: FilterConfig,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> EngineResult<Self> {
        let name = name.into();
        config.batching.validate()?;
        check_expression(evaluator.as_ref(), &name, "condition", &config.condition)?;
        Ok(Self {
            name,
            config,
            evaluator,
        })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
}

impl BatchNode for FilterNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn slots(&self) -> &[SlotDescriptor] {
        SLOTS
    }

    fn batching(&self) -> &BatchingConfig {
        &self.config.batching
    }

    fn evaluator(&self) -> Option<&dyn ExpressionEvaluator> {
        Some(self.evaluator.as_ref())
    }

    fn parallel(&self) -> bool {
        self.config.parallel
    }

    fn run_batch(&self, batch: &mut Batch<'_>, _ctx: &NodeContext<'_>) -> EngineResult<()> {
        for (index, row) in batch.input_row_list(INPUT)? {
            let vars = node_variables(row, INPUT, index, self.config.include_data_string);
            let keep = evaluate_for_row(
                self.evaluator.as_ref(),
                &self.config.condition,
                &vars,
                INPUT,
                index,
                "condition",
            )?
            .is_truthy();

            if keep != self.config.invert {
                batch.add_output_row(OUTPUT, row.clone());
            } else {
                tracing::trace!("Node '{}' filtered out row {}", self.name, index);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutionSettings, FailurePolicy};
    use crate::engine::NodeExecutor;
    use crate::nodes::test_support::{payloads, slot};
    use crate::scripting::RhaiEvaluator;

    fn wells() -> crate::slot::DataSlot {
        slot(
            "Input",
            &[
                ("P1", &[("Dose", "5")]),
                ("P2", &[("Dose", "50")]),
                ("P3", &[("Dose", "12")]),
            ],
        )
    }

    fn node(condition: &str, invert: bool) -> FilterNode {
        FilterNode::new(
            "filter",
            FilterConfig {
                condition: condition.to_string(),
                invert,
                ..FilterConfig::default()
            },
            Arc::new(RhaiEvaluator::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_keeps_truthy_rows() {
        let report = NodeExecutor::default().execute(&node("to_number(Dose) > 10.0", false), &[wells()]);
        assert!(report.is_success());
        assert_eq!(payloads(report.output("Output").unwrap()), vec!["P2", "P3"]);
    }

    #[test]
    fn test_inverted_condition() {
        let report = NodeExecutor::default().execute(&node("to_number(Dose) > 10.0", true), &[wells()]);
        assert_eq!(payloads(report.output("Output").unwrap()), vec!["P1"]);
    }

    #[test]
    fn test_annotations_preserved() {
        let report = NodeExecutor::default().execute(&node("true", false), &[wells()]);
        let out = report.output("Output").unwrap();
        assert_eq!(out.row(1).unwrap().annotations().value("Dose"), Some("50"));
    }

    #[test]
    fn test_failing_row_skipped_under_skip_policy() {
        let input = slot("Input", &[("P1", &[("Dose", "5")]), ("P2", &[])]);
        let executor = NodeExecutor::new(ExecutionSettings::default().with_failure_policy(FailurePolicy::SkipBatch));
        let report = executor.execute(&node("Dose == \"5\"", false), &[input]);
        assert!(report.is_success());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(payloads(report.output("Output").unwrap()), vec!["P1"]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let rows: Vec<(String, String)> = (0..40).map(|i| (format!("P{}", i), i.to_string())).collect();
        let mut input = crate::slot::DataSlot::new("Input");
        for (payload, dose) in &rows {
            input.add_data(
                crate::slot::DataRef::new(payload.clone()),
                crate::annotation::AnnotationSet::from_pairs([("Dose", dose.as_str())]).unwrap(),
            );
        }
        let filter = node("to_number(Dose) % 2.0 == 0.0", false);
        let sequential = NodeExecutor::default().execute(&filter, &[input.clone()]);
        let parallel = NodeExecutor::new(
            ExecutionSettings::default()
                .with_worker_threads(4)
                .with_parallel(Some(true)),
        )
        .execute(&filter, &[input]);

        let mut a = payloads(sequential.output("Output").unwrap());
        let mut b = payloads(parallel.output("Output").unwrap());
        a.sort();
        b.sort();
        assert_eq!(a.len(), 20);
        assert_eq!(a, b);
    }
}
