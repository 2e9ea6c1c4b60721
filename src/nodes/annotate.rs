//! AnnotateNode - computed annotation node.
//!
//! Evaluates a name expression and a value expression for every input row
//! and writes the row to the output with the resulting annotation merged in.
//! An empty computed name is an error for that batch only; with
//! [`EmptyNamePolicy::Skip`] the row is written without the annotation.

use crate::annotation::{Annotation, MergeStrategy};
use crate::batch::{Batch, BatchingConfig};
use crate::engine::{BatchNode, NodeContext};
use crate::error::{EngineError, EngineResult};
use crate::nodes::{check_expression, evaluate_for_row, node_variables};
use crate::scripting::ExpressionEvaluator;
use crate::slot::SlotDescriptor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const INPUT: &str = "Input";
const OUTPUT: &str = "Output";

static SLOTS: &[SlotDescriptor] = &[SlotDescriptor::input(INPUT), SlotDescriptor::output(OUTPUT)];

/// What to do when the name expression yields an empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyNamePolicy {
    /// Fail the batch.
    #[default]
    Fail,
    /// Write the row without the annotation.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotateConfig {
    pub name_expression: String,
    pub value_expression: String,
    /// How the computed annotation is merged into the row's annotations.
    pub strategy: MergeStrategy,
    pub empty_name: EmptyNamePolicy,
    /// Expose the payload's string form as `data_string`.
    pub include_data_string: bool,
    pub batching: BatchingConfig,
    pub parallel: bool,
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            name_expression: String::new(),
            value_expression: String::new(),
            strategy: MergeStrategy::OverwriteExisting,
            empty_name: EmptyNamePolicy::Fail,
            include_data_string: false,
            batching: BatchingConfig::per_row(),
            parallel: false,
        }
    }
}

/// Annotate node - adds one computed annotation per row.
pub struct AnnotateNode {
    name: String,
    config: AnnotateConfig,
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl AnnotateNode {
    pub fn new(
        name: impl Into<String>,
        config: AnnotateConfig,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> EngineResult<Self> {
        let name = name.into();
        config.batching.validate()?;
        check_expression(evaluator.as_ref(), &name, "name_expression", &config.name_expression)?;
        check_expression(evaluator.as_ref(), &name, "value_expression", &config.value_expression)?;
        Ok(Self {
            name,
            config,
            evaluator,
        })
    }

    pub fn config(&self) -> &AnnotateConfig {
        &self.config
    }
}

impl BatchNode for AnnotateNode {
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
        let evaluator = self.evaluator.as_ref();
        for (index, row) in batch.input_row_list(INPUT)? {
            let vars = node_variables(row, INPUT, index, self.config.include_data_string);
            let name = evaluate_for_row(evaluator, &self.config.name_expression, &vars, INPUT, index, "name")?
                .to_annotation_string();

            let annotations = match Annotation::new(name, "") {
                Ok(template) => {
                    let value = evaluate_for_row(
                        evaluator,
                        &self.config.value_expression,
                        &vars,
                        INPUT,
                        index,
                        template.name(),
                    )?;
                    let mut annotations = row.annotations().clone();
                    annotations.merge_in(template.with_value(value.to_annotation_string()), self.config.strategy);
                    annotations
                }
                Err(EngineError::AnnotationNameEmpty) if self.config.empty_name == EmptyNamePolicy::Skip => {
                    tracing::debug!("Node '{}': empty annotation name for row {}, skipped", self.name, index);
                    row.annotations().clone()
                }
                Err(e) => return Err(e),
            };

            batch.add_output_row(OUTPUT, row.with_annotations(annotations));
        }
        Ok(())
    }
}
