//! MergeNode - combines rows from several input slots.
//!
//! Inputs are declared by name in the config. Every batch writes each of
//! its rows to the output, carrying the batch's merged annotations, so rows
//! that matched each other end up annotated alike.

use crate::annotation::AnnotationSet;
use crate::batch::{Batch, BatchingConfig};
use crate::engine::{BatchNode, NodeContext};
use crate::error::{EngineError, EngineResult};
use crate::scripting::ExpressionEvaluator;
use crate::slot::{Multiplicity, SlotDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

const OUTPUT: &str = "Output";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Input slot names, in output order.
    pub inputs: Vec<String>,
    /// Declare every input as required.
    pub require_all: bool,
    pub batching: BatchingConfig,
    pub parallel: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            inputs: vec!["Input 1".to_string(), "Input 2".to_string()],
            require_all: false,
            batching: BatchingConfig::merging(),
            parallel: false,
        }
    }
}

/// Merge node
pub struct MergeNode {
    name: String,
    config: MergeConfig,
    slots: Vec<SlotDescriptor>,
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl MergeNode {
    pub fn new(
        name: impl Into<String>,
        config: MergeConfig,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> EngineResult<Self> {
        let name = name.into();
        config.batching.validate()?;
        if config.inputs.is_empty() {
            return Err(EngineError::InvalidConfiguration(format!(
                "node '{}': at least one input is required",
                name
            )));
        }

        let mut seen = HashSet::new();
        let mut slots = Vec::with_capacity(config.inputs.len() + 1);
        for input in &config.inputs {
            if input.is_empty() || input == OUTPUT || !seen.insert(input.as_str()) {
                return Err(EngineError::InvalidConfiguration(format!(
                    "node '{}': invalid or duplicate input name '{}'",
                    name, input
                )));
            }
            slots.push(SlotDescriptor::dynamic_input(
                input.clone(),
                config.require_all,
                Multiplicity::Many,
            ));
        }
        slots.push(SlotDescriptor::output(OUTPUT));

        Ok(Self {
            name,
            config,
            slots,
            evaluator,
        })
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }
}

impl BatchNode for MergeNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn slots(&self) -> &[SlotDescriptor] {
        &self.slots
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
        let none = AnnotationSet::new();
        for input in &self.config.inputs {
            for data in batch.input_data_all(input)? {
                batch.add_output_data(OUTPUT, data.clone(), &none, self.config.batching.annotation_merge);
            }
        }
        Ok(())
    }
}
