//! SplitNode - routes rows to outputs by annotation value.
//!
//! Each configured output receives the rows whose routing annotation equals
//! the output's name. Other rows, including rows without the annotation, go
//! to the fallback output when one is configured and are dropped otherwise.

use crate::batch::{Batch, BatchingConfig};
use crate::engine::{BatchNode, NodeContext};
use crate::error::{EngineError, EngineResult};
use crate::scripting::ExpressionEvaluator;
use crate::slot::SlotDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

const INPUT: &str = "Input";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Annotation whose value selects the output.
    pub annotation: String,
    pub outputs: Vec<String>,
    pub fallback: Option<String>,
    pub batching: BatchingConfig,
    pub parallel: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            annotation: String::new(),
            outputs: Vec::new(),
            fallback: Some("Other".to_string()),
            batching: BatchingConfig::per_row(),
            parallel: false,
        }
    }
}

/// Split node
pub struct SplitNode {
    name: String,
    config: SplitConfig,
    slots: Vec<SlotDescriptor>,
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl SplitNode {
    pub fn new(
        name: impl Into<String>,
        config: SplitConfig,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> EngineResult<Self> {
        let name = name.into();
        config.batching.validate()?;
        if config.annotation.is_empty() {
            return Err(EngineError::AnnotationNameEmpty);
        }

        let mut seen = HashSet::new();
        let mut slots = vec![SlotDescriptor::input(INPUT)];
        for output in config.outputs.iter().chain(config.fallback.iter()) {
            if output.is_empty() || output == INPUT || !seen.insert(output.as_str()) {
                return Err(EngineError::InvalidConfiguration(format!(
                    "node '{}': invalid or duplicate output name '{}'",
                    name, output
                )));
            }
            slots.push(SlotDescriptor::dynamic_output(output.clone()));
        }
        if slots.len() == 1 {
            return Err(EngineError::InvalidConfiguration(format!(
                "node '{}': no outputs configured",
                name
            )));
        }

        Ok(Self {
            name,
            config,
            slots,
            evaluator,
        })
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    fn route(&self, value: Option<&str>) -> Option<&str> {
        value
            .and_then(|v| self.config.outputs.iter().find(|o| o.as_str() == v))
            .or(self.config.fallback.as_ref())
            .map(String::as_str)
    }
}

impl BatchNode for SplitNode {
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
        for (index, row) in batch.input_row_list(INPUT)? {
            match self.route(row.annotations().value(&self.config.annotation)) {
                Some(output) => batch.add_output_row(output, row.clone()),
                None => tracing::trace!("Node '{}': row {} matches no output", self.name, index),
            }
        }
        Ok(())
    }
}
