//! LookupJoinNode - annotates data rows from a lookup table.
//!
//! Rows of the data slot are matched against rows of the lookup slot on
//! their shared annotation columns. Each matched data row is written with
//! the batch's merged annotations, and optionally with the lookup payload
//! attached as a data annotation.

use crate::annotation::{AnnotationSet, DataAnnotationSet};
use crate::batch::{Batch, BatchingConfig};
use crate::engine::{BatchNode, NodeContext};
use crate::error::{EngineError, EngineResult};
use crate::scripting::ExpressionEvaluator;
use crate::slot::{Multiplicity, SlotDescriptor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const OUTPUT: &str = "Output";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupJoinConfig {
    pub data_slot: String,
    pub lookup_slot: String,
    /// Drop data rows with no lookup match (under an inner join).
    pub lookup_required: bool,
    /// Attach matching lookup payloads under this data annotation name.
    pub lookup_data_annotation: Option<String>,
    pub batching: BatchingConfig,
    pub parallel: bool,
}

impl Default for LookupJoinConfig {
    fn default() -> Self {
        Self {
            data_slot: "Data".to_string(),
            lookup_slot: "Lookup".to_string(),
            lookup_required: true,
            lookup_data_annotation: None,
            batching: BatchingConfig::default(),
            parallel: false,
        }
    }
}

/// Lookup join node
pub struct LookupJoinNode {
    name: String,
    config: LookupJoinConfig,
    slots: [SlotDescriptor; 3],
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl LookupJoinNode {
    pub fn new(
        name: impl Into<String>,
        config: LookupJoinConfig,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> EngineResult<Self> {
        let name = name.into();
        config.batching.validate()?;
        let names = [config.data_slot.as_str(), config.lookup_slot.as_str()];
        if names.iter().any(|n| n.is_empty() || *n == OUTPUT) || names[0] == names[1] {
            return Err(EngineError::InvalidConfiguration(format!(
                "node '{}': data and lookup slots must be distinct non-empty names",
                name
            )));
        }
        if matches!(config.lookup_data_annotation.as_deref(), Some("")) {
            return Err(EngineError::AnnotationNameEmpty);
        }

        let slots = [
            SlotDescriptor::dynamic_input(config.data_slot.clone(), true, Multiplicity::Single),
            SlotDescriptor::dynamic_input(
                config.lookup_slot.clone(),
                config.lookup_required,
                Multiplicity::Many,
            ),
            SlotDescriptor::output(OUTPUT),
        ];
        Ok(Self {
            name,
            config,
            slots,
            evaluator,
        })
    }

    pub fn config(&self) -> &LookupJoinConfig {
        &self.config
    }
}

impl BatchNode for LookupJoinNode {
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
        // Outer joins produce lookup-only batches with nothing to annotate.
        if !batch.has_rows(&self.config.data_slot) {
            tracing::debug!(
                "Node '{}': batch {} has no '{}' row",
                self.name,
                batch.key_label(),
                self.config.data_slot
            );
            return Ok(());
        }

        let mut extra = DataAnnotationSet::new();
        if let Some(name) = &self.config.lookup_data_annotation {
            for lookup in batch.input_data_all(&self.config.lookup_slot)? {
                extra.merge_in(name, lookup, self.config.batching.data_annotation_merge);
            }
        }

        for data in batch.input_data_all(&self.config.data_slot)? {
            batch.add_output_data_with(
                OUTPUT,
                data.clone(),
                &AnnotationSet::new(),
                self.config.batching.annotation_merge,
                &extra,
                self.config.batching.data_annotation_merge,
            );
        }
        Ok(())
    }
}
