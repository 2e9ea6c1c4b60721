//! Batch construction: grouping input rows by batch key.
//!
//! Building runs in four steps:
//!
//! 1. resolve the matching columns (sorted, except for explicit and custom
//!    columns which keep their configured order)
//! 2. compute every row's key, slot order first, then row order
//! 3. group rows by key in first-seen order, then attach wildcard rows to
//!    the concrete groups they accept, pooling the rest by unification
//! 4. apply the cardinality and join rules and merge each group's annotations
//!
//! Any error aborts the whole build, so no batch runs on a partial plan.

use crate::annotation::{AnnotationSet, DataAnnotationSet};
use crate::batch::config::{BatchMode, BatchingConfig, ColumnMatching, JoinMode, MissingColumnPolicy};
use crate::batch::key::{BatchKey, KeyPart};
use crate::batch::{Batch, BatchKind};
use crate::error::{EngineError, EngineResult};
use crate::scripting::{row_variables, ExpressionEvaluator};
use crate::slot::{DataRow, DataSlot, Multiplicity, SlotDescriptor};
use indexmap::IndexMap;
use std::collections::BTreeSet;

/// An input slot paired with the descriptor it is bound to.
#[derive(Debug, Clone, Copy)]
pub struct InputBinding<'a> {
    pub descriptor: &'a SlotDescriptor,
    pub slot: &'a DataSlot,
}

impl<'a> InputBinding<'a> {
    pub fn new(descriptor: &'a SlotDescriptor, slot: &'a DataSlot) -> Self {
        Self { descriptor, slot }
    }

    /// Name the node knows the slot by.
    pub fn name(&self) -> &'a str {
        let descriptor: &'a SlotDescriptor = self.descriptor;
        descriptor.name()
    }
}

/// Result of a build.
#[derive(Debug)]
pub struct BatchPlan<'a> {
    pub batches: Vec<Batch<'a>>,
    /// Resolved matching columns, in key order.
    pub columns: Vec<String>,
    /// Groups dropped by the inner join.
    pub dropped_groups: usize,
}

impl BatchPlan<'_> {
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// (input position, row index)
type Member = (usize, usize);

/// Groups input rows into batches according to a [`BatchingConfig`].
pub struct BatchBuilder<'e> {
    config: &'e BatchingConfig,
    evaluator: Option<&'e dyn ExpressionEvaluator>,
}

impl<'e> BatchBuilder<'e> {
    /// Create a builder. Fails on a contradictory configuration.
    pub fn new(config: &'e BatchingConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            evaluator: None,
        })
    }

    /// Evaluator used for custom matching columns.
    pub fn with_evaluator(mut self, evaluator: &'e dyn ExpressionEvaluator) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn config(&self) -> &BatchingConfig {
        self.config
    }

    /// Build the batches for one node execution.
    pub fn build<'a>(&self, inputs: &'a [InputBinding<'a>]) -> EngineResult<BatchPlan<'a>> {
        let columns = self.matching_columns(inputs);

        if self.config.join == JoinMode::Inner {
            if let Some(empty) = inputs
                .iter()
                .find(|b| b.descriptor.required && b.slot.is_empty())
            {
                tracing::debug!(
                    "Required slot '{}' is empty, no batches to build",
                    empty.name()
                );
                return Ok(BatchPlan {
                    batches: Vec::new(),
                    columns,
                    dropped_groups: 0,
                });
            }
        }

        let groups = self.group_rows(inputs, &columns)?;
        let mut batches = Vec::with_capacity(groups.len());
        let mut dropped_groups = 0;

        for (key, members) in groups {
            let mut rows = vec![Vec::new(); inputs.len()];
            for &(input, row) in &members {
                rows[input].push(row);
            }

            // Checked before the join drop, so a key with too many rows
            // fails even when another required slot has none.
            if self.config.mode == BatchMode::Single {
                for (binding, slot_rows) in inputs.iter().zip(&rows) {
                    if binding.descriptor.multiplicity == Multiplicity::Single && slot_rows.len() > 1 {
                        return Err(EngineError::CardinalityViolation {
                            slot: binding.name().to_string(),
                            key: key.describe(&columns),
                            rows: slot_rows.len(),
                        });
                    }
                }
            }

            if let Some(missing) = inputs
                .iter()
                .zip(&rows)
                .find(|(b, r)| b.descriptor.required && r.is_empty())
                .map(|(b, _)| b)
            {
                if self.config.join == JoinMode::Inner {
                    if self.config.require_presence {
                        return Err(EngineError::MissingRequiredSlotRow {
                            slot: missing.name().to_string(),
                            key: key.describe(&columns),
                        });
                    }
                    tracing::debug!(
                        "Dropping group {}: no row in required slot '{}'",
                        key.describe(&columns),
                        missing.name()
                    );
                    dropped_groups += 1;
                    continue;
                }
            }

            let mut annotations = AnnotationSet::new();
            let mut data_annotations = DataAnnotationSet::new();
            for &(input, row) in &members {
                let row = row_of(inputs, input, row)?;
                annotations.merge_all(row.annotations().iter().cloned(), self.config.annotation_merge);
                data_annotations.merge_all(
                    row.data_annotations().iter(),
                    self.config.data_annotation_merge,
                );
            }

            let label = key.describe(&columns);
            batches.push(Batch::new(
                batches.len(),
                key,
                label,
                BatchKind::from(self.config.mode),
                inputs,
                rows,
                annotations,
                data_annotations,
            ));
        }

        tracing::debug!(
            "Built {} batches over columns {:?} ({} groups dropped)",
            batches.len(),
            columns,
            dropped_groups
        );

        Ok(BatchPlan {
            batches,
            columns,
            dropped_groups,
        })
    }

    /// Matching columns for this set of inputs.
    pub fn matching_columns(&self, inputs: &[InputBinding<'_>]) -> Vec<String> {
        match &self.config.matching {
            ColumnMatching::AllShared => {
                let mut shared: Option<BTreeSet<&str>> = None;
                for binding in inputs.iter().filter(|b| !b.slot.is_empty()) {
                    let names: BTreeSet<&str> = binding.slot.annotation_columns().into_iter().collect();
                    shared = Some(match shared {
                        Some(current) => current.intersection(&names).copied().collect(),
                        None => names,
                    });
                }
                shared
                    .unwrap_or_default()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            }
            ColumnMatching::Union => inputs
                .iter()
                .flat_map(|b| b.slot.annotation_columns())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(str::to_string)
                .collect(),
            ColumnMatching::Explicit(columns) => columns.clone(),
            ColumnMatching::Custom(columns) => columns.iter().map(|c| c.name.clone()).collect(),
            ColumnMatching::MergeAll | ColumnMatching::SplitAll => Vec::new(),
        }
    }

    fn group_rows(
        &self,
        inputs: &[InputBinding<'_>],
        columns: &[String],
    ) -> EngineResult<IndexMap<BatchKey, Vec<Member>>> {
        let mut groups: IndexMap<BatchKey, Vec<Member>> = IndexMap::new();
        let mut wildcard_rows: Vec<(BatchKey, Member)> = Vec::new();

        for (input, binding) in inputs.iter().enumerate() {
            for (row_index, row) in binding.slot.rows().iter().enumerate() {
                let key = self.row_key(binding, input, row_index, row, columns)?;
                if key.has_wildcard() {
                    wildcard_rows.push((key, (input, row_index)));
                } else {
                    groups.entry(key).or_default().push((input, row_index));
                }
            }
        }

        if wildcard_rows.is_empty() {
            return Ok(groups);
        }

        // Rows no concrete group accepts pool together with the first
        // pattern group they unify with, narrowing that group's key.
        let mut pattern_groups: Vec<(BatchKey, Vec<Member>)> = Vec::new();
        for (pattern, member) in wildcard_rows {
            let mut attached = false;
            for (key, members) in groups.iter_mut() {
                if pattern.accepts(key) {
                    members.push(member);
                    attached = true;
                }
            }
            if attached {
                continue;
            }
            let pooled = pattern_groups
                .iter_mut()
                .find_map(|(key, members)| key.unify(&pattern).map(|unified| (key, members, unified)));
            match pooled {
                Some((key, members, unified)) => {
                    *key = unified;
                    members.push(member);
                }
                None => pattern_groups.push((pattern, vec![member])),
            }
        }

        for (key, members) in pattern_groups {
            groups.entry(key).or_default().extend(members);
        }
        for members in groups.values_mut() {
            members.sort_unstable();
        }
        Ok(groups)
    }

    fn row_key(
        &self,
        binding: &InputBinding<'_>,
        input: usize,
        row_index: usize,
        row: &DataRow,
        columns: &[String],
    ) -> EngineResult<BatchKey> {
        let missing = || match self.config.missing_columns {
            MissingColumnPolicy::Distinct => KeyPart::Missing,
            MissingColumnPolicy::NoMatch => KeyPart::Unmatched(KeyPart::row_id(input, row_index)),
            MissingColumnPolicy::Wildcard => KeyPart::Wildcard,
        };

        let parts = match &self.config.matching {
            ColumnMatching::SplitAll => {
                vec![KeyPart::Unmatched(KeyPart::row_id(input, row_index))]
            }
            ColumnMatching::Custom(custom) => {
                let evaluator = self.evaluator.ok_or_else(|| {
                    EngineError::InvalidConfiguration(
                        "custom matching columns need an expression evaluator".to_string(),
                    )
                })?;
                let vars = row_variables(row, binding.name(), row_index);
                let mut parts = Vec::with_capacity(custom.len());
                for column in custom {
                    let value = evaluator.evaluate(&column.expression, &vars).map_err(|e| {
                        EngineError::ExpressionEvaluation {
                            slot: binding.name().to_string(),
                            row: row_index,
                            column: column.name.clone(),
                            message: e.to_string(),
                        }
                    })?;
                    parts.push(if value.is_null() {
                        missing()
                    } else {
                        KeyPart::Value(value.to_annotation_string())
                    });
                }
                parts
            }
            _ => columns
                .iter()
                .map(|column| match row.annotations().value(column) {
                    Some(value) => KeyPart::Value(value.to_string()),
                    None => missing(),
                })
                .collect(),
        };

        Ok(BatchKey::new(parts))
    }
}

fn row_of<'a>(inputs: &[InputBinding<'a>], input: usize, row: usize) -> EngineResult<&'a DataRow> {
    let binding = &inputs[input];
    binding.slot.row(row).ok_or_else(|| EngineError::RowNotInBatch {
        slot: binding.name().to_string(),
        row: Some(row),
        batch: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::MergeStrategy;
    use crate::batch::config::CustomColumn;
    use crate::scripting::{EvaluationError, ExpressionValue, MockExpressionEvaluator};
    use crate::slot::DataRef;

    static DATA: SlotDescriptor = SlotDescriptor::input("Data");
    static META: SlotDescriptor = SlotDescriptor::input_with("Meta", false, Multiplicity::Many);
    static META_REQUIRED: SlotDescriptor = SlotDescriptor::input_with("Meta", true, Multiplicity::Many);

    fn slot(name: &str, rows: &[(&str, &[(&str, &str)])]) -> DataSlot {
        let mut slot = DataSlot::new(name);
        for (payload, pairs) in rows {
            slot.add_data(
                DataRef::new(payload.to_string()),
                AnnotationSet::from_pairs(pairs.iter().copied()).unwrap(),
            );
        }
        slot
    }

    fn payloads(batch: &Batch<'_>, slot: &str) -> Vec<String> {
        batch
            .input_data_all(slot)
            .unwrap()
            .into_iter()
            .map(|d| d.to_annotation_string())
            .collect()
    }

    fn data_meta() -> (DataSlot, DataSlot) {
        let data = slot(
            "Data",
            &[
                ("P1", &[("Sample", "A")]),
                ("P2", &[("Sample", "B")]),
                ("P3", &[("Sample", "C")]),
            ],
        );
        let meta = slot(
            "Meta",
            &[
                ("M1", &[("Sample", "A"), ("Dose", "1")]),
                ("M2", &[("Sample", "B"), ("Dose", "2")]),
            ],
        );
        (data, meta)
    }

    #[test]
    fn test_concrete_inner_join() {
        let (data, meta) = data_meta();
        let inputs = [
            InputBinding::new(&DATA, &data),
            InputBinding::new(&META_REQUIRED, &meta),
        ];
        let config = BatchingConfig::default().with_explicit_columns(["Sample"]);
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.dropped_groups, 1);
        assert_eq!(payloads(&plan.batches[0], "Data"), vec!["P1"]);
        assert_eq!(plan.batches[0].merged_annotations().value("Dose"), Some("1"));
        assert_eq!(payloads(&plan.batches[1], "Data"), vec!["P2"]);
        assert_eq!(plan.batches[1].merged_annotations().value("Dose"), Some("2"));
    }

    #[test]
    fn test_concrete_outer_join() {
        let (data, meta) = data_meta();
        let inputs = [
            InputBinding::new(&DATA, &data),
            InputBinding::new(&META_REQUIRED, &meta),
        ];
        let config = BatchingConfig::default()
            .with_explicit_columns(["Sample"])
            .with_join(JoinMode::Outer);
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();

        assert_eq!(plan.len(), 3);
        let third = &plan.batches[2];
        assert_eq!(payloads(third, "Data"), vec!["P3"]);
        assert!(!third.has_rows("Meta"));
        assert_eq!(third.merged_annotations().value("Dose"), None);
    }

    #[test]
    fn test_optional_slot_keeps_group() {
        let (data, meta) = data_meta();
        let inputs = [InputBinding::new(&DATA, &data), InputBinding::new(&META, &meta)];
        let config = BatchingConfig::default().with_explicit_columns(["Sample"]);
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.dropped_groups, 0);
    }

    #[test]
    fn test_require_presence() {
        let (data, meta) = data_meta();
        let inputs = [
            InputBinding::new(&DATA, &data),
            InputBinding::new(&META_REQUIRED, &meta),
        ];
        let config = BatchingConfig::default()
            .with_explicit_columns(["Sample"])
            .with_require_presence(true);
        let err = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap_err();
        match err {
            EngineError::MissingRequiredSlotRow { slot, key } => {
                assert_eq!(slot, "Meta");
                assert_eq!(key, r#"(Sample="C")"#);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_inner_join_set() {
        static LEFT: SlotDescriptor = SlotDescriptor::input("Left");
        static RIGHT: SlotDescriptor = SlotDescriptor::input("Right");
        let left = slot("Left", &[("l1", &[("K", "1")]), ("l2", &[("K", "2")]), ("l3", &[("K", "3")])]);
        let right = slot("Right", &[("r2", &[("K", "2")]), ("r3", &[("K", "3")]), ("r4", &[("K", "4")])]);
        let inputs = [InputBinding::new(&LEFT, &left), InputBinding::new(&RIGHT, &right)];
        let config = BatchingConfig::default();
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();

        let keys: Vec<_> = plan
            .batches
            .iter()
            .map(|b| b.merged_annotations().value("K").unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["2", "3"]);
        assert_eq!(plan.columns, vec!["K"]);
    }

    #[test]
    fn test_cardinality_violation() {
        let data = slot("Data", &[("P1", &[("Sample", "A")]), ("P2", &[("Sample", "A")])]);
        let inputs = [InputBinding::new(&DATA, &data)];
        let config = BatchingConfig::default();
        let err = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap_err();
        assert!(matches!(
            err,
            EngineError::CardinalityViolation { ref slot, rows: 2, .. } if slot == "Data"
        ));

        let config = BatchingConfig::merging();
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.batches[0].kind(), BatchKind::Merging);
        assert_eq!(payloads(&plan.batches[0], "Data"), vec!["P1", "P2"]);
    }

    #[test]
    fn test_cardinality_checked_before_join_drop() {
        static META_STRICT: SlotDescriptor = SlotDescriptor::input("Meta");
        let data = slot("Data", &[("P1", &[("Sample", "A")]), ("P2", &[("Sample", "A")])]);
        let meta = slot("Meta", &[("M1", &[("Sample", "B")])]);
        let inputs = [InputBinding::new(&DATA, &data), InputBinding::new(&META_STRICT, &meta)];
        let config = BatchingConfig::default().with_explicit_columns(["Sample"]);

        let err = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap_err();
        assert!(matches!(
            err,
            EngineError::CardinalityViolation { ref slot, ref key, rows: 2 }
                if slot == "Data" && key.contains("Sample")
        ));
    }

    #[test]
    fn test_many_slot_tolerates_multiple_rows() {
        let data = slot("Data", &[("P1", &[("Sample", "A")])]);
        let meta = slot(
            "Meta",
            &[("M1", &[("Sample", "A"), ("Dose", "1")]), ("M2", &[("Sample", "A"), ("Dose", "2")])],
        );
        let inputs = [InputBinding::new(&DATA, &data), InputBinding::new(&META, &meta)];
        let config = BatchingConfig::default();
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.batches[0].merged_annotations().value("Dose"), Some(r#"["1","2"]"#));
    }

    #[test]
    fn test_missing_and_empty_differ() {
        let data = slot(
            "Data",
            &[("P1", &[("Sample", "")]), ("P2", &[]), ("P3", &[("Sample", "")]), ("P4", &[])],
        );
        let inputs = [InputBinding::new(&DATA, &data)];
        let config = BatchingConfig::merging().with_explicit_columns(["Sample"]);
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(payloads(&plan.batches[0], "Data"), vec!["P1", "P3"]);
        assert_eq!(payloads(&plan.batches[1], "Data"), vec!["P2", "P4"]);
        assert_eq!(plan.batches[1].key_label(), "(Sample=<missing>)");
    }

    #[test]
    fn test_no_match_policy() {
        let data = slot("Data", &[("P1", &[]), ("P2", &[]), ("P3", &[("Sample", "A")])]);
        let inputs = [InputBinding::new(&DATA, &data)];
        let config = BatchingConfig::merging()
            .with_explicit_columns(["Sample"])
            .with_missing_columns(MissingColumnPolicy::NoMatch);
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(payloads(&plan.batches[0], "Data"), vec!["P1"]);
        assert_eq!(payloads(&plan.batches[1], "Data"), vec!["P2"]);
    }

    #[test]
    fn test_wildcard_policy() {
        let data = slot(
            "Data",
            &[
                ("P1", &[("Sample", "A"), ("Plate", "1")]),
                ("P2", &[("Sample", "A"), ("Plate", "2")]),
            ],
        );
        let meta = slot(
            "Meta",
            &[
                ("M1", &[("Sample", "A"), ("Dose", "5")]),
                ("M2", &[("Sample", "B"), ("Dose", "6")]),
            ],
        );
        let inputs = [InputBinding::new(&DATA, &data), InputBinding::new(&META, &meta)];
        let config = BatchingConfig::default()
            .with_explicit_columns(["Plate", "Sample"])
            .with_missing_columns(MissingColumnPolicy::Wildcard)
            .with_join(JoinMode::Outer);
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();

        // M1 attaches to both Sample=A groups, M2 forms its own group
        assert_eq!(plan.len(), 3);
        assert_eq!(payloads(&plan.batches[0], "Meta"), vec!["M1"]);
        assert_eq!(payloads(&plan.batches[1], "Meta"), vec!["M1"]);
        assert_eq!(plan.batches[1].merged_annotations().value("Dose"), Some("5"));
        assert_eq!(payloads(&plan.batches[2], "Meta"), vec!["M2"]);
        assert!(!plan.batches[2].has_rows("Data"));
    }

    #[test]
    fn test_compatible_wildcard_rows_pool_together() {
        let data = slot("Data", &[("P1", &[("Sample", "A")])]);
        let meta = slot("Meta", &[("M1", &[("Plate", "1")])]);
        let inputs = [InputBinding::new(&DATA, &data), InputBinding::new(&META_REQUIRED, &meta)];
        let config = BatchingConfig::default()
            .with_explicit_columns(["Plate", "Sample"])
            .with_missing_columns(MissingColumnPolicy::Wildcard);
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.dropped_groups, 0);
        assert_eq!(plan.batches[0].key_label(), r#"(Plate="1", Sample="A")"#);
        assert_eq!(payloads(&plan.batches[0], "Data"), vec!["P1"]);
        assert_eq!(payloads(&plan.batches[0], "Meta"), vec!["M1"]);
    }

    #[test]
    fn test_incompatible_wildcard_rows_stay_apart() {
        let data = slot("Data", &[("P1", &[("Sample", "A")])]);
        let meta = slot("Meta", &[("M1", &[("Sample", "B")])]);
        let inputs = [InputBinding::new(&DATA, &data), InputBinding::new(&META_REQUIRED, &meta)];
        let config = BatchingConfig::default()
            .with_explicit_columns(["Plate", "Sample"])
            .with_missing_columns(MissingColumnPolicy::Wildcard);
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();

        assert!(plan.is_empty());
        assert_eq!(plan.dropped_groups, 2);
    }

    #[test]
    fn test_split_and_merge_all() {
        let data = slot("Data", &[("P1", &[("Sample", "A")]), ("P2", &[("Sample", "A")])]);
        let inputs = [InputBinding::new(&DATA, &data)];

        let config = BatchingConfig::per_row();
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();
        assert_eq!(plan.len(), 2);

        let config = BatchingConfig::merging().with_matching(ColumnMatching::MergeAll);
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan.batches[0].key().is_empty());
    }

    #[test]
    fn test_all_shared_uses_non_empty_slots() {
        let data = slot("Data", &[("P1", &[("Sample", "A"), ("Plate", "1")])]);
        let meta = slot("Meta", &[("M1", &[("Sample", "A"), ("Dose", "1")])]);
        let empty = DataSlot::new("Extra");
        static EXTRA: SlotDescriptor = SlotDescriptor::input_with("Extra", false, Multiplicity::Many);
        let inputs = [
            InputBinding::new(&DATA, &data),
            InputBinding::new(&META, &meta),
            InputBinding::new(&EXTRA, &empty),
        ];
        let config = BatchingConfig::default();
        let builder = BatchBuilder::new(&config).unwrap();
        assert_eq!(builder.matching_columns(&inputs), vec!["Sample"]);
    }

    #[test]
    fn test_empty_required_slot_gives_no_batches() {
        let data = DataSlot::new("Data");
        let meta = slot("Meta", &[("M1", &[("Sample", "A")])]);
        let inputs = [InputBinding::new(&DATA, &data), InputBinding::new(&META, &meta)];
        let config = BatchingConfig::default().with_require_presence(true);
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = BatchingConfig::default()
            .with_join(JoinMode::Outer)
            .with_require_presence(true);
        assert!(matches!(
            BatchBuilder::new(&config),
            Err(EngineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_annotation_merge_order() {
        static FIRST: SlotDescriptor = SlotDescriptor::input("First");
        static SECOND: SlotDescriptor = SlotDescriptor::input("Second");
        let first = slot("First", &[("a", &[("K", "1"), ("Note", "first")])]);
        let second = slot("Second", &[("b", &[("K", "1"), ("Note", "second")])]);
        let inputs = [InputBinding::new(&FIRST, &first), InputBinding::new(&SECOND, &second)];

        let config = BatchingConfig::default()
            .with_explicit_columns(["K"])
            .with_annotation_merge(MergeStrategy::OverwriteExisting);
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();
        assert_eq!(plan.batches[0].merged_annotations().value("Note"), Some("second"));

        let config = BatchingConfig::default()
            .with_explicit_columns(["K"])
            .with_annotation_merge(MergeStrategy::SkipExisting);
        let plan = BatchBuilder::new(&config).unwrap().build(&inputs).unwrap();
        assert_eq!(plan.batches[0].merged_annotations().value("Note"), Some("first"));
    }

    #[test]
    fn test_custom_columns() {
        let data = slot("Data", &[("P1", &[("Well", "X-1")]), ("P2", &[("Well", "X-2")])]);
        let inputs = [InputBinding::new(&DATA, &data)];
        let config = BatchingConfig::merging()
            .with_matching(ColumnMatching::Custom(vec![CustomColumn::new("Plate", "plate")]));

        let mut evaluator = MockExpressionEvaluator::new();
        evaluator
            .expect_evaluate()
            .times(2)
            .returning(|_, vars| {
                let well = vars.get("Well").map(|v| v.to_annotation_string()).unwrap_or_default();
                Ok(ExpressionValue::from(well[..1].to_string()))
            });

        let plan = BatchBuilder::new(&config)
            .unwrap()
            .with_evaluator(&evaluator)
            .build(&inputs)
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.batches[0].key_label(), r#"(Plate="X")"#);
    }

    #[test]
    fn test_custom_column_failure() {
        let data = slot("Data", &[("P1", &[("Well", "X-1")])]);
        let inputs = [InputBinding::new(&DATA, &data)];
        let config = BatchingConfig::default()
            .with_matching(ColumnMatching::Custom(vec![CustomColumn::new("Plate", "broken(")]));

        let mut evaluator = MockExpressionEvaluator::new();
        evaluator
            .expect_evaluate()
            .returning(|_, _| Err(EvaluationError::Compile("unexpected end".to_string())));

        let err = BatchBuilder::new(&config)
            .unwrap()
            .with_evaluator(&evaluator)
            .build(&inputs)
            .unwrap_err();
        match err {
            EngineError::ExpressionEvaluation { slot, row, column, message } => {
                assert_eq!(slot, "Data");
                assert_eq!(row, 0);
                assert_eq!(column, "Plate");
                assert!(message.contains("unexpected end"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_custom_columns_need_evaluator() {
        let data = slot("Data", &[("P1", &[])]);
        let inputs = [InputBinding::new(&DATA, &data)];
        let config = BatchingConfig::default()
            .with_matching(ColumnMatching::Custom(vec![CustomColumn::new("Plate", "1")]));
        assert!(matches!(
            BatchBuilder::new(&config).unwrap().build(&inputs),
            Err(EngineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_deterministic() {
        let (data, meta) = data_meta();
        let inputs = [InputBinding::new(&DATA, &data), InputBinding::new(&META, &meta)];
        let config = BatchingConfig::default();
        let builder = BatchBuilder::new(&config).unwrap();
        let first = builder.build(&inputs).unwrap();
        let second = builder.build(&inputs).unwrap();
        let describe = |plan: &BatchPlan<'_>| {
            plan.batches
                .iter()
                .map(|b| (b.key().clone(), b.rows_per_slot().map(|(_, r)| r.to_vec()).collect::<Vec<_>>()))
                .collect::<Vec<_>>()
        };
        assert_eq!(describe(&first), describe(&second));
    }
}
